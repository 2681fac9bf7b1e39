/// Scenario tests for the poll coordinator
///
/// Exercises the public library surface end to end: producers publishing
/// through `PollService` while consumers poll, park and disconnect.
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use poll_service::config::PollConfig;
use poll_service::models::EventKind;
use poll_service::services::{PollOptions, PollOutcome, PollService};

fn service(wait_secs: u64) -> Arc<PollService> {
    Arc::new(PollService::new(&PollConfig {
        wait_secs,
        queue_capacity: 8,
    }))
}

fn options(team_ids: &[Uuid]) -> PollOptions {
    PollOptions {
        last_event_id: None,
        team_ids: team_ids.iter().copied().collect(),
    }
}

#[tokio::test]
async fn test_publish_order_survives_repeated_polls() {
    let service = service(0);
    let user_id = Uuid::new_v4();
    let team_id = Uuid::new_v4();

    let mut ids = Vec::new();
    for n in 0..5 {
        let event = service
            .publish(user_id, team_id, EventKind::Message, json!({"n": n}))
            .await;
        ids.push(event.id);
    }

    // Draining twice from the same cursor returns the same ordered view
    for _ in 0..2 {
        match service.poll(user_id, options(&[team_id])).await {
            PollOutcome::Events(events) => {
                let drained: Vec<_> = events.iter().map(|e| e.id).collect();
                assert_eq!(drained, ids);
            }
            other => panic!("expected events, got {:?}", other),
        }
    }

    // Advancing the cursor past the third event hides the first three
    let opts = PollOptions {
        last_event_id: Some(ids[2]),
        team_ids: [team_id].into_iter().collect(),
    };
    match service.poll(user_id, opts).await {
        PollOutcome::Events(events) => {
            let drained: Vec<_> = events.iter().map(|e| e.id).collect();
            assert_eq!(drained, ids[3..].to_vec());
        }
        other => panic!("expected events, got {:?}", other),
    }
}

#[tokio::test]
async fn test_capacity_eviction_under_sustained_publishing() {
    let service = service(0);
    let user_id = Uuid::new_v4();
    let team_id = Uuid::new_v4();

    // Queue capacity is 8; publish twice that
    for n in 0..16 {
        service
            .publish(user_id, team_id, EventKind::Message, json!({"n": n}))
            .await;
    }

    match service.poll(user_id, options(&[team_id])).await {
        PollOutcome::Events(events) => {
            assert_eq!(events.len(), 8);
            // The survivors are the newest eight, still in order
            let ns: Vec<_> = events.iter().map(|e| e.payload["n"].as_i64().unwrap()).collect();
            assert_eq!(ns, (8..16).collect::<Vec<_>>());
        }
        other => panic!("expected events, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_producers_one_parked_consumer() {
    let service = service(5);
    let user_id = Uuid::new_v4();
    let team_id = Uuid::new_v4();

    let polling = {
        let service = service.clone();
        tokio::spawn(async move { service.poll(user_id, options(&[team_id])).await })
    };
    while service.stats().await.active_connections == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Several producers race to publish; exactly one event resolves the
    // parked poll, the rest land in the queue.
    let mut publishers = Vec::new();
    for n in 0..4 {
        let service = service.clone();
        publishers.push(tokio::spawn(async move {
            service
                .publish(user_id, team_id, EventKind::Message, json!({"n": n}))
                .await
        }));
    }
    for publisher in publishers {
        publisher.await.unwrap();
    }

    match polling.await.unwrap() {
        PollOutcome::Events(events) => assert_eq!(events.len(), 1),
        other => panic!("expected events, got {:?}", other),
    }

    // The remaining three are waiting for the next poll
    match service.poll(user_id, options(&[team_id])).await {
        PollOutcome::Events(events) => assert_eq!(events.len(), 3),
        other => panic!("expected events, got {:?}", other),
    }
}

#[tokio::test]
async fn test_poll_loop_with_cursor_sees_each_event_once() {
    let service = service(0);
    let user_id = Uuid::new_v4();
    let team_id = Uuid::new_v4();

    let mut cursor = None;
    let mut seen = Vec::new();

    for round in 0..3 {
        service
            .publish(user_id, team_id, EventKind::Message, json!({"round": round}))
            .await;

        let opts = PollOptions {
            last_event_id: cursor,
            team_ids: [team_id].into_iter().collect(),
        };
        match service.poll(user_id, opts).await {
            PollOutcome::Events(events) => {
                assert_eq!(events.len(), 1);
                cursor = Some(events.last().unwrap().id);
                seen.extend(events.into_iter().map(|e| e.payload["round"].as_i64().unwrap()));
            }
            other => panic!("expected events, got {:?}", other),
        }
    }

    assert_eq!(seen, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_disconnect_then_events_queue_for_next_poll() {
    let service = service(5);
    let user_id = Uuid::new_v4();
    let team_id = Uuid::new_v4();

    let polling = {
        let service = service.clone();
        tokio::spawn(async move { service.poll(user_id, options(&[team_id])).await })
    };
    while service.stats().await.active_connections == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(service.disconnect(user_id).await);
    assert_eq!(polling.await.unwrap(), PollOutcome::Disconnected);

    // With no parked connection, publishing goes to the queue
    let published = service
        .publish(user_id, team_id, EventKind::System, json!({}))
        .await;
    match service.poll(user_id, options(&[team_id])).await {
        PollOutcome::Events(events) => assert_eq!(events, vec![published]),
        other => panic!("expected events, got {:?}", other),
    }
}

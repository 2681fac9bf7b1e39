pub mod poll;
pub mod queue;
pub mod registry;
pub mod teams;

pub use poll::{PollOptions, PollService, PollServiceStats};
pub use queue::EventQueue;
pub use registry::{ConnectionId, ConnectionRegistry, PollOutcome, RegistryStats};
pub use teams::{StaticTeamDirectory, TeamDirectory, TeamServiceClient};

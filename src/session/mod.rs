pub mod builder;
pub mod config;
pub mod controller;
pub mod events;
pub mod state;

pub use builder::{CoachSession, SessionBuilder};
pub use config::{DEFAULT_SYSTEM_PROMPT, SessionConfig};
pub use controller::{CONNECTION_LOST_MESSAGE, Session, SessionHandle};
pub use events::{SessionEvent, SessionEventStream};
pub use state::{SessionPhase, SessionSnapshot, SessionSummary};

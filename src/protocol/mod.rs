//! Wire protocol of the streaming channel.
//!
//! `client_events` and `server_events` mirror the JSON frames exchanged with
//! the remote model; `inbound` is the flattened, kind-tagged view the session
//! controller dispatches on.

pub mod client_events;
pub mod inbound;
pub mod models;
pub mod server_events;

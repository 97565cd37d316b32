//! recast-server - HTTP surface for the Recast publishing pipeline
//!
//! Exposes the cron trigger, schedule management, credential status, and
//! feed resync endpoints over the core library. Caller identity is
//! resolved by the upstream auth layer and forwarded as a header.

pub mod auth;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;

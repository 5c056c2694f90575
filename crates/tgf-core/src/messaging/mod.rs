//! Requester-facing messaging (bot account or user account).

pub mod port;
pub mod throttled;
pub mod types;

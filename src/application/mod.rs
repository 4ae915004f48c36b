//! Application services: cached reads, writes and their wiring.

pub mod client;
pub mod error;
pub mod fetch;
pub mod maintenance;
pub mod mutations;
pub mod query;
pub mod session;

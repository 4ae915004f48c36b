//! Client-side data layer for the storeops admin dashboard: cached reads,
//! invalidating writes, optimistic updates and a realtime event channel.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

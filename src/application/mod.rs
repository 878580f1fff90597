//! Application layer: the services, queues and push fan-out.
//!
//! # Modules
//!
//! - [`services`] - Resolution/minting service and identifier generator
//! - [`queue`] - Work queues for the shorten and redirect paths
//! - [`workers`] - Queue processors delegating to the url service
//! - [`broadcaster`] - Push channel fan-out of cache events

pub mod broadcaster;
pub mod queue;
pub mod services;
pub mod workers;

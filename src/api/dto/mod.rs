//! Data Transfer Objects for API requests and responses.
//!
//! Request bodies are validated with `validator` before they reach a queue.

pub mod health;
pub mod monitor;
pub mod shorten;

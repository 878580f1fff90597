//! HTTP request handlers for API endpoints.
//!
//! Each handler module corresponds to a logical grouping of endpoints.

pub mod cache_events;
pub mod health;
pub mod monitor;
pub mod redirect;
pub mod shorten;
pub mod status;

pub use cache_events::cache_events_handler;
pub use health::health_handler;
pub use monitor::{clear_cache_handler, delete_cache_key_handler, list_cache_handler};
pub use redirect::redirect_handler;
pub use shorten::shorten_handler;
pub use status::status_handler;

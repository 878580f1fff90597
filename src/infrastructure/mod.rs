//! Infrastructure layer for external integrations.
//!
//! This layer implements interfaces defined by the domain layer, providing
//! concrete implementations for data persistence and caching.
//!
//! # Modules
//!
//! - [`cache`] - Shared cache with Redis and in-memory implementations
//! - [`persistence`] - Mapping store with PostgreSQL and in-memory implementations
//! - [`queue`] - Job journal with Redis and in-memory implementations

pub mod cache;
pub mod persistence;
pub mod queue;

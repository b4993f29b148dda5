//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /cache/:key` - Store a value, with an optional expiry override
//! - `GET /cache/:key` - Retrieve a value
//! - `DELETE /cache/:key` - Delete a key
//! - `GET /cache/:key/ttl` - Inspect the TTL of a key
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;

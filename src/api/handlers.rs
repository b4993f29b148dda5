//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint. Every handler goes
//! through one node's cache view, optionally scoped to a per-call policy.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::cache::{current_timestamp_ms, Cache, Cluster, PartitionAffinity};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    validate_key, DeleteResponse, ExpiryQuery, GetResponse, HealthResponse, PutRequest,
    PutResponse, StatsResponse, TtlResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// View of the cluster through the node this server fronts
    pub cache: Cache<String, String>,
}

impl AppState {
    /// Creates a new AppState serving `cache`.
    pub fn new(cache: Cache<String, String>) -> Self {
        Self { cache }
    }

    /// Starts a cluster from configuration and fronts its first node.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self> {
        let affinity = Arc::new(PartitionAffinity::new(
            config.partitions,
            config.node_count,
            config.backups,
        ));
        let cluster = Cluster::start(config.cache_config()?, config.node_count, affinity)?;
        Ok(Self::new(Cache::new(cluster, 0)?))
    }

    pub fn cluster(&self) -> &Arc<Cluster<String, String>> {
        self.cache.cluster()
    }
}

/// Handler for PUT /cache/:key
///
/// Stores a value, under the request's expiry override if one is given.
pub async fn put_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<PutRequest>,
) -> Result<Json<PutResponse>> {
    if let Some(error_msg) = req.validate(&key) {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let cache = match &req.expiry {
        Some(expiry) => state.cache.with_expiry_policy(expiry.to_policy()?),
        None => state.cache.clone(),
    };
    cache.put(key.clone(), req.value).await;

    // A zero create or update duration leaves nothing behind.
    let stored = cache.ttl(&key).is_some();
    Ok(Json(PutResponse::new(key, stored)))
}

/// Handler for GET /cache/:key
///
/// Reads a value. `create`, `update` and `access` query parameters scope the
/// read to an override policy, so `?access=0` reads and expires the entry.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<ExpiryQuery>,
) -> Result<Json<GetResponse>> {
    if let Some(error_msg) = validate_key(&key) {
        return Err(CacheError::InvalidRequest(error_msg));
    }
    let cache = match query.to_policy()? {
        Some(policy) => state.cache.with_expiry_policy(policy),
        None => state.cache.clone(),
    };

    match cache.get(&key).await {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for DELETE /cache/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if let Some(error_msg) = validate_key(&key) {
        return Err(CacheError::InvalidRequest(error_msg));
    }
    if state.cache.remove(&key).await {
        Ok(Json(DeleteResponse::new(key)))
    } else {
        Err(CacheError::NotFound(key))
    }
}

/// Handler for GET /cache/:key/ttl
///
/// Reports the TTL decided by the key's primary without touching it.
pub async fn ttl_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<TtlResponse>> {
    if let Some(error_msg) = validate_key(&key) {
        return Err(CacheError::InvalidRequest(error_msg));
    }
    match state.cache.ttl(&key) {
        Some(ttl) => Ok(Json(TtlResponse::new(key, ttl, current_timestamp_ms()))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for GET /stats
///
/// Returns statistics aggregated over every node.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let cluster = state.cluster();
    Json(StatsResponse::new(cluster.stats(), cluster.nodes().len()))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

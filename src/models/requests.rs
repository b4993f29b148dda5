//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;

use crate::cache::{MAX_KEY_LENGTH, MAX_VALUE_SIZE};
use crate::error::Result;
use crate::expiry::{ExpiryPolicy, Policy};

/// Per-call expiry policy override, durations in milliseconds.
///
/// An absent duration leaves the TTL unchanged for that operation kind and
/// zero expires the entry immediately.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpiryRequest {
    #[serde(default)]
    pub create_ms: Option<i64>,
    #[serde(default)]
    pub update_ms: Option<i64>,
    #[serde(default)]
    pub access_ms: Option<i64>,
    /// Use the eternal policy, ignoring the durations above
    #[serde(default)]
    pub eternal: bool,
}

impl ExpiryRequest {
    /// Builds the override policy.
    ///
    /// # Errors
    /// Returns `CacheError::InvalidPolicy` for a negative duration.
    pub fn to_policy(&self) -> Result<Policy> {
        if self.eternal {
            return Ok(Policy::Custom(ExpiryPolicy::eternal()));
        }
        ExpiryPolicy::from_millis(self.create_ms, self.update_ms, self.access_ms)
            .map(Policy::Custom)
    }
}

/// Request body for PUT /cache/:key
///
/// # Fields
/// - `value`: The value to store
/// - `expiry`: Optional policy override for this call
#[derive(Debug, Clone, Deserialize)]
pub struct PutRequest {
    /// The value to store
    pub value: String,
    /// Optional expiry override
    #[serde(default)]
    pub expiry: Option<ExpiryRequest>,
}

impl PutRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self, key: &str) -> Option<String> {
        if let Some(error) = validate_key(key) {
            return Some(error);
        }
        if self.value.len() > MAX_VALUE_SIZE {
            return Some(format!(
                "Value exceeds maximum size of {} bytes",
                MAX_VALUE_SIZE
            ));
        }
        None
    }
}

/// Validates a cache key taken from the request path.
pub fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {} characters",
            MAX_KEY_LENGTH
        ));
    }
    None
}

/// Query string of GET /cache/:key: `?create=..&update=..&access=..`
///
/// Any present field turns the read into a call under an override policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpiryQuery {
    pub create: Option<i64>,
    pub update: Option<i64>,
    pub access: Option<i64>,
}

impl ExpiryQuery {
    /// The override policy, or `None` when the query carries no duration.
    pub fn to_policy(&self) -> Result<Option<Policy>> {
        match (self.create, self.update, self.access) {
            (None, None, None) => Ok(None),
            (create, update, access) => {
                ExpiryPolicy::from_millis(create, update, access).map(|p| Some(Policy::Custom(p)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::expiry::{ExpiryDuration, OpKind};

    #[test]
    fn test_put_request_deserialize() {
        let json = r#"{"value": "hello"}"#;
        let req: PutRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.value, "hello");
        assert!(req.expiry.is_none());
    }

    #[test]
    fn test_put_request_with_expiry() {
        let json = r#"{"value": "hello", "expiry": {"create_ms": 60000, "access_ms": 0}}"#;
        let req: PutRequest = serde_json::from_str(json).unwrap();
        let policy = req.expiry.unwrap().to_policy().unwrap();

        assert_eq!(
            policy.duration_for(OpKind::Create),
            Some(ExpiryDuration::Millis(60_000))
        );
        assert_eq!(policy.duration_for(OpKind::Update), None);
        assert_eq!(policy.duration_for(OpKind::Access), Some(ExpiryDuration::ZERO));
    }

    #[test]
    fn test_negative_duration_rejected() {
        let expiry = ExpiryRequest {
            update_ms: Some(-1),
            ..ExpiryRequest::default()
        };
        assert!(matches!(expiry.to_policy(), Err(CacheError::InvalidPolicy(_))));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("").is_some());
        assert!(validate_key(&"k".repeat(MAX_KEY_LENGTH + 1)).is_some());
        assert!(validate_key("valid_key").is_none());
    }

    #[test]
    fn test_expiry_query() {
        assert_eq!(ExpiryQuery::default().to_policy().unwrap(), None);

        let query = ExpiryQuery {
            access: Some(1_000),
            ..ExpiryQuery::default()
        };
        let policy = query.to_policy().unwrap().unwrap();
        assert_eq!(
            policy.duration_for(OpKind::Access),
            Some(ExpiryDuration::Millis(1_000))
        );
        assert_eq!(policy.duration_for(OpKind::Create), None);
    }
}

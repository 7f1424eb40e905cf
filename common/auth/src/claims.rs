use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AuthError, AuthResult};

/// Decoded token payload: conventional registered claims plus whatever the issuer added.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Claims {
    inner: Map<String, Value>,
}

impl Claims {
    pub fn subject(&self) -> Option<&str> {
        self.inner.get("sub").and_then(Value::as_str)
    }

    pub fn issuer(&self) -> Option<&str> {
        self.inner.get("iss").and_then(Value::as_str)
    }

    /// `aud` may be a single string or an array of strings.
    pub fn audience(&self) -> Vec<&str> {
        match self.inner.get("aud") {
            Some(Value::String(item)) => vec![item.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn expires_at(&self) -> AuthResult<Option<DateTime<Utc>>> {
        self.timestamp("exp")
    }

    pub fn issued_at(&self) -> AuthResult<Option<DateTime<Utc>>> {
        self.timestamp("iat")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.inner
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.inner
    }

    fn timestamp(&self, key: &'static str) -> AuthResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.inner.get(key) else {
            return Ok(None);
        };
        let seconds = raw
            .as_i64()
            .ok_or_else(|| AuthError::InvalidClaim(key, raw.to_string()))?;
        Utc.timestamp_opt(seconds, 0)
            .single()
            .map(Some)
            .ok_or_else(|| AuthError::InvalidClaim(key, seconds.to_string()))
    }
}

impl TryFrom<Value> for Claims {
    type Error = AuthError;

    fn try_from(value: Value) -> AuthResult<Self> {
        match value {
            Value::Object(inner) => Ok(Self { inner }),
            other => Err(AuthError::InvalidJson(format!(
                "expected a JSON object, found {other}"
            ))),
        }
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(inner: Map<String, Value>) -> Self {
        Self { inner }
    }
}

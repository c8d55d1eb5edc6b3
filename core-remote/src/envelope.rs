//! Structured response envelope.
//!
//! Every non-binary response is wrapped as
//! `{"subsonic-response": {"status": "ok"|"failed", "version": "1.x.y", ...}}`.
//! A failed envelope carries `error: {code, message}`; a successful one holds
//! its payload under an endpoint-specific key (`musicFolders`, `indexes`, ...).

use crate::error::{RemoteError, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

const ROOT_KEY: &str = "subsonic-response";

#[derive(Debug, Deserialize)]
struct Root {
    #[serde(rename = "subsonic-response")]
    response: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub status: String,
    pub version: Option<String>,
    body: Map<String, Value>,
}

impl ResponseEnvelope {
    /// Parse a JSON body. A well-formed `failed` envelope is still `Ok`;
    /// use [`into_result`](Self::into_result) to turn it into an error.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let root: Root = serde_json::from_slice(bytes).map_err(|e| {
            RemoteError::InvalidResponse(format!("missing '{}' envelope: {}", ROOT_KEY, e))
        })?;
        let mut body = root.response;
        let status = body
            .remove("status")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| RemoteError::InvalidResponse("envelope without status".into()))?;
        let version = body
            .remove("version")
            .and_then(|v| v.as_str().map(str::to_string));
        Ok(Self {
            status,
            version,
            body,
        })
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// The typed service error of a failed envelope.
    pub fn error(&self) -> Option<RemoteError> {
        if self.is_ok() {
            return None;
        }
        let error = self
            .body
            .get("error")
            .cloned()
            .and_then(|v| serde_json::from_value::<ErrorBody>(v).ok())
            .unwrap_or(ErrorBody {
                code: 0,
                message: format!("server reported status '{}'", self.status),
            });
        Some(RemoteError::service(error.code, error.message))
    }

    pub fn into_result(self) -> Result<Self> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    /// Deserialize the payload stored under `key`.
    pub fn take<T: DeserializeOwned>(&mut self, key: &str) -> Result<T> {
        let value = self
            .body
            .remove(key)
            .ok_or_else(|| RemoteError::InvalidResponse(format!("response has no '{}'", key)))?;
        serde_json::from_value(value)
            .map_err(|e| RemoteError::InvalidResponse(format!("malformed '{}': {}", key, e)))
    }

    /// Like [`take`](Self::take) but an absent key yields `T::default()`.
    pub fn take_or_default<T: DeserializeOwned + Default>(&mut self, key: &str) -> Result<T> {
        if self.body.contains_key(key) {
            self.take(key)
        } else {
            Ok(T::default())
        }
    }
}

/// `true` for content types that carry a structured payload instead of media.
pub fn is_structured_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("text/")
        || essence == "application/json"
        || essence == "application/xml"
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
}

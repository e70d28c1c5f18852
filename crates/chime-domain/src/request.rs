//! Outbound callback description attached to every event.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_METHOD: &str = "POST";

fn default_method() -> String {
    DEFAULT_METHOD.to_owned()
}

/// HTTP request performed when an event fires.
///
/// A string `body` is sent verbatim; any other non-null value is sent as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackRequest {
    #[serde(default)]
    pub href: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

impl CallbackRequest {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: Value::Null,
        }
    }

    pub fn has_href(&self) -> bool {
        !self.href.trim().is_empty()
    }

    /// Overlay a partial update: scalar fields are replaced, headers are
    /// merged key by key, the body is replaced as a whole.
    pub fn merge(&mut self, changes: &RequestChanges) {
        if let Some(href) = &changes.href {
            self.href.clone_from(href);
        }
        if let Some(method) = &changes.method {
            self.method.clone_from(method);
        }
        if let Some(headers) = &changes.headers {
            for (name, value) in headers {
                self.headers.insert(name.clone(), value.clone());
            }
        }
        if let Some(body) = &changes.body {
            self.body = body.clone();
        }
    }
}

/// Partial request used by updates. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestChanges {
    pub href: Option<String>,
    pub method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<Value>,
}

impl RequestChanges {
    pub fn is_empty(&self) -> bool {
        self.href.is_none() && self.method.is_none() && self.headers.is_none() && self.body.is_none()
    }
}

impl From<CallbackRequest> for RequestChanges {
    fn from(request: CallbackRequest) -> Self {
        Self {
            href: Some(request.href),
            method: Some(request.method),
            headers: Some(request.headers),
            body: Some(request.body),
        }
    }
}

use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use serde_json::Value;

use chime_domain::request::CallbackRequest;

use crate::domain::repository::CallbackClient;
use crate::domain::types::CallbackResponse;
use crate::error::CallbackError;

/// Executes event callbacks over HTTP.
#[derive(Clone)]
pub struct ReqwestCallbackClient {
    client: Client,
}

impl ReqwestCallbackClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build callback http client")?;
        Ok(Self { client })
    }
}

fn build_headers(headers: &std::collections::BTreeMap<String, String>) -> Result<HeaderMap, CallbackError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| CallbackError::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| CallbackError::InvalidRequest(format!("header {name}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

impl CallbackClient for ReqwestCallbackClient {
    async fn execute(&self, request: &CallbackRequest) -> Result<CallbackResponse, CallbackError> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| CallbackError::InvalidRequest(format!("method {:?}: {e}", request.method)))?;
        let url = Url::parse(&request.href)
            .map_err(|e| CallbackError::InvalidRequest(format!("href {:?}: {e}", request.href)))?;

        let mut builder = self
            .client
            .request(method, url)
            .headers(build_headers(&request.headers)?);
        builder = match &request.body {
            Value::Null => builder,
            Value::String(raw) => builder.body(raw.clone()),
            other => builder.json(other),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                CallbackError::InvalidRequest(e.to_string())
            } else {
                CallbackError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallbackError::Transport(e.to_string()))?;

        if status.is_success() {
            Ok(CallbackResponse {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(CallbackError::Status {
                code: status.as_u16(),
                body,
            })
        }
    }
}

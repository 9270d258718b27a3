//! HTTP agent: POST the request JSON, the response body is the raw output.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use taskloom_core::agent::{AgentError, RawOutput};
use taskloom_types::task::AgentRequest;

#[derive(Debug, Clone)]
pub struct HttpAgent {
    client: reqwest::Client,
    url: String,
}

impl HttpAgent {
    pub fn new(url: impl Into<String>, headers: HashMap<String, String>) -> Result<Self, AgentError> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in &headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AgentError::Unavailable(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AgentError::Unavailable(format!("invalid value for header '{name}': {e}")))?;
            default_headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .build()
            .map_err(|e| AgentError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn invoke(&self, request: &AgentRequest) -> Result<RawOutput, AgentError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::Unavailable(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| AgentError::Failed(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(AgentError::Failed(format!("HTTP {status}: {}", text.trim())));
        }

        Ok(RawOutput(body.to_vec()))
    }
}

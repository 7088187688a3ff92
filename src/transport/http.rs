//! [`Transport`] over HTTP, backed by reqwest.

use std::time::Duration;

use async_trait::async_trait;

use super::{Method, RawResponse, Request, Transport};
use crate::error::{Cause, Error, Result};

const USER_AGENT: &str = concat!("nico-thread/", env!("CARGO_PKG_VERSION"));

/// Transport performing real HTTP requests.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// A transport with a 30 second request timeout.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| http_error("failed to create HTTP client", err))?;
        Ok(Self { client })
    }

    /// Use a preconfigured reqwest client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: Request) -> Result<RawResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| http_error("failed to reach the comment server", err))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|err| http_error("failed to read response body", err))?;

        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

fn http_error(message: &str, err: reqwest::Error) -> Error {
    Error::transport(message).with_cause(Cause::Io(err.to_string()))
}

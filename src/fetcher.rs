use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::command::CommandSpec;
use crate::error::HarvestError;

/// Retrieves the full body behind a URL. No retries: a failure is reported to
/// the caller, which decides whether the item is skipped.
pub trait PhotoFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, HarvestError>;
}

impl<F: PhotoFetcher + ?Sized> PhotoFetcher for &F {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, HarvestError> {
        (**self).fetch(url)
    }
}

impl<F: PhotoFetcher + ?Sized> PhotoFetcher for Box<F> {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, HarvestError> {
        (**self).fetch(url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    /// Shell out to an external HTTP client.
    #[default]
    Curl,
    /// In-process blocking HTTP client.
    Http,
}

/// Fetches through `curl`, failing on HTTP error statuses. `curl` is any
/// command accepting curl's flags followed by the URL.
#[derive(Debug, Clone)]
pub struct CurlFetcher {
    command: CommandSpec,
}

impl CurlFetcher {
    pub fn new(curl: CommandSpec, timeout: Duration) -> Self {
        let max_time = timeout.as_secs().max(1).to_string();
        Self {
            command: curl.with_args(&[
                "--silent",
                "--show-error",
                "--fail",
                "--location",
                "--max-time",
                &max_time,
            ]),
        }
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }
}

impl PhotoFetcher for CurlFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, HarvestError> {
        self.command.output(&[url])
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("profile-harvester/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, HarvestError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .status()
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
        Err(HarvestError::HttpStatus { status, message })
    }
}

impl PhotoFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, HarvestError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let body = response
            .bytes()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(body.to_vec())
    }
}

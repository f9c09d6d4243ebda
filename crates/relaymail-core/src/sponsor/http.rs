//! HTTP client for the sponsor relay

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{MailError, MailResult};

const SPONSOR_PATH: &str = "/sponsor";
const EXECUTE_PATH: &str = "/execute";

use super::protocol::{
    ErrorBody, ExecuteRequest, ExecuteResponse, SponsorRequest, SponsorResponse, SponsorService,
    SponsoredTransaction,
};

/// [`SponsorService`] speaking JSON over HTTP
#[derive(Clone)]
pub struct HttpSponsorService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSponsorService {
    /// Client for the relay at `base_url` (e.g. `http://localhost:3001`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> MailResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> MailResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST to sponsor relay");

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            let bytes = response.bytes().await?;
            return Ok(serde_json::from_slice(&bytes)?);
        }
        Err(Self::status_error(path, status, response).await)
    }

    /// Map a non-success response to an error.
    ///
    /// Any 4xx is a rejection. The relay also answers a refused draft on
    /// `/sponsor` with a 5xx carrying its `{ error, details? }` body, so that
    /// is a rejection too; other 5xx responses count as the round-trip failing.
    async fn status_error(path: &str, status: StatusCode, response: Response) -> MailError {
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ErrorBody>(&text).ok();
        let relay_refused = path == SPONSOR_PATH && body.is_some();
        let reason = match body {
            Some(body) => body.to_string(),
            None if text.is_empty() => status.to_string(),
            None => text,
        };
        let message = format!("{} returned {}: {}", path, status.as_u16(), reason);
        if status.is_client_error() || relay_refused {
            MailError::SponsorshipRejected(message)
        } else {
            MailError::NetworkUnavailable(message)
        }
    }
}

#[async_trait]
impl SponsorService for HttpSponsorService {
    async fn sponsor(&self, request: &SponsorRequest) -> MailResult<SponsoredTransaction> {
        let response: SponsorResponse = self.post(SPONSOR_PATH, request).await?;
        SponsoredTransaction::try_from(response)
    }

    async fn execute(&self, request: &ExecuteRequest) -> MailResult<String> {
        let response: ExecuteResponse = self.post(EXECUTE_PATH, request).await?;
        Ok(response.digest)
    }
}

//! HTTP implementation of [`Fetcher`] on `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{redirect, Client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PortalConfig;
use crate::contract::{content_type, FetchError, Fetcher, HttpMethod};
use crate::descriptor::ResourceDescriptor;
use crate::error::MirrorError;

const MAX_REDIRECTS: usize = 10;

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(portal: &PortalConfig) -> Result<Self, MirrorError> {
        let client = Client::builder()
            .user_agent(portal.user_agent.clone())
            .timeout(Duration::from_secs(portal.request_timeout_secs))
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| MirrorError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

/// `expected` matches when it is `*` or a case-insensitive prefix of the header value,
/// so `text/html` accepts `text/html; charset=iso-8859-1`.
pub fn content_type_matches(header: Option<&str>, expected: &str) -> bool {
    if expected == content_type::ANY {
        return true;
    }
    header.is_some_and(|value| {
        value
            .trim()
            .to_ascii_lowercase()
            .starts_with(&expected.to_ascii_lowercase())
    })
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        method: HttpMethod,
        resource: &ResourceDescriptor,
        expected_content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        let url = resource.request_uri();
        let request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url).form(resource.form_payload()),
        };
        debug!(url, ?method, "Sending request");

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err("request cancelled".into()),
            response = request.send() => response?,
        };
        let response = response.error_for_status()?;

        let header = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        if !content_type_matches(header.as_deref(), expected_content_type) {
            warn!(url, expected = expected_content_type, got = ?header, "Unexpected content type");
            return Err(format!(
                "unexpected content type {:?} from {url}, expected {expected_content_type}",
                header.unwrap_or_default()
            )
            .into());
        }

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err("request cancelled".into()),
            body = response.bytes() => body?,
        };
        debug!(url, bytes = body.len(), "Received response");
        Ok(body.to_vec())
    }
}

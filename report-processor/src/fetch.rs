use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use crate::context::{ReportDescription, RequestContext};
use crate::error::DownloadError;

#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

/// Fetches archives with a single GET. Any transport error or non-success status
/// fails the download; there is no retry.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        if url.is_empty() {
            return Err(DownloadError::MissingUrl);
        }

        let request_error = |source| DownloadError::Request {
            url: url.to_owned(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_owned(),
                status,
            });
        }

        let body = response.bytes().await.map_err(request_error)?;
        Ok(body.to_vec())
    }
}

/// Download the archive a report description points at.
pub async fn download_report(
    fetcher: &dyn ArchiveFetcher,
    description: &ReportDescription,
    ctx: &RequestContext,
) -> Result<Vec<u8>, DownloadError> {
    let url = match description.url.as_deref() {
        Some(url) if !url.is_empty() => url,
        _ => return Err(DownloadError::MissingUrl),
    };

    info!(account = %ctx.account, "Downloading report from {}", url);
    let archive = fetcher.fetch(url).await?;
    info!(
        account = %ctx.account,
        bytes = archive.len(),
        "Successfully downloaded tar from {}",
        url
    );

    Ok(archive)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::MockServer;

    use super::*;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5)).unwrap()
    }

    fn description(url: Option<String>) -> ReportDescription {
        ReportDescription {
            account: Some("12345".to_string()),
            b64_identity: Some("aWRlbnRpdHk=".to_string()),
            request_id: Some("req-1".to_string()),
            url,
        }
    }

    #[tokio::test]
    async fn test_download_returns_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/report.tar.gz");
            then.status(200).body("archive bytes");
        });

        let description = description(Some(server.url("/report.tar.gz")));
        let ctx = RequestContext::from(&description);
        let body = download_report(&fetcher(), &description, &ctx)
            .await
            .unwrap();

        assert_eq!(body, b"archive bytes");
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn test_missing_or_empty_url() {
        let ctx = RequestContext::default();

        let result = download_report(&fetcher(), &description(None), &ctx).await;
        assert!(matches!(result, Err(DownloadError::MissingUrl)));

        let result = download_report(&fetcher(), &description(Some(String::new())), &ctx).await;
        assert!(matches!(result, Err(DownloadError::MissingUrl)));
    }

    #[tokio::test]
    async fn test_error_status_fails_without_retry() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::GET);
            then.status(503);
        });

        let result = fetcher().fetch(&server.url("/report.tar.gz")).await;
        match result {
            Err(DownloadError::Status { status, .. }) => assert_eq!(status.as_u16(), 503),
            other => panic!("expected a status error, got {other:?}"),
        }
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn test_transport_error_carries_url() {
        // Nothing listens on port 1
        let url = "http://127.0.0.1:1/report.tar.gz";
        match fetcher().fetch(url).await {
            Err(err @ DownloadError::Request { .. }) => assert!(err.to_string().contains(url)),
            other => panic!("expected a request error, got {other:?}"),
        }
    }
}

use common_kafka::kafka_producer::KafkaProduceError;
use thiserror::Error;

/// Failures retrieving the report archive. Always fatal for the report.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("report description has no archive url")]
    MissingUrl,
    #[error("unexpected error downloading report from {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("report download from {url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// Failures reading the archive or its manifest. Per-slice problems never surface
/// here, they are reported as rejections alongside the accepted slices.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unexpected error reading tar file: {0}")]
    UnreadableArchive(#[from] std::io::Error),
    #[error("tar does not contain valid JSON metadata & report files (metadata found: {has_manifest}, report files: {data_entries})")]
    MissingEntries {
        has_manifest: bool,
        data_entries: usize,
    },
    #[error("invalid metadata file: {0}")]
    InvalidManifest(String),
    #[error("report file {entry} is not valid JSON: {source}")]
    InvalidJson {
        entry: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no report file matches any report slice listed in the metadata")]
    NoMatchingSlices,
    #[error("archive extraction task did not complete: {0}")]
    Interrupted(tokio::task::JoinError),
}

#[derive(Error, Debug)]
#[error("failed to upload host {host_id} for account={account} and report_platform_id={request_id}: {source}")]
pub struct PublishError {
    pub account: String,
    pub request_id: String,
    pub host_id: String,
    #[source]
    pub source: KafkaProduceError,
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("report does not contain any valid hosts for account={account} and report_platform_id={request_id}")]
    NoValidHosts { account: String, request_id: String },
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("report processing was cancelled")]
    Cancelled,
}

impl ProcessError {
    /// Whether the same report could plausibly succeed if delivered again. Malformed
    /// input never will.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::Download(DownloadError::MissingUrl) => false,
            ProcessError::Download(_) => true,
            ProcessError::Extract(ExtractError::Interrupted(_)) => true,
            ProcessError::Extract(_) => false,
            ProcessError::NoValidHosts { .. } => false,
            ProcessError::Publish(_) => true,
            ProcessError::Cancelled => true,
        }
    }

    /// Short label used for the outcome metric.
    pub fn label(&self) -> &'static str {
        match self {
            ProcessError::Download(_) => "download_failed",
            ProcessError::Extract(_) => "extract_failed",
            ProcessError::NoValidHosts { .. } => "no_valid_hosts",
            ProcessError::Publish(_) => "publish_failed",
            ProcessError::Cancelled => "cancelled",
        }
    }
}

use std::str::FromStr;

use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    // Log envelopes instead of producing them, for running without a broker
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(from = "UPLOAD_TOPIC", default = "platform.inventory.host-ingress")]
    pub upload_topic: String,

    #[envconfig(from = "HOSTS_TRANSFORMATION_ENABLED", default = "true")]
    pub hosts_transformation_enabled: bool,

    // Only controls how often progress is logged, hosts are always published one at a time
    #[envconfig(from = "HOSTS_UPLOAD_FUTURES_COUNT", default = "100")]
    pub hosts_upload_futures_count: usize,

    #[envconfig(from = "MAX_HOSTS_PER_SLICE", default = "10000")]
    pub max_hosts_per_slice: usize,

    #[envconfig(from = "DOWNLOAD_TIMEOUT_SECS", default = "60")]
    pub download_timeout_secs: u64,

    #[envconfig(from = "PUBLISH_FAILURE_POLICY", default = "abort")]
    pub publish_failure_policy: PublishFailurePolicy,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            progress_log_interval: self.hosts_upload_futures_count.max(1),
            max_hosts_per_slice: self.max_hosts_per_slice,
            publish_failure_policy: self.publish_failure_policy,
        }
    }
}

/// The subset of configuration the report pipeline itself reads.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    pub progress_log_interval: usize,
    pub max_hosts_per_slice: usize,
    pub publish_failure_policy: PublishFailurePolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            progress_log_interval: 100,
            max_hosts_per_slice: 10000,
            publish_failure_policy: PublishFailurePolicy::Abort,
        }
    }
}

/// What the processor does when a single host fails to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFailurePolicy {
    /// Stop the report at the first failed host and surface the error.
    Abort,
    /// Log and count the failure, then carry on with the remaining hosts.
    Continue,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParsePublishFailurePolicyError(String);

impl std::fmt::Display for ParsePublishFailurePolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown publish failure policy '{}', expected 'abort' or 'continue'",
            self.0
        )
    }
}

impl std::error::Error for ParsePublishFailurePolicyError {}

impl FromStr for PublishFailurePolicy {
    type Err = ParsePublishFailurePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(PublishFailurePolicy::Abort),
            "continue" => Ok(PublishFailurePolicy::Continue),
            _ => Err(ParsePublishFailurePolicyError(s.to_owned())),
        }
    }
}

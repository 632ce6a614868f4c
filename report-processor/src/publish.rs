use std::time::Duration;

use async_trait::async_trait;
use common_kafka::config::KafkaConfig;
use common_kafka::kafka_producer::{
    create_kafka_producer, send_json_to_kafka, KafkaContext, KafkaProduceError,
};
use metrics::counter;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, Producer};
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::context::RequestContext;
use crate::error::PublishError;
use crate::extract::Host;
use crate::filter::HostRecord;
use crate::metrics_consts::{HOSTS_PUBLISHED, HOSTS_PUBLISH_FAILED};

pub const ADD_HOST_OPERATION: &str = "add_host";
pub const SYSTEM_UNIQUE_ID_KEY: &str = "system_unique_id";

/// The message the inventory service consumes, one per host.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub operation: &'static str,
    pub data: &'a Host,
    pub platform_metadata: PlatformMetadata<'a>,
}

#[derive(Debug, Serialize)]
pub struct PlatformMetadata<'a> {
    pub request_id: &'a str,
    pub b64_identity: &'a str,
}

impl<'a> Envelope<'a> {
    pub fn add_host(host: &'a HostRecord, ctx: &'a RequestContext) -> Self {
        // Hosts without a system unique id are tracked by the id assigned during filtering
        let request_id = host
            .facts
            .get(SYSTEM_UNIQUE_ID_KEY)
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
            .unwrap_or(&host.host_id);

        Envelope {
            operation: ADD_HOST_OPERATION,
            data: &host.facts,
            platform_metadata: PlatformMetadata {
                request_id,
                b64_identity: &ctx.b64_identity,
            },
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one host, returning once delivery has been acknowledged or has failed.
    async fn publish(&self, host: &HostRecord, ctx: &RequestContext) -> Result<(), PublishError>;
}

/// Publishes to Kafka through a single long-lived producer shared by every report.
pub struct KafkaPublisher {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaPublisher {
    pub async fn new(config: &KafkaConfig, topic: String) -> Result<Self, KafkaError> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);
        let producer = create_kafka_producer(config).await?;
        Ok(Self::from_producer(producer, topic))
    }

    pub fn from_producer(producer: FutureProducer<KafkaContext>, topic: String) -> Self {
        Self { producer, topic }
    }

    pub fn flush(&self, timeout: Duration) -> Result<(), KafkaError> {
        self.producer.flush(timeout)
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    #[instrument(skip_all, fields(host_id = %host.host_id))]
    async fn publish(&self, host: &HostRecord, ctx: &RequestContext) -> Result<(), PublishError> {
        let envelope = Envelope::add_host(host, ctx);

        match send_json_to_kafka(&self.producer, &self.topic, None, &envelope).await {
            Ok(ack) => {
                counter!(HOSTS_PUBLISHED).increment(1);
                info!(
                    "Message delivered to {} [{}] for request_id [{}]",
                    self.topic, ack.partition, ctx.request_id
                );
                Ok(())
            }
            Err(e) => {
                counter!(HOSTS_PUBLISH_FAILED).increment(1);
                error!(
                    "Message delivery for topic {} failed for request_id [{}]: {}",
                    self.topic, ctx.request_id, e
                );
                Err(PublishError {
                    account: ctx.account.clone(),
                    request_id: ctx.request_id.clone(),
                    host_id: host.host_id.clone(),
                    source: e,
                })
            }
        }
    }
}

/// Logs envelopes instead of sending them anywhere.
pub struct PrintPublisher;

#[async_trait]
impl Publisher for PrintPublisher {
    async fn publish(&self, host: &HostRecord, ctx: &RequestContext) -> Result<(), PublishError> {
        let envelope = Envelope::add_host(host, ctx);
        let payload = serde_json::to_string(&envelope).map_err(|e| PublishError {
            account: ctx.account.clone(),
            request_id: ctx.request_id.clone(),
            host_id: host.host_id.clone(),
            source: KafkaProduceError::SerializationError { error: e },
        })?;

        counter!(HOSTS_PUBLISHED).increment(1);
        info!("envelope: {}", payload);
        Ok(())
    }
}

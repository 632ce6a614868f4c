#![allow(dead_code)]
//! Shared helpers for building report archives and capturing published hosts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common_kafka::kafka_producer::KafkaProduceError;
use httpmock::MockServer;
use report_processor::config::ProcessorConfig;
use report_processor::context::{ReportDescription, RequestContext};
use report_processor::error::PublishError;
use report_processor::fetch::HttpFetcher;
use report_processor::filter::HostRecord;
use report_processor::processor::ReportProcessor;
use report_processor::publish::{Envelope, Publisher};
use report_processor::transform::TransformChain;
use serde_json::{json, Map, Value};

pub const REPORT_PATH: &str = "/reports/report.tar.gz";

pub fn manifest(slices: &[(&str, usize)]) -> Vec<u8> {
    let report_slices: Map<String, Value> = slices
        .iter()
        .map(|(id, n)| (id.to_string(), json!({ "number_hosts": n })))
        .collect();
    serde_json::to_vec(&json!({
        "report_id": "report-1",
        "host_inventory_api_version": "1.0",
        "source": "qpc",
        "source_metadata": {"report_platform_id": "report-1"},
        "report_slices": report_slices,
    }))
    .unwrap()
}

pub fn slice(id: &str, hosts: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({ "report_slice_id": id, "hosts": hosts })).unwrap()
}

pub fn tarball(files: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Serve `archive` from a mock server, returning the server and a description
/// pointing at it.
pub fn serve_archive(archive: Vec<u8>) -> (MockServer, ReportDescription) {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path(REPORT_PATH);
        then.status(200).body(&archive);
    });
    let description = description(Some(server.url(REPORT_PATH)));
    (server, description)
}

pub fn description(url: Option<String>) -> ReportDescription {
    ReportDescription {
        account: Some("12345".to_string()),
        b64_identity: Some("aWRlbnRpdHk=".to_string()),
        request_id: Some("req-1".to_string()),
        url,
    }
}

#[derive(Default)]
pub struct CollectingPublisher {
    pub envelopes: Mutex<Vec<Value>>,
}

impl CollectingPublisher {
    pub fn published(&self) -> Vec<Value> {
        self.envelopes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for CollectingPublisher {
    async fn publish(&self, host: &HostRecord, ctx: &RequestContext) -> Result<(), PublishError> {
        let envelope = serde_json::to_value(Envelope::add_host(host, ctx)).unwrap();
        self.envelopes.lock().unwrap().push(envelope);
        Ok(())
    }
}

/// Fails the first `failures` publishes, then succeeds.
pub struct FlakyPublisher {
    pub failures: usize,
    pub attempts: Mutex<usize>,
}

impl FlakyPublisher {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: Mutex::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Publisher for FlakyPublisher {
    async fn publish(&self, host: &HostRecord, ctx: &RequestContext) -> Result<(), PublishError> {
        let mut attempts = self.attempts.lock().unwrap();
        *attempts += 1;
        if *attempts <= self.failures {
            return Err(PublishError {
                account: ctx.account.clone(),
                request_id: ctx.request_id.clone(),
                host_id: host.host_id.clone(),
                source: KafkaProduceError::KafkaProduceCanceled,
            });
        }
        Ok(())
    }
}

pub fn processor(publisher: Arc<dyn Publisher>, config: ProcessorConfig) -> ReportProcessor {
    processor_with_transforms(publisher, config, true)
}

pub fn processor_with_transforms(
    publisher: Arc<dyn Publisher>,
    config: ProcessorConfig,
    transformation_enabled: bool,
) -> ReportProcessor {
    let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
    ReportProcessor::new(
        Arc::new(fetcher),
        Arc::new(TransformChain::with_default_rules(transformation_enabled)),
        publisher,
        config,
    )
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error};
use common_kafka::config::ConsumerConfig;
use common_kafka::kafka_consumer::{RecvErr, SingleTopicConsumer};
use envconfig::Envconfig;
use report_processor::{
    config::Config,
    context::{ReportDescription, RequestContext},
    error::ProcessError,
    fetch::HttpFetcher,
    processor::ReportProcessor,
    publish::{KafkaPublisher, PrintPublisher, Publisher},
    server,
    transform::TransformChain,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}

async fn handle_report(
    processor: &ReportProcessor,
    description: ReportDescription,
    shutdown: &CancellationToken,
) -> bool {
    let ctx = RequestContext::from(&description);
    info!(
        account = %ctx.account,
        request_id = %ctx.request_id,
        "Processing report"
    );

    match processor.process(&description, shutdown).await {
        Ok(summary) => {
            info!(
                account = %ctx.account,
                request_id = %ctx.request_id,
                hosts_published = summary.hosts_published,
                hosts_failed = summary.hosts_failed,
                hosts_rejected = summary.hosts_rejected,
                "Report processed"
            );
            true
        }
        // The report is left uncommitted so it is redelivered after restart
        Err(ProcessError::Cancelled) => {
            warn!(
                request_id = %ctx.request_id,
                "Report processing interrupted by shutdown"
            );
            false
        }
        Err(e) if e.is_retryable() => {
            error!(
                request_id = %ctx.request_id,
                reason = e.label(),
                "Report processing failed: {}",
                e
            );
            true
        }
        Err(e) => {
            warn!(
                request_id = %ctx.request_id,
                reason = e.label(),
                "Report discarded: {}",
                e
            );
            true
        }
    }
}

#[tokio::main]
pub async fn main() -> Result<(), Error> {
    setup_tracing();
    info!("Starting up...");

    ConsumerConfig::set_defaults("report-processor", "platform.upload.announce");
    let config = Config::init_from_env().context("failed to load configuration")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let recorder = server::setup_metrics_recorder().context("failed to install metrics recorder")?;
    let bind = config.bind();
    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server::serve(server::router(recorder), &bind, server_shutdown.clone()).await
        {
            error!("Health and metrics server failed: {}", e);
            server_shutdown.cancel();
        }
    });

    let kafka_publisher = if config.print_sink {
        None
    } else {
        let publisher = KafkaPublisher::new(&config.kafka, config.upload_topic.clone())
            .await
            .context("failed to create Kafka producer")?;
        Some(Arc::new(publisher))
    };
    let publisher: Arc<dyn Publisher> = match &kafka_publisher {
        Some(publisher) => publisher.clone(),
        None => Arc::new(PrintPublisher),
    };

    let fetcher = HttpFetcher::new(Duration::from_secs(config.download_timeout_secs))
        .context("failed to build HTTP client")?;
    let transforms = TransformChain::with_default_rules(config.hosts_transformation_enabled);
    info!(
        enabled = config.hosts_transformation_enabled,
        rules = ?transforms.rule_names(),
        "Host transformations configured"
    );

    let processor = ReportProcessor::new(
        Arc::new(fetcher),
        Arc::new(transforms),
        publisher,
        config.processor_config(),
    );

    let consumer = SingleTopicConsumer::new(config.kafka.clone(), config.consumer.clone())
        .context("failed to create Kafka consumer")?;
    info!(
        topic = %config.consumer.kafka_consumer_topic,
        group = %config.consumer.kafka_consumer_group,
        "Waiting for reports"
    );

    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = consumer.json_recv::<ReportDescription>() => received,
        };

        let (description, offset) = match received {
            Ok(received) => received,
            Err(RecvErr::Kafka(e)) => {
                error!("Error receiving from Kafka: {}", e);
                continue;
            }
            Err(e) => {
                warn!("Skipping unreadable report announcement: {}", e);
                continue;
            }
        };

        if handle_report(&processor, description, &shutdown).await {
            if let Err(e) = offset.store() {
                error!("Failed to store offset: {}", e);
            }
        }
    }

    info!("Shutting down");

    if let Some(publisher) = kafka_publisher {
        if let Err(e) = publisher.flush(FLUSH_TIMEOUT) {
            error!("Failed to flush producer: {}", e);
        }
    }
    if let Err(e) = server_task.await {
        error!("Health and metrics server task panicked: {}", e);
    }

    Ok(())
}

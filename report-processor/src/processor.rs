use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ProcessorConfig, PublishFailurePolicy};
use crate::context::{ReportDescription, RequestContext};
use crate::error::{ExtractError, ProcessError};
use crate::extract::{ReportSlice, SliceExtractor};
use crate::fetch::{download_report, ArchiveFetcher};
use crate::filter::{has_canonical_facts, HostFilter};
use crate::metrics_consts::{HOSTS_REJECTED, REPORTS_PROCESSED, REPORT_PROCESSING_SECONDS};
use crate::publish::Publisher;
use crate::transform::TransformChain;

/// Per-report counts, returned when a report completes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub slices_accepted: usize,
    pub slices_discarded: usize,
    pub hosts_total: usize,
    pub hosts_valid: usize,
    pub hosts_rejected: usize,
    pub hosts_published: usize,
    pub hosts_failed: usize,
}

/// Runs one report description through download, extraction, filtering,
/// transformation and publishing.
pub struct ReportProcessor {
    fetcher: Arc<dyn ArchiveFetcher>,
    extractor: SliceExtractor,
    filter: HostFilter,
    transforms: Arc<TransformChain>,
    publisher: Arc<dyn Publisher>,
    config: ProcessorConfig,
}

impl ReportProcessor {
    pub fn new(
        fetcher: Arc<dyn ArchiveFetcher>,
        transforms: Arc<TransformChain>,
        publisher: Arc<dyn Publisher>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor: SliceExtractor::new(config.max_hosts_per_slice),
            filter: HostFilter,
            transforms,
            publisher,
            config,
        }
    }

    pub async fn process(
        &self,
        description: &ReportDescription,
        shutdown: &CancellationToken,
    ) -> Result<ReportSummary, ProcessError> {
        let start = Instant::now();
        let result = self.process_inner(description, shutdown).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.label(),
        };
        counter!(REPORTS_PROCESSED, "result" => outcome).increment(1);
        histogram!(REPORT_PROCESSING_SECONDS).record(start.elapsed().as_secs_f64());

        result
    }

    async fn process_inner(
        &self,
        description: &ReportDescription,
        shutdown: &CancellationToken,
    ) -> Result<ReportSummary, ProcessError> {
        let ctx = RequestContext::from(description);
        ensure_running(shutdown)?;

        let archive = download_report(self.fetcher.as_ref(), description, &ctx).await?;
        ensure_running(shutdown)?;

        let extractor = self.extractor;
        let extract_ctx = ctx.clone();
        let report =
            tokio::task::spawn_blocking(move || extractor.extract(&archive, &extract_ctx))
                .await
                .map_err(ExtractError::Interrupted)??;

        let mut summary = ReportSummary {
            slices_accepted: report.slices.len(),
            slices_discarded: report.rejections.len(),
            ..Default::default()
        };

        for slice in report.slices {
            ensure_running(shutdown)?;
            self.process_slice(slice, &ctx, shutdown, &mut summary)
                .await?;
        }

        info!(
            account = %ctx.account,
            request_id = %ctx.request_id,
            "{}/{} hosts are valid.",
            summary.hosts_valid,
            summary.hosts_total
        );

        if summary.hosts_valid == 0 {
            error!(
                account = %ctx.account,
                request_id = %ctx.request_id,
                "Report does not contain any valid hosts."
            );
            return Err(ProcessError::NoValidHosts {
                account: ctx.account,
                request_id: ctx.request_id,
            });
        }

        Ok(summary)
    }

    async fn process_slice(
        &self,
        slice: ReportSlice,
        ctx: &RequestContext,
        shutdown: &CancellationToken,
        summary: &mut ReportSummary,
    ) -> Result<(), ProcessError> {
        let filtered = self.filter.filter_slice(slice, ctx);
        let report_slice_id = filtered.report_slice_id;
        let candidates = filtered.candidates.len();

        summary.hosts_total += filtered.total;
        summary.hosts_valid += candidates;
        summary.hosts_rejected += filtered.rejected.len();

        let mut count = 0;
        let mut stripped = 0;
        for mut host in filtered.candidates {
            ensure_running(shutdown)?;

            self.transforms.apply(&mut host, ctx);
            count += 1;

            // Normalization can strip the only identifying fact a host had
            if !has_canonical_facts(&host.facts) {
                warn!(
                    account = %ctx.account,
                    request_id = %ctx.request_id,
                    report_slice_id = %report_slice_id,
                    host_id = %host.host_id,
                    "Host has no canonical facts left after transformation. Skipping it."
                );
                counter!(HOSTS_REJECTED).increment(1);
                summary.hosts_valid -= 1;
                summary.hosts_rejected += 1;
                stripped += 1;
                continue;
            }

            match self.publisher.publish(&host, ctx).await {
                Ok(()) => summary.hosts_published += 1,
                Err(e) => match self.config.publish_failure_policy {
                    PublishFailurePolicy::Abort => return Err(e.into()),
                    PublishFailurePolicy::Continue => {
                        warn!(
                            account = %ctx.account,
                            request_id = %ctx.request_id,
                            report_slice_id = %report_slice_id,
                            "Skipping host after failed upload: {}",
                            e
                        );
                        summary.hosts_failed += 1;
                    }
                },
            }

            if count % self.config.progress_log_interval == 0 || count == candidates {
                info!(
                    account = %ctx.account,
                    request_id = %ctx.request_id,
                    report_slice_id = %report_slice_id,
                    "Sending {}/{} hosts to the inventory service.",
                    count,
                    candidates
                );
            }
        }

        info!(
            account = %ctx.account,
            request_id = %ctx.request_id,
            report_slice_id = %report_slice_id,
            "{}/{} hosts in slice are valid.",
            candidates - stripped,
            filtered.total
        );

        Ok(())
    }
}

fn ensure_running(shutdown: &CancellationToken) -> Result<(), ProcessError> {
    if shutdown.is_cancelled() {
        return Err(ProcessError::Cancelled);
    }
    Ok(())
}

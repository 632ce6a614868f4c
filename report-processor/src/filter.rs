use metrics::counter;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::extract::{Host, ReportSlice};
use crate::metrics_consts::{HOSTS_CANDIDATE, HOSTS_REJECTED};

/// Facts that identify a real machine. A host needs at least one of them to be
/// accepted by the inventory service.
pub const CANONICAL_FACTS: [&str; 7] = [
    "insights_client_id",
    "bios_uuid",
    "ip_addresses",
    "mac_addresses",
    "vm_uuid",
    "etc_machine_id",
    "subscription_manager_id",
];

pub const HOST_ID_KEY: &str = "yupana_host_id";
pub const REPORT_SLICE_ID_KEY: &str = "report_slice_id";

/// A host from a report, tagged with the id it is tracked by for the rest of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct HostRecord {
    pub host_id: String,
    pub report_slice_id: String,
    pub facts: Host,
}

#[derive(Debug, Default)]
pub struct FilteredSlice {
    pub report_slice_id: String,
    pub total: usize,
    pub candidates: Vec<HostRecord>,
    pub rejected: Vec<HostRecord>,
}

pub fn has_canonical_facts(host: &Host) -> bool {
    CANONICAL_FACTS
        .iter()
        .any(|fact| host.get(*fact).is_some_and(is_present))
}

// Null, empty strings, empty collections, false and zero all count as absent
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HostFilter;

impl HostFilter {
    /// Assign every host a fresh id and split the slice into hosts worth publishing
    /// and hosts with no identifying facts.
    pub fn filter_slice(&self, slice: ReportSlice, ctx: &RequestContext) -> FilteredSlice {
        let ReportSlice {
            report_slice_id,
            hosts,
            ..
        } = slice;

        let mut filtered = FilteredSlice {
            report_slice_id: report_slice_id.clone(),
            total: hosts.len(),
            ..Default::default()
        };

        for mut facts in hosts {
            let host_id = Uuid::new_v4().to_string();
            facts.insert(HOST_ID_KEY.to_string(), Value::String(host_id.clone()));

            if has_canonical_facts(&facts) {
                facts.insert(
                    REPORT_SLICE_ID_KEY.to_string(),
                    Value::String(report_slice_id.clone()),
                );
                filtered.candidates.push(HostRecord {
                    host_id,
                    report_slice_id: report_slice_id.clone(),
                    facts,
                });
            } else {
                filtered.rejected.push(HostRecord {
                    host_id,
                    report_slice_id: report_slice_id.clone(),
                    facts,
                });
            }
        }

        counter!(HOSTS_CANDIDATE).increment(filtered.candidates.len() as u64);
        counter!(HOSTS_REJECTED).increment(filtered.rejected.len() as u64);

        if !filtered.rejected.is_empty() {
            let rejected: Vec<&Host> = filtered.rejected.iter().map(|h| &h.facts).collect();
            warn!(
                account = %ctx.account,
                request_id = %ctx.request_id,
                report_slice_id = %filtered.report_slice_id,
                "{} host(s) found that contain(s) 0 canonical facts: {:?}.",
                filtered.rejected.len(),
                rejected
            );
        }

        filtered
    }
}

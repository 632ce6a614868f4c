use metrics::counter;
use tracing::info;

use crate::context::RequestContext;
use crate::extract::Host;
use crate::filter::HostRecord;
use crate::metrics_consts::HOSTS_TRANSFORMED;

pub mod rules;

/// What the rules did to one host. Only used for logging.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransformOutcome {
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub missing_data: Vec<String>,
}

impl TransformOutcome {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.modified.is_empty() && self.missing_data.is_empty()
    }

    fn log_sections(&self) -> String {
        [
            ("removed", &self.removed),
            ("modified", &self.modified),
            ("missing_data", &self.missing_data),
        ]
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(name, values)| format!("{}: {}", name, values.join(",")))
        .collect::<Vec<_>>()
        .join("\n")
    }
}

pub trait TransformRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, host: &mut Host, outcome: &mut TransformOutcome, ctx: &RequestContext);
}

/// Ordered set of rules run against every candidate host before it is published.
/// Read-only once built, so one chain can be shared between concurrent reports.
pub struct TransformChain {
    enabled: bool,
    rules: Vec<Box<dyn TransformRule>>,
}

impl TransformChain {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            rules: Vec::new(),
        }
    }

    /// The rules every report goes through, in the order they run.
    pub fn with_default_rules(enabled: bool) -> Self {
        Self::new(enabled)
            .with_rule(rules::RemoveEmptyIpAddresses)
            .with_rule(rules::NormalizeMacAddresses)
            .with_rule(rules::RemoveNullFacts)
            .with_rule(rules::MissingOperatingSystem)
    }

    pub fn with_rule(mut self, rule: impl TransformRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn apply(&self, host: &mut HostRecord, ctx: &RequestContext) -> TransformOutcome {
        let mut outcome = TransformOutcome::default();
        if !self.enabled {
            return outcome;
        }

        for rule in &self.rules {
            rule.apply(&mut host.facts, &mut outcome, ctx);
        }

        if !outcome.is_empty() {
            counter!(HOSTS_TRANSFORMED).increment(1);
            info!(
                account = %ctx.account,
                request_id = %ctx.request_id,
                host_id = %host.host_id,
                "Transformed details host with id {}. {}",
                host.host_id,
                outcome.log_sections()
            );
        }

        outcome
    }
}

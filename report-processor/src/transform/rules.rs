use serde_json::Value;

use super::{TransformOutcome, TransformRule};
use crate::context::RequestContext;
use crate::extract::Host;

const ZERO_MAC_ADDRESS: &str = "00:00:00:00:00:00";

pub struct RemoveEmptyIpAddresses;

impl TransformRule for RemoveEmptyIpAddresses {
    fn name(&self) -> &'static str {
        "remove_empty_ip_addresses"
    }

    fn apply(&self, host: &mut Host, outcome: &mut TransformOutcome, _: &RequestContext) {
        let is_empty = matches!(host.get("ip_addresses"), Some(Value::Array(ips)) if ips.is_empty());
        if is_empty {
            host.remove("ip_addresses");
            outcome.removed.push("ip_addresses".to_string());
        }
    }
}

/// Lower-cases mac addresses, drops duplicates and the all-zero address.
pub struct NormalizeMacAddresses;

impl TransformRule for NormalizeMacAddresses {
    fn name(&self) -> &'static str {
        "normalize_mac_addresses"
    }

    fn apply(&self, host: &mut Host, outcome: &mut TransformOutcome, _: &RequestContext) {
        let Some(Value::Array(macs)) = host.get("mac_addresses") else {
            return;
        };

        let mut normalized: Vec<Value> = Vec::with_capacity(macs.len());
        for mac in macs {
            let Some(mac) = mac.as_str() else {
                continue;
            };
            let mac = Value::String(mac.to_ascii_lowercase());
            if mac != ZERO_MAC_ADDRESS && !normalized.contains(&mac) {
                normalized.push(mac);
            }
        }

        if normalized.is_empty() {
            host.remove("mac_addresses");
            outcome.removed.push("mac_addresses".to_string());
        } else if &normalized != macs {
            host.insert("mac_addresses".to_string(), Value::Array(normalized));
            outcome.modified.push("mac_addresses".to_string());
        }
    }
}

/// Drops facts reported as null.
pub struct RemoveNullFacts;

impl TransformRule for RemoveNullFacts {
    fn name(&self) -> &'static str {
        "remove_null_facts"
    }

    fn apply(&self, host: &mut Host, outcome: &mut TransformOutcome, _: &RequestContext) {
        let mut nulls: Vec<String> = host
            .iter()
            .filter(|(_, value)| value.is_null())
            .map(|(key, _)| key.clone())
            .collect();
        nulls.sort();

        for key in nulls {
            host.remove(&key);
            outcome.removed.push(key);
        }
    }
}

/// Notes hosts that carry no operating system information. Never mutates.
pub struct MissingOperatingSystem;

impl TransformRule for MissingOperatingSystem {
    fn name(&self) -> &'static str {
        "missing_operating_system"
    }

    fn apply(&self, host: &mut Host, outcome: &mut TransformOutcome, _: &RequestContext) {
        let has_os = host
            .get("os_release")
            .and_then(Value::as_str)
            .is_some_and(|os| !os.is_empty());
        if !has_os {
            outcome.missing_data.push("os_release".to_string());
        }
    }
}

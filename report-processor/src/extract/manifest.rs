use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::context::RequestContext;
use crate::error::ExtractError;

const REQUIRED_KEYS: [&str; 4] = [
    "report_id",
    "host_inventory_api_version",
    "source",
    "report_slices",
];

/// The archive's `metadata.json`: which slices the report is made of, and how many
/// hosts each one declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub report_id: String,
    pub source: String,
    /// Slice id to declared host count, iterated in id order.
    pub slices: BTreeMap<String, usize>,
}

pub fn parse_manifest(
    raw: &[u8],
    ctx: &RequestContext,
    max_hosts_per_slice: usize,
) -> Result<Manifest, ExtractError> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| ExtractError::InvalidManifest(format!("not valid UTF-8: {e}")))?;
    let document: Value = serde_json::from_str(text)
        .map_err(|e| ExtractError::InvalidManifest(format!("not valid JSON: {e}")))?;

    let Value::Object(document) = document else {
        return Err(ExtractError::InvalidManifest(
            "expected a JSON object".to_string(),
        ));
    };

    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| !document.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(ExtractError::InvalidManifest(format!(
            "missing required keys: {}",
            missing.join(", ")
        )));
    }

    let Some(report_slices) = document["report_slices"].as_object() else {
        return Err(ExtractError::InvalidManifest(
            "report_slices must be an object".to_string(),
        ));
    };

    let mut slices = BTreeMap::new();
    for (slice_id, slice) in report_slices {
        let number_hosts = slice
            .get("number_hosts")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                ExtractError::InvalidManifest(format!(
                    "report slice {slice_id} has no integer number_hosts"
                ))
            })?;
        let number_hosts = number_hosts as usize;

        if number_hosts > max_hosts_per_slice {
            warn!(
                account = %ctx.account,
                request_id = %ctx.request_id,
                "Report slice {} declares {} hosts, more than the maximum of {}. Discarding it.",
                slice_id,
                number_hosts,
                max_hosts_per_slice
            );
            continue;
        }

        slices.insert(slice_id.clone(), number_hosts);
    }

    Ok(Manifest {
        report_id: stringify(&document["report_id"]),
        source: stringify(&document["source"]),
        slices,
    })
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Manifest, ExtractError> {
        parse_manifest(raw.as_bytes(), &RequestContext::default(), 10)
    }

    #[test]
    fn test_valid_manifest() {
        let manifest = parse(
            r#"{
                "report_id": "r1",
                "host_inventory_api_version": "1.0",
                "source": "satellite",
                "source_metadata": {"any": "thing"},
                "report_slices": {
                    "b": {"number_hosts": 2},
                    "a": {"number_hosts": 0}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.report_id, "r1");
        assert_eq!(manifest.source, "satellite");
        let ids: Vec<_> = manifest.slices.keys().cloned().collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(manifest.slices["b"], 2);
    }

    #[test]
    fn test_missing_keys() {
        let err = parse(r#"{"report_id": "r1", "report_slices": {}}"#).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("host_inventory_api_version"), "{message}");
        assert!(message.contains("source"), "{message}");
    }

    #[test]
    fn test_structural_errors() {
        assert!(parse("[1, 2]").is_err());
        assert!(parse("{not json").is_err());
        assert!(parse(
            r#"{"report_id": "r", "host_inventory_api_version": "1", "source": "s",
                "report_slices": []}"#
        )
        .is_err());
        assert!(parse(
            r#"{"report_id": "r", "host_inventory_api_version": "1", "source": "s",
                "report_slices": {"a": {"number_hosts": "two"}}}"#
        )
        .is_err());
        assert!(matches!(
            parse_manifest(&[0xff, 0xfe], &RequestContext::default(), 10),
            Err(ExtractError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_oversized_slices_are_dropped() {
        let manifest = parse(
            r#"{"report_id": "r", "host_inventory_api_version": "1", "source": "s",
                "report_slices": {"small": {"number_hosts": 10}, "big": {"number_hosts": 11}}}"#,
        )
        .unwrap();

        assert_eq!(manifest.slices.len(), 1);
        assert!(manifest.slices.contains_key("small"));
    }
}

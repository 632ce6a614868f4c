use std::fmt;
use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use metrics::counter;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::context::RequestContext;
use crate::error::ExtractError;
use crate::metrics_consts::{REPORT_FILES_UNDECODABLE, SLICES_ACCEPTED, SLICES_DISCARDED};

pub mod manifest;

use manifest::parse_manifest;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const MANIFEST_NAME: &str = "metadata.json";

/// One host's facts, exactly as found in the report.
pub type Host = Map<String, Value>;

/// A report file that passed the manifest cross-check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportSlice {
    pub report_slice_id: String,
    pub hosts: Vec<Host>,
    /// Any other top-level fields of the file, carried through untouched.
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    Undecodable(String),
    Malformed(String),
    SliceIdMismatch { expected: String, found: String },
    HostCountMismatch { declared: usize, found: usize },
}

impl RejectionReason {
    pub fn label(&self) -> &'static str {
        match self {
            RejectionReason::Undecodable(_) => "undecodable",
            RejectionReason::Malformed(_) => "malformed",
            RejectionReason::SliceIdMismatch { .. } => "slice_id_mismatch",
            RejectionReason::HostCountMismatch { .. } => "host_count_mismatch",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Undecodable(cause) => write!(f, "file is not valid UTF-8: {cause}"),
            RejectionReason::Malformed(cause) => write!(f, "report slice is malformed: {cause}"),
            RejectionReason::SliceIdMismatch { expected, found } => write!(
                f,
                "metadata & filename reported the \"report_slice_id\" as {expected} but the \"report_slice_id\" inside the JSON has a value of {found}"
            ),
            RejectionReason::HostCountMismatch { declared, found } => write!(
                f,
                "metadata reported {declared} hosts but report contains {found} hosts"
            ),
        }
    }
}

/// A report file that matched a manifest slice but was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceRejection {
    pub report_slice_id: String,
    pub entry_name: String,
    pub reasons: Vec<RejectionReason>,
}

#[derive(Debug, Default)]
pub struct ExtractedReport {
    pub report_id: String,
    pub slices: Vec<ReportSlice>,
    pub rejections: Vec<SliceRejection>,
}

struct ArchiveEntry {
    name: String,
    data: Vec<u8>,
}

/// Reads a report tarball and cross-checks every report file against the manifest.
/// All of it is synchronous, so async callers should run it on the blocking pool.
#[derive(Debug, Clone, Copy)]
pub struct SliceExtractor {
    max_hosts_per_slice: usize,
}

impl SliceExtractor {
    pub fn new(max_hosts_per_slice: usize) -> Self {
        Self {
            max_hosts_per_slice,
        }
    }

    pub fn extract(
        &self,
        archive: &[u8],
        ctx: &RequestContext,
    ) -> Result<ExtractedReport, ExtractError> {
        let entries = read_entries(archive)?;

        let mut manifest_entry = None;
        let mut report_files = Vec::new();
        for entry in entries {
            if is_manifest(&entry.name) {
                manifest_entry = Some(entry);
            } else if entry.name.contains(".json") {
                report_files.push(entry);
            }
        }

        let manifest_entry = match manifest_entry {
            Some(entry) if !report_files.is_empty() => entry,
            manifest_entry => {
                return Err(ExtractError::MissingEntries {
                    has_manifest: manifest_entry.is_some(),
                    data_entries: report_files.len(),
                })
            }
        };

        let manifest = parse_manifest(&manifest_entry.data, ctx, self.max_hosts_per_slice)?;
        debug!(
            report_id = %manifest.report_id,
            source = %manifest.source,
            "Found {} report slices in metadata",
            manifest.slices.len()
        );

        let mut report = ExtractedReport {
            report_id: manifest.report_id.clone(),
            ..Default::default()
        };
        let mut matched_any = false;

        for (slice_id, &declared_hosts) in &manifest.slices {
            for entry in report_files
                .iter()
                .filter(|entry| entry.name.contains(slice_id.as_str()))
            {
                matched_any = true;
                match check_report_file(entry, slice_id, declared_hosts, ctx)? {
                    Ok(slice) => {
                        counter!(SLICES_ACCEPTED).increment(1);
                        report.slices.push(slice);
                    }
                    Err(rejection) => {
                        for reason in &rejection.reasons {
                            counter!(SLICES_DISCARDED, "reason" => reason.label()).increment(1);
                        }
                        report.rejections.push(rejection);
                    }
                }
            }
        }

        if !matched_any {
            return Err(ExtractError::NoMatchingSlices);
        }

        Ok(report)
    }
}

fn is_manifest(name: &str) -> bool {
    name == MANIFEST_NAME || name.contains(&format!("/{MANIFEST_NAME}"))
}

// Opens plain or gzip-compressed tarballs and reads every regular file into memory
fn read_entries(archive: &[u8]) -> Result<Vec<ArchiveEntry>, ExtractError> {
    let reader: Box<dyn Read + '_> = if archive.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(archive))
    } else {
        Box::new(Cursor::new(archive))
    };

    let mut tar = tar::Archive::new(reader);
    let mut entries = Vec::new();
    for entry in tar.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry.path()?.to_string_lossy().into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        entries.push(ArchiveEntry { name, data });
    }

    Ok(entries)
}

// The outer error is fatal for the whole report, the inner one only discards this file
fn check_report_file(
    entry: &ArchiveEntry,
    slice_id: &str,
    declared_hosts: usize,
    ctx: &RequestContext,
) -> Result<Result<ReportSlice, SliceRejection>, ExtractError> {
    let reject = |reasons| SliceRejection {
        report_slice_id: slice_id.to_owned(),
        entry_name: entry.name.clone(),
        reasons,
    };

    info!(
        account = %ctx.account,
        request_id = %ctx.request_id,
        "Attempting to decode the file {}",
        entry.name
    );
    let text = match std::str::from_utf8(&entry.data) {
        Ok(text) => text,
        Err(e) => {
            error!(
                account = %ctx.account,
                request_id = %ctx.request_id,
                "Attempting to decode the file {} resulted in the following error: {}. Discarding file.",
                entry.name,
                e
            );
            counter!(REPORT_FILES_UNDECODABLE).increment(1);
            return Ok(Err(reject(vec![RejectionReason::Undecodable(e.to_string())])));
        }
    };
    info!(
        account = %ctx.account,
        request_id = %ctx.request_id,
        "Successfully decoded the file {}",
        entry.name
    );

    let document: Value =
        serde_json::from_str(text).map_err(|source| ExtractError::InvalidJson {
            entry: entry.name.clone(),
            source,
        })?;

    let (found_id, hosts, extra) = match split_slice_document(document) {
        Ok(parts) => parts,
        Err(reason) => {
            warn!(
                account = %ctx.account,
                request_id = %ctx.request_id,
                report_slice_id = %slice_id,
                "{}. Discarding the report slice as invalid.",
                reason
            );
            return Ok(Err(reject(vec![reason])));
        }
    };

    let mut reasons = Vec::new();
    let report_slice_id = match found_id {
        Some(Value::String(id)) if id == slice_id => id,
        found => {
            reasons.push(RejectionReason::SliceIdMismatch {
                expected: slice_id.to_owned(),
                found: match found {
                    Some(Value::String(id)) => id,
                    Some(other) => other.to_string(),
                    None => String::new(),
                },
            });
            String::new()
        }
    };
    if hosts.len() != declared_hosts {
        reasons.push(RejectionReason::HostCountMismatch {
            declared: declared_hosts,
            found: hosts.len(),
        });
    }

    if !reasons.is_empty() {
        let details: Vec<String> = reasons.iter().map(ToString::to_string).collect();
        warn!(
            account = %ctx.account,
            request_id = %ctx.request_id,
            report_slice_id = %slice_id,
            "{}. Metadata must match report slice data. Discarding the report slice as invalid.",
            details.join(". ")
        );
        return Ok(Err(reject(reasons)));
    }

    Ok(Ok(ReportSlice {
        report_slice_id,
        hosts,
        extra,
    }))
}

type SliceParts = (Option<Value>, Vec<Host>, Map<String, Value>);

// Only the id and the hosts are interpreted; the id is returned as found so any
// non-string value ends up as a mismatch rather than an error
fn split_slice_document(document: Value) -> Result<SliceParts, RejectionReason> {
    let Value::Object(mut fields) = document else {
        return Err(RejectionReason::Malformed(
            "expected a JSON object".to_string(),
        ));
    };

    let found_id = fields.remove("report_slice_id");
    let hosts = match fields.remove("hosts") {
        None => Vec::new(),
        Some(Value::Array(hosts)) => hosts
            .into_iter()
            .map(|host| match host {
                Value::Object(host) => Ok(host),
                other => Err(RejectionReason::Malformed(format!(
                    "host entry {other} is not an object"
                ))),
            })
            .collect::<Result<Vec<Host>, _>>()?,
        Some(_) => {
            return Err(RejectionReason::Malformed(
                "hosts must be a list".to_string(),
            ))
        }
    };

    Ok((found_id, hosts, fields))
}

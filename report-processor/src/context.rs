use serde::{Deserialize, Serialize};

/// A report announcement as delivered on the upload topic.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportDescription {
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub b64_identity: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Identifies the report being processed. Passed to every stage so log lines and
/// errors can be tied back to the originating upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub account: String,
    pub b64_identity: String,
    pub request_id: String,
}

impl From<&ReportDescription> for RequestContext {
    fn from(description: &ReportDescription) -> Self {
        Self {
            account: description.account.clone().unwrap_or_default(),
            b64_identity: description.b64_identity.clone().unwrap_or_default(),
            request_id: description.request_id.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_tolerates_missing_and_null_fields() {
        let description: ReportDescription =
            serde_json::from_str(r#"{"account": null, "request_id": "abc", "extra": 1}"#)
                .unwrap();

        assert!(description.url.is_none());
        let ctx = RequestContext::from(&description);
        assert_eq!(ctx.account, "");
        assert_eq!(ctx.request_id, "abc");
        assert_eq!(ctx.b64_identity, "");
    }
}

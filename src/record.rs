use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

/// Tag used for records whose classification is non-malicious.
pub const BENIGN: &str = "benign";

/// Bucket for records missing a required grouping field.
pub const UNKNOWN: &str = "unknown";

/// One analyzed URL from the record store. Written once by ingestion,
/// immutable afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct UrlRecord {
    pub url: String,
    pub domain: String,
    pub tld: Option<String>,
    pub classification: Option<String>,
    pub url_length: Option<u32>,
    pub num_subdomains: u32,
    pub has_https: bool,
    pub threat_score: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl UrlRecord {
    pub fn classification_or_unknown(&self) -> &str {
        match self.classification.as_deref() {
            Some(tag) if !tag.is_empty() => tag,
            _ => UNKNOWN,
        }
    }

    pub fn tld_or_unknown(&self) -> &str {
        match self.tld.as_deref() {
            Some(tld) if !tld.is_empty() => tld,
            _ => UNKNOWN,
        }
    }

    /// A record is malicious unless explicitly tagged benign. Untagged
    /// records count as malicious, matching the ingestion contract.
    pub fn is_malicious(&self) -> bool {
        self.classification.as_deref() != Some(BENIGN)
    }
}

/// Derives the host from a raw URL for records whose domain column was
/// left empty by ingestion.
pub fn derive_domain(raw_url: &str) -> Option<String> {
    let parsed = Url::parse(raw_url).ok()?;
    parsed.host_str().map(|host| host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(classification: Option<&str>) -> UrlRecord {
        UrlRecord {
            url: "http://example.com/a".to_string(),
            domain: "example.com".to_string(),
            tld: None,
            classification: classification.map(|s| s.to_string()),
            url_length: None,
            num_subdomains: 0,
            has_https: false,
            threat_score: None,
            timestamp: None,
        }
    }

    #[test]
    fn benign_is_not_malicious() {
        assert!(!record(Some("benign")).is_malicious());
        assert!(record(Some("phishing")).is_malicious());
    }

    #[test]
    fn missing_classification_is_malicious_and_unknown() {
        let r = record(None);
        assert!(r.is_malicious());
        assert_eq!(r.classification_or_unknown(), UNKNOWN);
    }

    #[test]
    fn derive_domain_from_url() {
        assert_eq!(
            derive_domain("https://sub.example.com/login").as_deref(),
            Some("sub.example.com")
        );
        assert_eq!(derive_domain("not a url"), None);
    }
}

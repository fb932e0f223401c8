//! Connectivity probing via public IP attribution
//!
//! Whether traffic currently routes through the institution's network is
//! inferred from the `org` field the IP-info service reports for our public
//! address. The `hostname` field is reported but never used for detection.

use crate::config::RunConfig;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

const LIVENESS_TIMEOUT: Duration = Duration::from_secs(3);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("No internet connection")]
    NetworkUnavailable,
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Empty response from {0}")]
    EmptyResponse(String),
    #[error("Failed to parse response from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Public IP attribution as reported by the IP-info service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicInfo {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub org: String,
    /// Remaining fields (city, region, country, ...) shown by `details`
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PublicInfo {
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

impl fmt::Display for PublicInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ip={}, hostname='{}', org='{}'",
            self.ip, self.hostname, self.org
        )
    }
}

/// Returns true when `org` names the institution's autonomous system
pub fn is_connected(info: &PublicInfo, as_identifier: &str) -> bool {
    info.org.contains(as_identifier)
}

#[allow(async_fn_in_trait)]
pub trait Prober {
    /// Cheap reachability check run before any probe
    async fn is_online(&self) -> bool;

    /// Fetch the current public IP attribution
    async fn probe(&self) -> Result<PublicInfo, ProbeError>;
}

/// Prober backed by an ipinfo.io style JSON endpoint
pub struct IpInfoProber {
    client: Client,
    url: String,
    liveness_host: String,
}

impl IpInfoProber {
    pub fn new(url: String, liveness_host: String) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|source| ProbeError::Http {
                url: url.clone(),
                source,
            })?;

        Ok(Self {
            client,
            url,
            liveness_host,
        })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self, ProbeError> {
        Self::new(config.ipinfo_url.clone(), config.liveness_host.clone())
    }
}

impl Prober for IpInfoProber {
    async fn is_online(&self) -> bool {
        debug!("Checking internet connectivity via {}", self.liveness_host);
        match tokio::time::timeout(LIVENESS_TIMEOUT, TcpStream::connect(&self.liveness_host)).await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Liveness check failed: {}", e);
                false
            }
            Err(_) => {
                debug!("Liveness check timed out");
                false
            }
        }
    }

    async fn probe(&self) -> Result<PublicInfo, ProbeError> {
        debug!("Querying {}", self.url);

        let http_error = |source| ProbeError::Http {
            url: self.url.clone(),
            source,
        };
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(http_error)?;
        let body = response.text().await.map_err(http_error)?;
        debug!("IP info response: {}", body.trim());

        if body.trim().is_empty() {
            return Err(ProbeError::EmptyResponse(self.url.clone()));
        }

        let info = PublicInfo::parse(&body).map_err(|source| ProbeError::Parse {
            url: self.url.clone(),
            source,
        })?;
        if info.ip.is_empty() {
            return Err(ProbeError::EmptyResponse(self.url.clone()));
        }

        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with_org(org: &str) -> PublicInfo {
        PublicInfo {
            ip: "128.218.42.1".to_string(),
            org: org.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_connected_for_institution_org() {
        let info = info_with_org("AS5653 University of California San Francisco");
        assert!(is_connected(&info, "AS5653"));
    }

    #[test]
    fn test_not_connected_for_other_org() {
        let info = info_with_org("AS12345 Example Organization");
        assert!(!is_connected(&info, "AS5653"));
    }

    #[test]
    fn test_any_org_containing_identifier_is_connected() {
        for org in ["AS5653", "prefix AS5653 suffix", "xAS5653y"] {
            assert!(is_connected(&info_with_org(org), "AS5653"), "{}", org);
        }
        for org in ["", "AS565", "as5653 lowercase", "AS 5653"] {
            assert!(!is_connected(&info_with_org(org), "AS5653"), "{}", org);
        }
    }

    #[test]
    fn test_hostname_ignored() {
        let info = PublicInfo {
            ip: "1.2.3.4".to_string(),
            hostname: "host.ucsf.edu".to_string(),
            org: "AS7922 Comcast Cable Communications, LLC".to_string(),
            ..Default::default()
        };
        assert!(!is_connected(&info, "AS5653"));
    }

    #[test]
    fn test_parse_ipinfo_response() {
        let body = r#"{
            "ip": "128.218.43.27",
            "hostname": "example.ucsf.edu",
            "city": "San Francisco",
            "region": "California",
            "country": "US",
            "org": "AS5653 University of California San Francisco"
        }"#;

        let info = PublicInfo::parse(body).unwrap();
        assert_eq!(info.ip, "128.218.43.27");
        assert_eq!(info.hostname, "example.ucsf.edu");
        assert_eq!(info.org, "AS5653 University of California San Francisco");
        assert_eq!(info.extra.get("city"), Some(&Value::from("San Francisco")));
        assert!(!info.extra.contains_key("ip"));
    }

    #[test]
    fn test_parse_without_hostname() {
        let info = PublicInfo::parse(r#"{"ip": "1.2.3.4", "org": "AS1 Foo"}"#).unwrap();
        assert!(info.hostname.is_empty());
        assert_eq!(info.org, "AS1 Foo");
    }

    #[test]
    fn test_parse_without_ip() {
        let info = PublicInfo::parse(r#"{"org": "AS1 Foo"}"#).unwrap();
        assert!(info.ip.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(PublicInfo::parse("<html>rate limited</html>").is_err());
    }

    #[test]
    fn test_display() {
        let info = info_with_org("AS5653 University of California San Francisco");
        assert_eq!(
            info.to_string(),
            "ip=128.218.42.1, hostname='', org='AS5653 University of California San Francisco'"
        );
    }
}

//! Client for the remote marketplace's purchase-verification endpoint.
//!
//! The marketplace is a fallback, not an authority we depend on per request:
//! transport failures, non-2xx answers and malformed bodies all collapse to
//! [`RemoteLookup::Unverifiable`] here so callers never confuse "could not
//! check" with "checked and invalid". Only an explicit 404 means the code
//! does not exist.

use std::time::Duration;

use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// A confirmed sale as reported by the marketplace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSale {
    pub item: RemoteItem,
    #[serde(default)]
    pub amount_cents: Option<i64>,
    /// ISO-8601 end of the support window, when the marketplace reports one
    #[serde(default)]
    pub supported_until: Option<String>,
    #[serde(default)]
    pub buyer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl RemoteSale {
    pub fn supported_until_ts(&self) -> Option<i64> {
        self.supported_until
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp())
    }
}

/// Tagged result of a remote lookup. `NotFound` is an affirmative negative;
/// `Unverifiable` means validity is unknown.
#[derive(Debug)]
pub enum RemoteLookup {
    Sale(RemoteSale),
    NotFound,
    Unverifiable(String),
}

#[derive(Debug, Clone)]
pub struct MarketplaceClient {
    client: Client,
    base_url: String,
    token: String,
}

impl MarketplaceClient {
    /// Build a client with a bounded request timeout. Constructed once at
    /// startup; a broken TLS backend is unrecoverable, so this panics there.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build marketplace HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Ask the marketplace whether `raw_code` is a real sale.
    ///
    /// The code is sent exactly as the buyer presented it (trimmed only) —
    /// the marketplace owns its own format.
    pub async fn verify_purchase(&self, raw_code: &str, domain: Option<&str>) -> RemoteLookup {
        let mut request = self
            .client
            .get(format!("{}/sales/verify", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("code", raw_code)]);
        if let Some(domain) = domain {
            request = request.query(&[("domain", domain)]);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return RemoteLookup::Unverifiable("marketplace request timed out".into());
            }
            Err(err) => {
                return RemoteLookup::Unverifiable(format!("marketplace request failed: {}", err));
            }
        };

        match response.status() {
            status if status.is_success() => match response.json::<RemoteSale>().await {
                Ok(sale) if !sale.item.id.is_empty() => RemoteLookup::Sale(sale),
                Ok(_) => RemoteLookup::Unverifiable("marketplace response missing item id".into()),
                Err(err) => {
                    RemoteLookup::Unverifiable(format!("malformed marketplace response: {}", err))
                }
            },
            StatusCode::NOT_FOUND => RemoteLookup::NotFound,
            status => RemoteLookup::Unverifiable(format!("marketplace returned {}", status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_until_parsing() {
        let sale = RemoteSale {
            item: RemoteItem {
                id: "42".into(),
                name: None,
            },
            amount_cents: None,
            supported_until: Some("2030-01-01T00:00:00+00:00".into()),
            buyer: None,
        };
        assert_eq!(sale.supported_until_ts(), Some(1893456000));

        let no_date = RemoteSale {
            supported_until: None,
            ..sale.clone()
        };
        assert_eq!(no_date.supported_until_ts(), None);

        let garbage = RemoteSale {
            supported_until: Some("next tuesday".into()),
            ..sale
        };
        assert_eq!(garbage.supported_until_ts(), None);
    }
}

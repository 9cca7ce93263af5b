use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Lowest poll interval a target may run at.
pub const MIN_CHECK_INTERVAL_SECS: u64 = 10;

pub const UNKNOWN_PRODUCT: &str = "Unknown Product";
pub const PRICE_NOT_AVAILABLE: &str = "Price N/A";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    #[default]
    Stopped,
    Running,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetStats {
    pub alerts_sent: u64,
    pub last_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorTarget {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub urls: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub negative_keywords: Vec<String>,
    /// Seconds between checks; 0 means "use the configured default".
    #[serde(default)]
    pub check_interval: u64,
    #[serde(default)]
    pub state: TargetState,
    #[serde(default)]
    pub stats: TargetStats,
}

impl MonitorTarget {
    pub fn effective_interval_secs(&self) -> u64 {
        self.check_interval.max(MIN_CHECK_INTERVAL_SECS)
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Include/exclude keyword gate applied to an extracted product name.
    ///
    /// A blank include list (empty, or a first entry that is empty) admits
    /// every name. Any exclude hit rejects regardless of includes.
    pub fn admits(&self, product_name: &str) -> bool {
        let name = product_name.to_lowercase();

        let has_includes = self
            .keywords
            .first()
            .is_some_and(|first| !first.trim().is_empty());
        if has_includes {
            let matched = self
                .keywords
                .iter()
                .filter(|kw| !kw.trim().is_empty())
                .any(|kw| name.contains(&kw.trim().to_lowercase()));
            if !matched {
                return false;
            }
        }

        !self
            .negative_keywords
            .iter()
            .filter(|kw| !kw.trim().is_empty())
            .any(|kw| name.contains(&kw.trim().to_lowercase()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockSnapshot {
    pub in_stock: bool,
    pub product_name: String,
    pub price: String,
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StockSnapshot {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            in_stock: false,
            product_name: UNKNOWN_PRODUCT.to_owned(),
            price: String::new(),
            image_url: String::new(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    InStock,
    Notified,
    OutOfStock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub product_name: String,
    pub product_url: String,
    pub product_image: String,
    pub store_name: String,
    pub price: String,
    pub status: AlertStatus,
    pub target_id: String,
    pub created_at: DateTime<Utc>,
}

/// Host of `url` without a leading `www.`; falls back to the raw input.
pub fn store_name(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => host.strip_prefix("www.").unwrap_or(host).to_owned(),
            None => url.to_owned(),
        },
        Err(_) => url.to_owned(),
    }
}

//! The aggregate record handed from the extractor to the notifier.
//!
//! Every metric group is stored under its name as arbitrary JSON. The extractor
//! fills the warehouse groups, the notifier adds the engagement groups and
//! renders the result.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DAILY: &str = "daily";
pub const CHURN: &str = "churn";
pub const COUPONS: &str = "coupons";
pub const SIGNUP_BY_COUPON: &str = "signup_by_coupon";
pub const PENDO_FEATURES: &str = "pendo_features";
pub const PENDO_PAGES: &str = "pendo_pages";

/// Groups produced by the extractor, in query order.
pub const WAREHOUSE_GROUPS: [&str; 4] = [DAILY, CHURN, COUPONS, SIGNUP_BY_COUPON];

/// Groups added by the notifier before rendering.
pub const ENGAGEMENT_GROUPS: [&str; 2] = [PENDO_FEATURES, PENDO_PAGES];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("aggregate record is missing metric group '{group}'")]
pub struct MissingGroup {
    pub group: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsAggregate(Map<String, Value>);

impl MetricsAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `group`, replacing anything stored there before.
    pub fn insert(&mut self, group: impl Into<String>, value: Value) {
        self.0.insert(group.into(), value);
    }

    pub fn get(&self, group: &str) -> Option<&Value> {
        self.0.get(group)
    }

    pub fn require(&self, group: &str) -> Result<&Value, MissingGroup> {
        self.0.get(group).ok_or_else(|| MissingGroup {
            group: group.to_string(),
        })
    }

    /// Fails on the first group in `groups` that is absent.
    pub fn require_all(&self, groups: &[&str]) -> Result<(), MissingGroup> {
        for group in groups {
            self.require(group)?;
        }
        Ok(())
    }

    /// Groups present in the record that are not listed in `expected`, in key order.
    pub fn unexpected_groups(&self, expected: &[&str]) -> Vec<&str> {
        self.groups()
            .filter(|group| !expected.contains(group))
            .collect()
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for MetricsAggregate {
    fn from(map: Map<String, Value>) -> Self {
        MetricsAggregate(map)
    }
}

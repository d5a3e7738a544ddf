//! Running tallies and derived priority for canonical issue and suggestion
//! clusters.
//!
//! A cluster's severity (or importance) and category are never stored; they
//! are recomputed from the label tallies each time the cluster changes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label to occurrence count. Stored as a JSON object.
pub type Tally = BTreeMap<String, i32>;

/// Majority label used when a severity/importance tally has no winner.
pub const DEFAULT_LABEL: &str = "LOW";

/// Majority category used when a category tally has no winner.
pub const DEFAULT_CATEGORY: &str = "UNKNOWN";

/// Returns the label with the highest count.
///
/// Ties go to the lexicographically greatest label. The search starts from
/// `(default, 0)`, so a tally whose counts are all zero yields `default`
/// unless a tied label sorts after it.
#[must_use]
pub fn majority_label<'a>(tally: &'a Tally, default: &'a str) -> &'a str {
    let mut major = default;
    let mut max_count = 0;
    for (label, &count) in tally {
        if count > max_count || (count == max_count && label.as_str() > major) {
            major = label.as_str();
            max_count = count;
        }
    }
    major
}

/// Ordinal weight of a severity or importance label. Unknown labels weigh 0.
#[must_use]
pub fn label_weight(label: &str) -> i32 {
    match label {
        "CRITICAL" => 4,
        "HIGH" => 3,
        "MEDIUM" => 2,
        "LOW" => 1,
        _ => 0,
    }
}

/// `weight(majority label) * customers`.
#[must_use]
pub fn compute_priority(labels: &Tally, customers: i32) -> i32 {
    label_weight(majority_label(labels, DEFAULT_LABEL)) * customers
}

/// What one candidate fragment adds to a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    /// Source of the feedback the fragment was extracted from.
    pub source: String,
    /// Severity (issues) or importance (suggestions).
    pub label: String,
    pub category: String,
    pub release: String,
    pub posted_at: DateTime<Utc>,
}

/// Aggregate statistics of a canonical cluster.
///
/// `customers` always equals the sum of every tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub sources: Tally,
    pub labels: Tally,
    pub categories: Tally,
    pub releases: Tally,
    pub customers: i32,
    pub priority: i32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_aggregated_at: Option<DateTime<Utc>>,
}

impl ClusterStats {
    /// Statistics of a brand-new cluster holding a single contribution.
    #[must_use]
    pub fn seed(contribution: &Contribution) -> Self {
        let labels = Tally::from([(contribution.label.clone(), 1)]);
        let priority = compute_priority(&labels, 1);
        Self {
            sources: Tally::from([(contribution.source.clone(), 1)]),
            labels,
            categories: Tally::from([(contribution.category.clone(), 1)]),
            releases: Tally::from([(contribution.release.clone(), 1)]),
            customers: 1,
            priority,
            first_seen_at: contribution.posted_at,
            last_seen_at: contribution.posted_at,
            last_aggregated_at: None,
        }
    }

    /// Folds one more contribution into the cluster.
    pub fn absorb(&mut self, contribution: &Contribution, now: DateTime<Utc>) {
        *self.sources.entry(contribution.source.clone()).or_insert(0) += 1;
        *self.labels.entry(contribution.label.clone()).or_insert(0) += 1;
        *self
            .categories
            .entry(contribution.category.clone())
            .or_insert(0) += 1;
        *self.releases.entry(contribution.release.clone()).or_insert(0) += 1;
        self.customers += 1;
        self.priority = compute_priority(&self.labels, self.customers);

        if contribution.posted_at < self.first_seen_at {
            self.first_seen_at = contribution.posted_at;
        }
        if contribution.posted_at > self.last_seen_at {
            self.last_seen_at = contribution.posted_at;
        }
        self.last_aggregated_at = Some(now);
    }

    #[must_use]
    pub fn majority_label(&self) -> &str {
        majority_label(&self.labels, DEFAULT_LABEL)
    }

    #[must_use]
    pub fn majority_category(&self) -> &str {
        majority_label(&self.categories, DEFAULT_CATEGORY)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn tally(pairs: &[(&str, i32)]) -> Tally {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn contribution(label: &str, posted_at: DateTime<Utc>) -> Contribution {
        Contribution {
            source: "PLAY_STORE".to_string(),
            label: label.to_string(),
            category: "STABILITY".to_string(),
            release: "1.2.0".to_string(),
            posted_at,
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn majority_tie_goes_to_greatest_label() {
        let t = tally(&[("HIGH", 2), ("LOW", 2)]);
        assert_eq!(majority_label(&t, DEFAULT_LABEL), "LOW");

        let t = tally(&[("CRITICAL", 3), ("MEDIUM", 3)]);
        assert_eq!(majority_label(&t, DEFAULT_LABEL), "MEDIUM");
    }

    #[test]
    fn majority_highest_count_wins() {
        let t = tally(&[("CRITICAL", 1), ("HIGH", 2)]);
        assert_eq!(majority_label(&t, DEFAULT_LABEL), "HIGH");
    }

    #[test]
    fn majority_of_empty_tally_is_default() {
        assert_eq!(majority_label(&Tally::new(), DEFAULT_LABEL), "LOW");
        assert_eq!(majority_label(&Tally::new(), DEFAULT_CATEGORY), "UNKNOWN");
    }

    #[test]
    fn priority_is_weight_times_customers() {
        assert_eq!(compute_priority(&tally(&[("HIGH", 1)]), 1), 3);
        assert_eq!(compute_priority(&tally(&[("HIGH", 2)]), 2), 6);
        assert_eq!(compute_priority(&tally(&[("CRITICAL", 1), ("HIGH", 2)]), 3), 9);
        assert_eq!(compute_priority(&tally(&[("HIGH", 2), ("LOW", 2)]), 4), 4);
    }

    #[test]
    fn unknown_label_has_no_weight() {
        assert_eq!(label_weight("BLOCKER"), 0);
        assert_eq!(compute_priority(&tally(&[("BLOCKER", 5)]), 5), 0);
    }

    #[test]
    fn seed_starts_a_single_customer_cluster() {
        let stats = ClusterStats::seed(&contribution("HIGH", at(1)));
        assert_eq!(stats.customers, 1);
        assert_eq!(stats.priority, 3);
        assert_eq!(stats.labels, tally(&[("HIGH", 1)]));
        assert_eq!(stats.first_seen_at, at(1));
        assert_eq!(stats.last_seen_at, at(1));
        assert!(stats.last_aggregated_at.is_none());
    }

    #[test]
    fn absorb_updates_tallies_priority_and_window() {
        let mut stats = ClusterStats::seed(&contribution("HIGH", at(10)));
        let now = at(20);

        stats.absorb(&contribution("HIGH", at(15)), now);
        assert_eq!(stats.customers, 2);
        assert_eq!(stats.priority, 6);
        assert_eq!(stats.labels, tally(&[("HIGH", 2)]));
        assert_eq!(stats.first_seen_at, at(10));
        assert_eq!(stats.last_seen_at, at(15));
        assert_eq!(stats.last_aggregated_at, Some(now));

        stats.absorb(&contribution("CRITICAL", at(5)), now + Duration::hours(1));
        assert_eq!(stats.first_seen_at, at(5));
        assert_eq!(stats.last_seen_at, at(15));
        assert_eq!(stats.majority_label(), "HIGH");
        assert_eq!(stats.priority, 9);
    }

    #[test]
    fn customers_match_every_tally_sum() {
        let mut stats = ClusterStats::seed(&contribution("LOW", at(1)));
        for (i, label) in ["HIGH", "MEDIUM", "HIGH", "CRITICAL"].iter().enumerate() {
            let mut c = contribution(label, at(2));
            c.source = if i % 2 == 0 { "APP_STORE" } else { "WIDGET" }.to_string();
            stats.absorb(&c, at(3));
        }

        for t in [&stats.sources, &stats.labels, &stats.categories, &stats.releases] {
            assert_eq!(t.values().sum::<i32>(), stats.customers);
        }
        assert_eq!(stats.customers, 5);
    }

    #[test]
    fn tally_serializes_as_json_object() {
        let json = serde_json::to_value(tally(&[("HIGH", 2)])).unwrap();
        assert_eq!(json, serde_json::json!({ "HIGH": 2 }));
    }
}

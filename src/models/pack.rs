// Pack domain models - external workers that publish events and run commands

//! # Pack Models
//!
//! A **pack** is an external process that talks to the orchestrator over
//! HTTP. It publishes events and polls for actions (commands) to execute.
//!
//! ## Identity
//!
//! Two packs with the same name but different labels are different peers:
//! a `Slack` pack labelled `env=dev` and one labelled `env=prod` each get
//! their own id. The id is derived from the name and the sorted label pairs,
//! so re-registering the same pack always lands on the same id.
//!
//! ## Rust Learning Notes:
//!
//! ### BTreeMap vs HashMap
//! Labels use a `BTreeMap`, which keeps its keys sorted. Iterating it
//! always yields the same order, which is what the id derivation needs.
//! A `HashMap` iterates in an unspecified order.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Label mapping attached to packs and used as selectors on steps/actions
pub type Labels = BTreeMap<String, String>;

/// Returns true when every entry of `selector` is present in `labels` with
/// an equal value.
///
/// An empty selector matches any label set.
pub fn labels_match(selector: &Labels, labels: &Labels) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Derive the stable identifier of a pack from its name and labels
///
/// The id is the lowercase hex SHA-256 of the name followed by every label
/// key and value in key order. Each part is written as its UTF-8 byte length
/// (8 bytes, big-endian `u64`) and then its bytes, so `("Slack", {ab: c})`
/// and `("Slack", {a: bc})` hash differently.
pub fn derive_pack_id(name: &str, labels: &Labels) -> String {
    fn write_part(hasher: &mut Sha256, part: &str) {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }

    let mut hasher = Sha256::new();
    write_part(&mut hasher, name);
    for (key, value) in labels {
        write_part(&mut hasher, key);
        write_part(&mut hasher, value);
    }
    format!("{:x}", hasher.finalize())
}

/// A command a pack can execute, with the result events it may report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackCommand {
    pub name: String,
    #[serde(default)]
    pub results: Vec<String>,
}

/// Liveness status derived from how long ago a pack was last seen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackStatus {
    Live,
    Warning,
    Critical,
}

impl PackStatus {
    /// Status for a pack last seen at `last_seen`, judged at `now`
    pub fn from_last_seen(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let age = now - last_seen;
        if age < Duration::minutes(10) {
            PackStatus::Live
        } else if age < Duration::hours(24) {
            PackStatus::Warning
        } else {
            PackStatus::Critical
        }
    }
}

impl std::fmt::Display for PackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            PackStatus::Live => "live",
            PackStatus::Warning => "warning",
            PackStatus::Critical => "critical",
        };
        write!(f, "{}", status)
    }
}

/// A registered pack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pack {
    /// Derived identifier, see [`derive_pack_id`]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub labels: Labels,

    /// Commands this pack accepts
    #[serde(default)]
    pub commands: Vec<PackCommand>,

    /// Event names this pack publishes
    #[serde(default)]
    pub events: Vec<String>,

    pub last_seen: DateTime<Utc>,
}

impl Pack {
    pub fn new(name: impl Into<String>, labels: Labels) -> Self {
        let name = name.into();
        Self {
            id: derive_pack_id(&name, &labels),
            name,
            labels,
            commands: Vec::new(),
            events: Vec::new(),
            last_seen: Utc::now(),
        }
    }

    pub fn with_commands(mut self, commands: Vec<PackCommand>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_events(mut self, events: Vec<String>) -> Self {
        self.events = events;
        self
    }

    /// Recompute the id after name or labels changed
    pub fn refresh_id(&mut self) {
        self.id = derive_pack_id(&self.name, &self.labels);
    }

    pub fn status(&self) -> PackStatus {
        PackStatus::from_last_seen(self.last_seen, Utc::now())
    }

    /// Whether this pack may serve a command addressed to `pack_name` with
    /// the label selector `selector`
    pub fn serves(&self, pack_name: &str, selector: &Labels) -> bool {
        self.name == pack_name && labels_match(selector, &self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_id_is_stable_and_label_sensitive() {
        let dev = Pack::new("Slack", labels(&[("env", "dev")]));
        let dev_again = Pack::new("Slack", labels(&[("env", "dev")]));
        let prod = Pack::new("Slack", labels(&[("env", "prod")]));
        let bare = Pack::new("Slack", Labels::new());

        assert_eq!(dev.id, dev_again.id);
        assert_ne!(dev.id, prod.id);
        assert_ne!(dev.id, bare.id);
    }

    #[test]
    fn test_id_keeps_part_boundaries() {
        assert_ne!(
            Pack::new("Slack", labels(&[("ab", "c")])).id,
            Pack::new("Slack", labels(&[("a", "bc")])).id
        );
        assert_ne!(
            Pack::new("Slackenv", labels(&[("dev", "")])).id,
            Pack::new("Slack", labels(&[("env", "dev")])).id
        );
        assert_ne!(
            Pack::new("Slack", labels(&[("env", "")])).id,
            Pack::new("Slackenv", Labels::new()).id
        );
    }

    #[test]
    fn test_id_ignores_label_insertion_order() {
        let mut a = Labels::new();
        a.insert("region".into(), "eu".into());
        a.insert("env".into(), "dev".into());
        let mut b = Labels::new();
        b.insert("env".into(), "dev".into());
        b.insert("region".into(), "eu".into());

        assert_eq!(derive_pack_id("Slack", &a), derive_pack_id("Slack", &b));
    }

    #[test]
    fn test_labels_match_subset() {
        let pack = labels(&[("env", "dev"), ("region", "eu")]);

        assert!(labels_match(&Labels::new(), &pack));
        assert!(labels_match(&labels(&[("env", "dev")]), &pack));
        assert!(labels_match(&pack, &pack));
        assert!(!labels_match(&labels(&[("env", "prod")]), &pack));
        assert!(!labels_match(&labels(&[("team", "core")]), &pack));
        assert!(!labels_match(&pack, &labels(&[("env", "dev")])));
    }

    #[test]
    fn test_labels_match_is_transitive() {
        let a = labels(&[("env", "dev")]);
        let b = labels(&[("env", "dev"), ("region", "eu")]);
        let c = labels(&[("env", "dev"), ("region", "eu"), ("zone", "1")]);

        assert!(labels_match(&a, &b));
        assert!(labels_match(&b, &c));
        assert!(labels_match(&a, &c));
    }

    #[test]
    fn test_status_thresholds() {
        let now = Utc::now();
        assert_eq!(PackStatus::from_last_seen(now, now), PackStatus::Live);
        assert_eq!(
            PackStatus::from_last_seen(now - Duration::minutes(9), now),
            PackStatus::Live
        );
        assert_eq!(
            PackStatus::from_last_seen(now - Duration::minutes(10), now),
            PackStatus::Warning
        );
        assert_eq!(
            PackStatus::from_last_seen(now - Duration::hours(23), now),
            PackStatus::Warning
        );
        assert_eq!(
            PackStatus::from_last_seen(now - Duration::hours(24), now),
            PackStatus::Critical
        );
    }

    #[test]
    fn test_serves() {
        let pack = Pack::new("Slack", labels(&[("env", "dev")]));
        assert!(pack.serves("Slack", &Labels::new()));
        assert!(pack.serves("Slack", &labels(&[("env", "dev")])));
        assert!(!pack.serves("Slack", &labels(&[("env", "prod")])));
        assert!(!pack.serves("Jira", &Labels::new()));
    }
}

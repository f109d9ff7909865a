// Event domain models - named occurrences published by packs

//! # Event Models
//!
//! An [`Event`] is something a pack tells the orchestrator about: a message
//! was sent, a build finished, a timer fired. Events are matched against the
//! trigger of flow steps; an event that matches a step becomes the trigger
//! of the action the step produces.
//!
//! The same type is used for action results: when a pack completes an
//! action, the result it reports is an event, which is then threaded back
//! through the flow that spawned the action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pack::{Labels, Pack};

/// Event name that forces a completed action into the `FATAL` state
pub const FATAL_EVENT: &str = "FATAL";

/// The pack an event originated from
///
/// A lightweight copy of the identifying parts of a [`Pack`]. Events keep
/// their own copy so that later changes to the registry do not rewrite the
/// history stored on actions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
}

impl From<&Pack> for PackRef {
    fn from(pack: &Pack) -> Self {
        Self {
            id: pack.id.clone(),
            name: pack.name.clone(),
            labels: pack.labels.clone(),
        }
    }
}

/// A named occurrence published by a pack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event name, e.g. `MessageSent`
    pub name: String,

    /// Originating pack
    pub pack: PackRef,

    /// Arbitrary JSON payload
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Client supplied creation time, or the receipt time when absent
    pub created: DateTime<Utc>,

    /// When the orchestrator received the event
    pub received: DateTime<Utc>,
}

impl Event {
    /// Build an event received just now from `pack`
    pub fn new(
        name: impl Into<String>,
        pack: &Pack,
        payload: serde_json::Value,
        created: Option<DateTime<Utc>>,
    ) -> Self {
        let received = Utc::now();
        Self {
            name: name.into(),
            pack: PackRef::from(pack),
            payload,
            created: created.unwrap_or(received),
            received,
        }
    }

    /// Whether this event reports a fatal outcome
    pub fn is_fatal(&self) -> bool {
        self.name == FATAL_EVENT
    }

    /// Whether the event came from `pack_name` and carries `name`
    pub fn matches(&self, pack_name: &str, name: &str) -> bool {
        self.pack.name == pack_name && self.name == name
    }

    /// Event view exposed to templates as `Event`
    ///
    /// Field names are capitalised so that templates read like
    /// `{{ Event.Payload.user }}` or `{{ Event.Pack.Labels.env }}`.
    pub fn template_view(&self) -> serde_json::Value {
        serde_json::json!({
            "Name": self.name,
            "Pack": {
                "Id": self.pack.id,
                "Name": self.pack.name,
                "Labels": self.pack.labels,
            },
            "Payload": self.payload,
            "Created": self.created.to_rfc3339(),
            "Received": self.received.to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_created_defaults_to_received() {
        let pack = Pack::new("Slack", Labels::new());
        let event = Event::new("MessageSent", &pack, json!({}), None);
        assert_eq!(event.created, event.received);
        assert_eq!(event.pack.name, "Slack");
        assert_eq!(event.pack.id, pack.id);
    }

    #[test]
    fn test_fatal_detection() {
        let pack = Pack::new("Slack", Labels::new());
        assert!(Event::new("FATAL", &pack, json!(null), None).is_fatal());
        assert!(!Event::new("fatal", &pack, json!(null), None).is_fatal());
    }

    #[test]
    fn test_template_view_shape() {
        let mut labels = Labels::new();
        labels.insert("env".to_string(), "dev".to_string());
        let pack = Pack::new("Slack", labels);
        let event = Event::new("MessageSent", &pack, json!({"n": 1}), None);

        let view = event.template_view();
        assert_eq!(view["Name"], "MessageSent");
        assert_eq!(view["Pack"]["Name"], "Slack");
        assert_eq!(view["Pack"]["Labels"]["env"], "dev");
        assert_eq!(view["Payload"]["n"], 1);
    }
}

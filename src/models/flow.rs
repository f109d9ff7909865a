// Flow domain models - declarative rules linking pack events to pack commands

//! # Flow Models
//!
//! A [`FlowDefinition`] is a user-registered rule set. Each [`Step`] says
//! "when pack P publishes event E (and the criteria hold), ask pack Q to run
//! command C with this input". Steps can depend on other steps, which turns
//! a flow into a small graph that is walked one event at a time.
//!
//! A [`FlowInstance`] is one run of a flow: a definition bound to a
//! correlation id, an accumulated context, and the actions taken so far.
//! Instances are never stored on their own. Their identity is the
//! correlation id carried by every action they spawn.
//!
//! ## Rust Learning Notes:
//!
//! ### serde rename_all
//! The wire format uses camelCase (`packName`, `dependsOn`) while Rust
//! fields are snake_case. `#[serde(rename_all = "camelCase")]` bridges the
//! two without renaming every field by hand.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use super::action::Action;
use super::event::Event;
use super::pack::Labels;
use crate::{PackflowError, Result};

/// Accumulated key/value context of a flow instance
pub type Context = BTreeMap<String, String>;

/// The event a step waits for
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTrigger {
    /// Name of the publishing pack
    pub pack_name: String,

    /// Event name
    pub name: String,

    /// Label selector; values are templates resolved against the step context
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pack_labels: Labels,
}

/// The command a step dispatches when it matches
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    /// Name of the pack that should execute the command
    pub pack_name: String,

    /// Command name
    pub name: String,

    /// Label selector; values are templates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pack_labels: Labels,

    /// Input value tree; every string inside may be a template
    #[serde(default)]
    pub input: serde_json::Value,
}

/// One rule within a flow
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique within the flow
    pub id: String,

    /// Prerequisite step ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    pub event: EventTrigger,

    /// Template that must render to a boolean; empty means "always"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub criteria: String,

    /// Context templates merged over the parent context
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: Context,

    pub command: CommandSpec,
}

impl Step {
    /// A step with no prerequisites can start a new flow instance
    pub fn is_entry(&self) -> bool {
        self.depends_on.is_empty()
    }

    /// Whether the step waits for this event's name and originating pack
    pub fn listens_to(&self, event: &Event) -> bool {
        event.matches(&self.event.pack_name, &self.event.name)
    }
}

/// A registered flow
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    /// User visible name, unique among the latest definitions
    pub name: String,

    /// Version identifier assigned by the flow store on registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,

    #[serde(default)]
    pub description: String,

    pub steps: Vec<Step>,
}

impl FlowDefinition {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.id == id)
    }

    /// Whether some entry step (no `dependsOn`) listens to `event`
    pub fn is_entered_by(&self, event: &Event) -> bool {
        self.steps
            .iter()
            .any(|step| step.is_entry() && step.listens_to(event))
    }

    pub fn summary(&self) -> FlowSummary {
        FlowSummary {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }

    /// Structural validation applied before a flow is stored
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PackflowError::InvalidInput("flow name is required".into()));
        }
        if self.steps.is_empty() {
            return Err(PackflowError::InvalidInput(format!(
                "flow '{}' has no steps",
                self.name
            )));
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(PackflowError::InvalidInput(format!(
                    "flow '{}' has a step without id",
                    self.name
                )));
            }
            if !ids.insert(step.id.as_str()) {
                return Err(PackflowError::InvalidInput(format!(
                    "flow '{}' has duplicate step id '{}'",
                    self.name, step.id
                )));
            }
            if step.event.pack_name.is_empty() || step.event.name.is_empty() {
                return Err(PackflowError::InvalidInput(format!(
                    "step '{}' needs event.packName and event.name",
                    step.id
                )));
            }
            if step.command.pack_name.is_empty() || step.command.name.is_empty() {
                return Err(PackflowError::InvalidInput(format!(
                    "step '{}' needs command.packName and command.name",
                    step.id
                )));
            }
        }

        for step in &self.steps {
            if let Some(missing) = step.depends_on.iter().find(|dep| !ids.contains(dep.as_str())) {
                return Err(PackflowError::InvalidInput(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, missing
                )));
            }
        }

        if !self.steps.iter().any(Step::is_entry) {
            return Err(PackflowError::InvalidInput(format!(
                "flow '{}' has no entry step (every step has dependsOn)",
                self.name
            )));
        }

        Ok(())
    }
}

/// Name/description projection returned by flow listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSummary {
    pub name: String,
    pub description: String,
}

/// One run of a flow definition
///
/// Owned by exactly one task at a time; never shared.
#[derive(Debug, Clone)]
pub struct FlowInstance {
    pub flow: FlowDefinition,
    pub correlation_id: String,
    pub context: Context,
    /// Step id -> action taken for that step in this run
    pub actions: HashMap<String, Action>,
}

impl FlowInstance {
    /// Fresh instance with a new correlation id and empty state
    pub fn start(flow: FlowDefinition) -> Self {
        Self {
            flow,
            correlation_id: Uuid::new_v4().to_string(),
            context: Context::new(),
            actions: HashMap::new(),
        }
    }

    /// Rebuild an instance from the actions already stored for it
    pub fn resume(
        flow: FlowDefinition,
        correlation_id: impl Into<String>,
        context: Context,
        actions: Vec<Action>,
    ) -> Self {
        let actions = actions
            .into_iter()
            .map(|action| (action.step_id.clone(), action))
            .collect();
        Self {
            flow,
            correlation_id: correlation_id.into(),
            context,
            actions,
        }
    }

    pub fn flow_uuid(&self) -> Option<Uuid> {
        self.flow.uuid
    }

    pub fn has_action_for(&self, step_id: &str) -> bool {
        self.actions.contains_key(step_id)
    }

    /// Whether the action taken for `step_id` (if any) has finished
    pub fn step_finished(&self, step_id: &str) -> bool {
        self.actions
            .get(step_id)
            .map(Action::has_finished)
            .unwrap_or(false)
    }
}

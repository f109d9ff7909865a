// Action domain models - executable work items and their state machine

//! # Action Models
//!
//! An [`Action`] is a command materialised by a matching flow step, waiting
//! to be taken and executed by a pack. It carries a small state machine:
//!
//! ```text
//!   NEW ──take──▶ PENDING ──complete(result, ¬fatal)──▶ SUCCESS
//!                    │
//!                    └────complete(result, fatal)─────▶ FATAL
//! ```
//!
//! `SUCCESS` and `FATAL` are terminal. Every transition records a timestamp
//! and is appended to the state history, so the last history entry always
//! equals the current state.
//!
//! ## Compare-and-swap
//!
//! Actions are shared between concurrent pack requests through the action
//! store. Each transition remembers the state it left in
//! [`Action::previous_state`]; the store only accepts the update when the
//! stored state still equals that value. The field is never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::Event;
use super::flow::Context;
use super::pack::Labels;
use crate::{PackflowError, Result};

/// Lifecycle state of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionState {
    New,
    Pending,
    Success,
    Fatal,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionState::Success | ActionState::Fatal)
    }

    /// Whether the machine allows moving from `self` to `to`
    pub fn can_transition_to(&self, to: ActionState) -> bool {
        matches!(
            (self, to),
            (ActionState::New, ActionState::Pending)
                | (ActionState::Pending, ActionState::Success)
                | (ActionState::Pending, ActionState::Fatal)
        )
    }
}

impl std::fmt::Display for ActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            ActionState::New => "NEW",
            ActionState::Pending => "PENDING",
            ActionState::Success => "SUCCESS",
            ActionState::Fatal => "FATAL",
        };
        write!(f, "{}", state)
    }
}

/// A state together with the moment it was entered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub value: ActionState,
    pub time: DateTime<Utc>,
}

impl StateRecord {
    pub fn now(value: ActionState) -> Self {
        Self {
            value,
            time: Utc::now(),
        }
    }
}

/// A command to execute, bound to one flow instance and step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,

    /// Command name
    pub name: String,

    /// Target pack
    pub pack_name: String,
    #[serde(default)]
    pub pack_labels: Labels,

    /// Resolved command input
    #[serde(default)]
    pub input: serde_json::Value,

    pub state: StateRecord,
    pub state_history: Vec<StateRecord>,

    pub correlation_id: String,
    pub flow_uuid: Option<Uuid>,
    pub flow_name: String,
    pub step_id: String,

    /// Working context of the step that produced this action
    #[serde(default)]
    pub context: Context,

    /// Event that made the step match
    pub trigger: Event,

    /// Result reported on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Event>,

    /// State before the last transition, used by the store's compare-and-swap
    #[serde(skip)]
    pub previous_state: Option<ActionState>,
}

impl Action {
    /// A new action in state `NEW` with a fresh id
    pub fn new(
        name: impl Into<String>,
        pack_name: impl Into<String>,
        pack_labels: Labels,
        input: serde_json::Value,
        trigger: Event,
    ) -> Self {
        let state = StateRecord::now(ActionState::New);
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            pack_name: pack_name.into(),
            pack_labels,
            input,
            state_history: vec![state.clone()],
            state,
            correlation_id: String::new(),
            flow_uuid: None,
            flow_name: String::new(),
            step_id: String::new(),
            context: Context::new(),
            trigger,
            result: None,
            previous_state: None,
        }
    }

    pub fn has_finished(&self) -> bool {
        self.state.value.is_terminal()
    }

    /// Move to `to`, recording the previous state and appending history
    ///
    /// ## Errors
    /// - `IllegalStateTransition` when the machine forbids the move; the
    ///   action is left untouched in that case.
    pub fn transition(&mut self, to: ActionState) -> Result<()> {
        if !self.state.value.can_transition_to(to) {
            return Err(PackflowError::IllegalStateTransition {
                id: self.id.clone(),
                from: self.state.value,
                to,
            });
        }
        self.previous_state = Some(self.state.value);
        self.state = StateRecord::now(to);
        self.state_history.push(self.state.clone());
        Ok(())
    }

    /// NEW -> PENDING
    pub fn take(&mut self) -> Result<()> {
        self.transition(ActionState::Pending)
    }

    /// PENDING -> SUCCESS or FATAL depending on the result name
    pub fn complete(&mut self, result: Event) -> Result<()> {
        let target = if result.is_fatal() {
            ActionState::Fatal
        } else {
            ActionState::Success
        };
        self.transition(target)?;
        self.result = Some(result);
        Ok(())
    }
}

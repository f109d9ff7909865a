// Flow engine - walks the candidate steps of one flow instance for one event

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::evaluator::StepEvaluator;
use super::storage::ActionStore;
use crate::models::{Action, Event, FlowInstance, Step};

/// How a step's `dependsOn` list is satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DependencyMode {
    /// Any listed prerequisite with a finished action
    #[default]
    Any,
    /// Every listed prerequisite must have a finished action
    All,
}

impl DependencyMode {
    fn satisfied(&self, step: &Step, instance: &FlowInstance) -> bool {
        if step.depends_on.is_empty() {
            return true;
        }
        let mut finished = step.depends_on.iter().map(|id| instance.step_finished(id));
        match self {
            DependencyMode::Any => finished.any(|done| done),
            DependencyMode::All => finished.all(|done| done),
        }
    }
}

/// Executes steps of a flow instance and persists the actions they produce
pub struct FlowEngine {
    actions: Arc<dyn ActionStore>,
    evaluator: StepEvaluator,
    mode: DependencyMode,
}

impl FlowEngine {
    pub fn new(actions: Arc<dyn ActionStore>, evaluator: StepEvaluator, mode: DependencyMode) -> Self {
        Self {
            actions,
            evaluator,
            mode,
        }
    }

    fn is_candidate(&self, step: &Step, instance: &FlowInstance, event: &Event) -> bool {
        step.listens_to(event)
            && !instance.has_action_for(&step.id)
            && self.mode.satisfied(step, instance)
    }

    /// Evaluate every candidate step in definition order
    ///
    /// Per-step failures are logged and do not stop the remaining candidates.
    /// Returns the actions that were persisted.
    pub async fn process(&self, instance: &mut FlowInstance, event: &Event) -> Vec<Action> {
        let snapshot: &FlowInstance = instance;
        let candidates: Vec<Step> = snapshot
            .flow
            .steps
            .iter()
            .filter(|step| self.is_candidate(step, snapshot, event))
            .cloned()
            .collect();

        debug!(
            flow = %instance.flow.name,
            correlation_id = %instance.correlation_id,
            event = %event.name,
            candidates = candidates.len(),
            "processing event"
        );

        let mut created = Vec::new();
        for step in candidates {
            let mut action = match self.evaluator.evaluate(&step, event, &instance.context) {
                Ok(Some(action)) => action,
                Ok(None) => continue,
                Err(e) => {
                    warn!(flow = %instance.flow.name, "{}", e);
                    continue;
                }
            };

            action.correlation_id = instance.correlation_id.clone();
            action.flow_uuid = instance.flow_uuid();
            action.flow_name = instance.flow.name.clone();
            action.step_id = step.id.clone();

            match self.actions.add(action).await {
                Ok(stored) => {
                    info!(
                        "⚡ Action {} ({} on {}) created by {}/{}",
                        stored.id, stored.name, stored.pack_name, stored.flow_name, stored.step_id
                    );
                    instance.actions.insert(step.id.clone(), stored.clone());
                    created.push(stored);
                }
                Err(e) => {
                    error!(
                        flow = %instance.flow.name,
                        step = %step.id,
                        "failed to persist action: {}",
                        e
                    );
                }
            }
        }
        created
    }
}

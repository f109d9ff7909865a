// Action broker - TAKE and COMPLETE for packs

//! # Action Broker
//!
//! Packs never receive pushed work. They poll [`ActionBroker::take`] for the
//! oldest NEW action addressed to them and report the outcome through
//! [`ActionBroker::complete`]. Both operations are compare-and-swap updates
//! on the action store, so concurrent packs can poll the same queue:
//! exactly one TAKE wins a given action and exactly one COMPLETE finishes it.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::storage::ActionStore;
use crate::models::{Action, Event, Pack};
use crate::{PackflowError, Result};

pub struct ActionBroker {
    actions: Arc<dyn ActionStore>,
}

impl ActionBroker {
    pub fn new(actions: Arc<dyn ActionStore>) -> Self {
        Self { actions }
    }

    /// Claim the oldest NEW action `pack` may serve
    ///
    /// Candidates lost to a concurrent taker are skipped in favour of the
    /// next one. Returns `None` when nothing is left.
    pub async fn take(&self, pack: &Pack, action_name: Option<&str>) -> Result<Option<Action>> {
        let candidates = self.actions.find_new(&pack.name, action_name).await?;

        for mut action in candidates
            .into_iter()
            .filter(|action| pack.serves(&action.pack_name, &action.pack_labels))
        {
            action.take()?;
            match self.actions.update(action).await {
                Ok(taken) => {
                    info!("📤 Action {} ({}) taken by pack {}", taken.id, taken.name, pack.id);
                    return Ok(Some(taken));
                }
                Err(PackflowError::IllegalStateTransition { id, .. }) => {
                    debug!(action = %id, "lost TAKE race, trying next candidate");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Record the result of an action
    ///
    /// A pack that does not serve the action gets `Ok(None)` and nothing
    /// changes.
    ///
    /// ## Errors
    /// - `ActionNotFound` for an unknown id
    /// - `IllegalStateTransition` when the action is not PENDING, including
    ///   when a concurrent COMPLETE won
    pub async fn complete(&self, pack: &Pack, action_id: &str, result: Event) -> Result<Option<Action>> {
        let mut action = self
            .actions
            .get(action_id)
            .await?
            .ok_or_else(|| PackflowError::ActionNotFound(action_id.to_string()))?;

        if !pack.serves(&action.pack_name, &action.pack_labels) {
            warn!(
                action = %action.id,
                pack = %pack.id,
                "pack does not serve this action; ignoring completion"
            );
            return Ok(None);
        }

        action.complete(result)?;
        let completed = self.actions.update(action).await?;
        info!(
            "📥 Action {} ({}) completed as {} by pack {}",
            completed.id, completed.name, completed.state.value, pack.id
        );
        Ok(Some(completed))
    }
}

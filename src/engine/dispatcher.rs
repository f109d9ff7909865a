// Event dispatcher - fans events out to flow instances
// Each candidate flow instance runs in its own task that outlives the caller

//! # Event Dispatcher
//!
//! Two things move flows forward:
//!
//! 1. A pack publishes an event. Every latest flow with an entry step
//!    listening to it gets a fresh [`FlowInstance`].
//! 2. A pack completes an action. The instance that spawned it is rebuilt
//!    from the flow history and the correlated actions, and the action's
//!    result event is fed into it.
//!
//! In both cases the work happens in detached tasks. The `handle_*` methods
//! return the join handles so that callers (mostly tests) can wait; the HTTP
//! layer drops them and answers immediately.
//!
//! ## Rust Learning Notes:
//!
//! ### Moving State into Tasks
//! `tokio::spawn` requires a `'static` future. Each task receives its own
//! `FlowInstance` by move and a clone of the `Arc<FlowEngine>`, so no
//! mutable state is shared between tasks.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::flow_engine::FlowEngine;
use super::storage::{ActionStore, FlowStore};
use crate::models::{Action, Event, FlowInstance};
use crate::Result;

/// Routes events and completed actions to flow instances
pub struct EventDispatcher {
    flows: Arc<dyn FlowStore>,
    actions: Arc<dyn ActionStore>,
    engine: Arc<FlowEngine>,
}

impl EventDispatcher {
    pub fn new(
        flows: Arc<dyn FlowStore>,
        actions: Arc<dyn ActionStore>,
        engine: Arc<FlowEngine>,
    ) -> Self {
        Self {
            flows,
            actions,
            engine,
        }
    }

    fn spawn(&self, mut instance: FlowInstance, event: Event) -> JoinHandle<Vec<Action>> {
        let engine = self.engine.clone();
        tokio::spawn(async move { engine.process(&mut instance, &event).await })
    }

    /// Start one new instance per flow entered by `event`
    pub async fn handle_event(&self, event: Event) -> Result<Vec<JoinHandle<Vec<Action>>>> {
        let flows = self.flows.find_by_event(&event).await?;
        if flows.is_empty() {
            debug!(event = %event.name, pack = %event.pack.name, "no flow listens to event");
        }

        Ok(flows
            .into_iter()
            .map(|flow| {
                let instance = FlowInstance::start(flow);
                info!(
                    "📨 Event {} from {} starts flow {} ({})",
                    event.name, event.pack.name, instance.flow.name, instance.correlation_id
                );
                self.spawn(instance, event.clone())
            })
            .collect())
    }

    /// Feed the result of a completed action back into its flow instance
    ///
    /// Returns `None` when the action carries no result or its flow version
    /// is unknown; the latter is logged and dropped.
    pub async fn handle_action(&self, action: Action) -> Result<Option<JoinHandle<Vec<Action>>>> {
        let Some(result) = action.result.clone() else {
            debug!(action = %action.id, "action has no result to dispatch");
            return Ok(None);
        };

        let flow = match action.flow_uuid {
            Some(uuid) => self.flows.get_by_uuid(&uuid).await?,
            None => None,
        };
        let Some(flow) = flow else {
            warn!(
                action = %action.id,
                flow = %action.flow_name,
                "flow version of completed action is unknown; dropping result"
            );
            return Ok(None);
        };

        let correlated = self.actions.find_correlated(&action.correlation_id).await?;
        let instance = FlowInstance::resume(
            flow,
            action.correlation_id.clone(),
            action.context.clone(),
            correlated,
        );
        info!(
            "🔁 Result {} of action {} continues flow {} ({})",
            result.name, action.id, instance.flow.name, instance.correlation_id
        );
        Ok(Some(self.spawn(instance, result)))
    }

    /// Fire-and-forget variant of [`handle_event`](Self::handle_event)
    pub fn dispatch_event(self: &Arc<Self>, event: Event) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.handle_event(event).await {
                warn!("event dispatch failed: {}", e);
            }
        });
    }

    /// Fire-and-forget variant of [`handle_action`](Self::handle_action)
    pub fn dispatch_action(self: &Arc<Self>, action: Action) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.handle_action(action).await {
                warn!("action dispatch failed: {}", e);
            }
        });
    }
}

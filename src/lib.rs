// packflow - event driven automation orchestrator
// Packs publish events, flows turn them into actions, packs take and complete actions

//! # packflow Library
//!
//! This is the library crate behind the `server` binary. External programs
//! ("packs") publish typed events and poll for commands to execute; users
//! register declarative flows describing how events from one pack trigger
//! commands on another. The orchestrator matches events to flow steps,
//! materialises actions, hands them to packs on demand, collects results and
//! threads results back through the flows.
//!
//! ## Core Components
//!
//! ### Domain Models (`models`)
//! - [`Pack`]: an external worker identified by name + labels
//! - [`Event`]: a named occurrence with a JSON payload
//! - [`FlowDefinition`] / [`Step`]: declarative event → command rules
//! - [`Action`]: a command to execute, with its NEW → PENDING → SUCCESS/FATAL
//!   state machine
//!
//! ### Engine (`engine`)
//! - [`TemplateResolver`]: renders templates embedded in value trees
//! - [`StepEvaluator`]: decides whether one step produces an action
//! - [`FlowEngine`]: walks the candidate steps of one flow instance
//! - [`EventDispatcher`]: fans events out to flow instances
//! - [`ActionBroker`]: TAKE and COMPLETE for packs
//! - [`PackRegistry`]: pack registration and liveness
//! - Storage traits with in-memory implementations
//!
//! ### HTTP API (`api`)
//! An axum router exposing packs, events, actions, flows and the datastore.
//!
//! ## Rust Learning Notes:
//!
//! ### Re-exports
//! `pub use` statements create shortcuts so users don't need to know the
//! internal module structure. Instead of
//! `use packflow::engine::broker::ActionBroker`, users can write
//! `use packflow::ActionBroker`.

// Core domain models
pub mod models;

// Execution engine: templates, evaluation, dispatch, broker, storage
pub mod engine;

// REST API built on axum
pub mod api;

// Process configuration read from flags and environment
pub mod config;

pub use models::{
    Action, ActionState, CommandSpec, Context, Event, EventTrigger, FlowDefinition, FlowInstance,
    FlowSummary, Labels, Pack, PackStatus, Step,
};

pub use engine::{
    broker::ActionBroker,
    dispatcher::EventDispatcher,
    evaluator::{EvaluationError, StepEvaluator},
    flow_engine::{DependencyMode, FlowEngine},
    registry::PackRegistry,
    storage::{
        ActionStore, DataStore, DatastoreEntry, FlowStore, InMemoryActionStore,
        InMemoryDataStore, InMemoryFlowStore, InMemoryPackStore, PackStore,
    },
    template::{TemplateError, TemplateResolver},
};

pub use api::{ApiServer, ApiServerBuilder, AppState};
pub use config::Config;

// Core error types
// Using the `thiserror` crate to make error handling easier
use thiserror::Error;

/// Error type for all packflow operations
///
/// ## Rust Learning Notes:
///
/// ### The `thiserror` Crate
/// - `#[derive(Error)]` implements the `std::error::Error` trait
/// - `#[error("...")]` provides the `Display` message
/// - `#[from]` enables automatic conversion with the `?` operator
#[derive(Error, Debug)]
pub enum PackflowError {
    /// Compare-and-swap miss or a move the state machine forbids
    #[error("Illegal state transition for action {id}: {from} -> {to}")]
    IllegalStateTransition {
        id: String,
        from: ActionState,
        to: ActionState,
    },

    #[error("Pack not found: {0}")]
    PackNotFound(String),

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    /// Any other missing resource (datastore keys, ...)
    #[error("Not found: {0}")]
    NotFound(String),

    /// A store refused to insert a duplicate key
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Malformed client input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Step evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    /// Storage backend failures
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PackflowError {
    /// True for the not-found family of errors
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PackflowError::PackNotFound(_)
                | PackflowError::FlowNotFound(_)
                | PackflowError::ActionNotFound(_)
                | PackflowError::NotFound(_)
        )
    }
}

/// Type alias for Results that use our custom error type
pub type Result<T> = std::result::Result<T, PackflowError>;

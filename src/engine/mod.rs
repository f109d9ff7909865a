// packflow engine
// Turns events into actions and drives them through their lifecycle

//! # Engine Module
//!
//! The engine is the layer between the domain models and the HTTP API.
//!
//! ## Data Flow
//!
//! ```text
//! pack event ─▶ EventDispatcher ─▶ FlowEngine ─▶ StepEvaluator ─▶ TemplateResolver
//!                     ▲                 │
//!                     │                 ▼
//!              completed action    ActionStore ◀── ActionBroker ◀── pack TAKE / COMPLETE
//! ```
//!
//! 1. A pack publishes an event; the dispatcher starts one flow instance per
//!    flow whose entry step listens to it.
//! 2. The flow engine evaluates candidate steps; each match becomes a NEW
//!    action in the action store.
//! 3. Packs TAKE actions through the broker and later COMPLETE them.
//! 4. The completed action's result is dispatched back into its instance,
//!    which may unlock dependent steps.
//!
//! ## Rust Learning Notes:
//!
//! ### Explicit Dependency Passing
//! Every component receives the stores it needs as `Arc<dyn Trait>` in its
//! constructor. There are no global handles, so tests wire in-memory stores
//! the same way the server does.

/// Template rendering over JSON value trees, with the built-in filters
pub mod template;

/// Storage traits and in-memory implementations
///
/// Contains:
/// - ActionStore with compare-and-swap updates
/// - FlowStore with latest-by-name and version history
/// - PackStore and the synchronous DataStore
pub mod storage;

/// Per-step matching and action construction
pub mod evaluator;

/// Candidate selection and action persistence for one flow instance
pub mod flow_engine;

/// Event and completed-action fan-out to flow instances
pub mod dispatcher;

/// TAKE / COMPLETE operations for packs
pub mod broker;

/// Pack registration and liveness
pub mod registry;

/// Background tasks: dead pack sweeper and action expiry
pub mod sweeper;

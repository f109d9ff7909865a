// Core domain models for packflow
// These are the plain data structures shared by the engine and the API

//! # Domain Models Module
//!
//! This module contains the core domain models of the orchestrator:
//! packs, events, flows and actions. They carry no storage or HTTP concerns;
//! the engine moves them around and the stores persist them.
//!
//! ## Rust Learning Notes:
//!
//! ### Re-exports for Clean APIs
//! The `pub use` statements at the bottom create a flat API. Users can
//! import `use packflow::models::Action` instead of
//! `use packflow::models::action::Action`.

// Pack, Labels and the label subset match used for routing
pub mod pack;

// Event and the pack reference it carries
pub mod event;

// FlowDefinition, Step and the transient FlowInstance
pub mod flow;

// Action and its NEW -> PENDING -> SUCCESS/FATAL state machine
pub mod action;

pub use action::{Action, ActionState, StateRecord};
pub use event::{Event, PackRef, FATAL_EVENT};
pub use flow::{
    CommandSpec, Context, EventTrigger, FlowDefinition, FlowInstance, FlowSummary, Step,
};
pub use pack::{derive_pack_id, labels_match, Labels, Pack, PackCommand, PackStatus};

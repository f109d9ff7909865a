// Storage abstraction for the orchestrator
// This defines the interfaces for persisting actions, flows, packs and datastore entries

//! # Storage Abstraction Layer
//!
//! This module provides the storage contracts the engine is written against,
//! together with in-memory implementations. The engine never talks to a
//! backend directly: the flow engine receives an [`ActionStore`], the
//! dispatcher a [`FlowStore`], and so on.
//!
//! ## Storage Architecture
//!
//! The storage layer follows the **Repository Pattern**:
//! - [`ActionStore`]: actions and their compare-and-swap state transitions
//! - [`FlowStore`]: latest-by-name flow definitions plus append-only history
//! - [`PackStore`]: registered packs keyed by derived id
//! - [`DataStore`]: static key/value entries readable from templates
//!
//! ## Compare-and-swap
//!
//! The action store is the only coordination point between concurrent pack
//! requests. [`ActionStore::update`] accepts the new version of an action
//! only when the stored state still equals `action.previous_state`; the
//! in-memory store checks and writes under one write lock.
//!
//! ## Rust Learning Notes:
//!
//! ### Async Traits
//! The `async-trait` crate lets traits declare `async fn` methods that can
//! be used behind `Arc<dyn Trait>`.
//!
//! ### Trait Bounds
//! - `Send`: Type can be safely moved between threads
//! - `Sync`: Type can be safely shared between threads via references
//! These bounds are required to share a store between spawned tasks.
//!
//! ### Sync and Async Side by Side
//! [`DataStore`] is a plain (non-async) trait because it is called from
//! inside template rendering, which is synchronous.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Action, ActionState, Event, FlowDefinition, FlowSummary, Pack};
use crate::{PackflowError, Result};

/// Persistence contract for actions
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Insert a new action
    ///
    /// ## Errors
    /// - `AlreadyExists` when an action with the same id is stored
    async fn add(&self, action: Action) -> Result<Action>;

    /// Get an action by id
    async fn get(&self, id: &str) -> Result<Option<Action>>;

    /// Replace an action if its stored state equals `action.previous_state`
    ///
    /// The stored state history is kept and the new current state is
    /// appended to it.
    ///
    /// ## Errors
    /// - `ActionNotFound` when no action has this id
    /// - `IllegalStateTransition` when the stored state differs from the
    ///   expected previous state (another writer won) or none was given
    async fn update(&self, action: Action) -> Result<Action>;

    /// NEW actions addressed to `pack_name` (and optionally with command
    /// `name`), oldest state timestamp first
    async fn find_new(&self, pack_name: &str, name: Option<&str>) -> Result<Vec<Action>>;

    /// All actions of one flow instance
    async fn find_correlated(&self, correlation_id: &str) -> Result<Vec<Action>>;

    /// Remove actions whose current state is older than `ttl`; returns how
    /// many were removed
    async fn expire(&self, ttl: Duration) -> Result<usize>;
}

/// Persistence contract for flow definitions
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Store a definition
    ///
    /// Assigns a uuid when absent, appends the definition to the history and
    /// replaces the latest entry with the same name.
    async fn add(&self, flow: FlowDefinition) -> Result<FlowDefinition>;

    /// Remove the latest entry for `name`; history is kept
    async fn remove(&self, name: &str) -> Result<bool>;

    /// Latest definition by name
    async fn get(&self, name: &str) -> Result<Option<FlowDefinition>>;

    /// Name/description of every latest definition, sorted by name
    async fn find_all(&self) -> Result<Vec<FlowSummary>>;

    /// Latest definitions having an entry step listening to `event`
    async fn find_by_event(&self, event: &Event) -> Result<Vec<FlowDefinition>>;

    /// Any definition ever stored, by uuid
    async fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<FlowDefinition>>;
}

/// Persistence contract for packs
#[async_trait]
pub trait PackStore: Send + Sync {
    /// Insert or replace by `pack.id`
    async fn upsert(&self, pack: Pack) -> Result<Pack>;

    async fn get(&self, id: &str) -> Result<Option<Pack>>;

    async fn find_all(&self) -> Result<Vec<Pack>>;

    async fn remove(&self, id: &str) -> Result<bool>;

    /// Set `last_seen`; returns false when the pack is unknown
    async fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Remove packs last seen before `cutoff`; returns their ids
    async fn remove_seen_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;
}

/// A static key/value entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreEntry {
    pub key: String,
    pub content_type: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

impl DatastoreEntry {
    pub fn new(
        key: impl Into<String>,
        content_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            content_type: content_type.into(),
            value: value.into(),
            updated_at: Utc::now(),
        }
    }

    /// Whether the content type is `application/json` or `text/json`
    pub fn is_json(&self) -> bool {
        let essence = self
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        essence == "application/json" || essence == "text/json"
    }
}

/// Persistence contract for the key/value datastore
pub trait DataStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<DatastoreEntry>>;

    /// Insert or replace; returns true when the key was new
    fn put(&self, entry: DatastoreEntry) -> Result<bool>;

    fn has(&self, key: &str) -> Result<bool>;

    fn remove(&self, key: &str) -> Result<bool>;

    /// All keys, sorted
    fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory action store
///
/// ## Rust Learning Notes:
///
/// ### tokio::sync::RwLock
/// The async `RwLock` can be held across `.await` points and does not
/// block the executor thread while waiting.
#[derive(Default)]
pub struct InMemoryActionStore {
    actions: RwLock<HashMap<String, Action>>,
}

impl InMemoryActionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActionStore for InMemoryActionStore {
    async fn add(&self, mut action: Action) -> Result<Action> {
        let mut actions = self.actions.write().await;
        if actions.contains_key(&action.id) {
            return Err(PackflowError::AlreadyExists(format!("action {}", action.id)));
        }
        action.previous_state = None;
        actions.insert(action.id.clone(), action.clone());
        Ok(action)
    }

    async fn get(&self, id: &str) -> Result<Option<Action>> {
        let actions = self.actions.read().await;
        Ok(actions.get(id).cloned())
    }

    async fn update(&self, mut action: Action) -> Result<Action> {
        let mut actions = self.actions.write().await;
        let stored = actions
            .get_mut(&action.id)
            .ok_or_else(|| PackflowError::ActionNotFound(action.id.clone()))?;

        if action.previous_state != Some(stored.state.value) {
            return Err(PackflowError::IllegalStateTransition {
                id: action.id.clone(),
                from: stored.state.value,
                to: action.state.value,
            });
        }

        let mut history = stored.state_history.clone();
        history.push(action.state.clone());
        action.state_history = history;
        action.previous_state = None;

        *stored = action.clone();
        Ok(action)
    }

    async fn find_new(&self, pack_name: &str, name: Option<&str>) -> Result<Vec<Action>> {
        let actions = self.actions.read().await;
        let mut found: Vec<Action> = actions
            .values()
            .filter(|action| {
                action.state.value == ActionState::New
                    && action.pack_name == pack_name
                    && name.map_or(true, |name| action.name == name)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.state
                .time
                .cmp(&b.state.time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(found)
    }

    async fn find_correlated(&self, correlation_id: &str) -> Result<Vec<Action>> {
        let actions = self.actions.read().await;
        Ok(actions
            .values()
            .filter(|action| action.correlation_id == correlation_id)
            .cloned()
            .collect())
    }

    async fn expire(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now() - ttl;
        let mut actions = self.actions.write().await;
        let before = actions.len();
        actions.retain(|_, action| action.state.time >= cutoff);
        Ok(before - actions.len())
    }
}

#[derive(Default)]
struct FlowTables {
    latest: HashMap<String, FlowDefinition>,
    history: HashMap<Uuid, FlowDefinition>,
}

/// In-memory flow store
///
/// Both views live behind one lock so that a reader never sees a latest
/// entry whose uuid is missing from the history.
#[derive(Default)]
pub struct InMemoryFlowStore {
    tables: RwLock<FlowTables>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn add(&self, mut flow: FlowDefinition) -> Result<FlowDefinition> {
        let uuid = *flow.uuid.get_or_insert_with(Uuid::new_v4);
        let mut tables = self.tables.write().await;
        tables.history.insert(uuid, flow.clone());
        tables.latest.insert(flow.name.clone(), flow.clone());
        Ok(flow)
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables.latest.remove(name).is_some())
    }

    async fn get(&self, name: &str) -> Result<Option<FlowDefinition>> {
        let tables = self.tables.read().await;
        Ok(tables.latest.get(name).cloned())
    }

    async fn find_all(&self) -> Result<Vec<FlowSummary>> {
        let tables = self.tables.read().await;
        let mut summaries: Vec<FlowSummary> =
            tables.latest.values().map(FlowDefinition::summary).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    async fn find_by_event(&self, event: &Event) -> Result<Vec<FlowDefinition>> {
        let tables = self.tables.read().await;
        let mut flows: Vec<FlowDefinition> = tables
            .latest
            .values()
            .filter(|flow| flow.is_entered_by(event))
            .cloned()
            .collect();
        flows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(flows)
    }

    async fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<FlowDefinition>> {
        let tables = self.tables.read().await;
        Ok(tables.history.get(uuid).cloned())
    }
}

/// In-memory pack store backed by a concurrent map
#[derive(Default)]
pub struct InMemoryPackStore {
    packs: DashMap<String, Pack>,
}

impl InMemoryPackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PackStore for InMemoryPackStore {
    async fn upsert(&self, pack: Pack) -> Result<Pack> {
        self.packs.insert(pack.id.clone(), pack.clone());
        Ok(pack)
    }

    async fn get(&self, id: &str) -> Result<Option<Pack>> {
        Ok(self.packs.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_all(&self) -> Result<Vec<Pack>> {
        let mut packs: Vec<Pack> = self
            .packs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        packs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(packs)
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.packs.remove(id).is_some())
    }

    async fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        match self.packs.get_mut(id) {
            Some(mut pack) => {
                pack.last_seen = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_seen_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let stale: Vec<String> = self
            .packs
            .iter()
            .filter(|entry| entry.value().last_seen < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &stale {
            self.packs.remove(id);
        }
        Ok(stale)
    }
}

/// In-memory datastore backed by a concurrent map
#[derive(Default)]
pub struct InMemoryDataStore {
    entries: DashMap<String, DatastoreEntry>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataStore for InMemoryDataStore {
    fn get(&self, key: &str) -> Result<Option<DatastoreEntry>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, entry: DatastoreEntry) -> Result<bool> {
        Ok(self.entries.insert(entry.key.clone(), entry).is_none())
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}

// Template resolution over JSON value trees
// Strings anywhere in a tree may embed expressions evaluated against event + context

//! # Template Resolver
//!
//! Flow steps carry templates in many places: context values, label
//! selectors, criteria and every string inside a command input tree. The
//! [`TemplateResolver`] renders them with a Jinja-compatible language
//! (`minijinja`) against a context of the shape
//!
//! ```text
//! {
//!   "Event":   { "Name", "Pack": { "Id", "Name", "Labels" }, "Payload", "Created", "Received" },
//!   "Context": { ...step context... }
//! }
//! ```
//!
//! built by [`template_context`].
//!
//! Resolving a tree produces a deep copy: arrays and objects are rebuilt,
//! strings are rendered, map keys and non-string scalars are copied as-is.
//! A failure anywhere fails the whole tree.
//!
//! ## Rust Learning Notes:
//!
//! ### Environment Lifetimes
//! `Environment<'static>` owns every template source it sees; nothing is
//! borrowed from the caller, so the resolver can live in an `Arc` and be
//! shared across tasks. Filters and functions are registered once in
//! [`TemplateResolver::new`] and never change afterwards.

pub mod cron;
mod functions;

use minijinja::Environment;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::engine::storage::DataStore;
use crate::models::{Context, Event};

pub use cron::{CronError, CronSchedule};

/// Errors raised while rendering templates
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TemplateError {
    #[error("failed to render '{template}': {message}")]
    Render { template: String, message: String },

    #[error("'{template}' rendered to '{value}', which is not a boolean")]
    NotBoolean { template: String, value: String },
}

/// Build the render context for an event and a step context
pub fn template_context(event: &Event, context: &Context) -> Value {
    serde_json::json!({
        "Event": event.template_view(),
        "Context": context,
    })
}

fn has_markup(source: &str) -> bool {
    source.contains("{{") || source.contains("{%") || source.contains("{#")
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Renders templates embedded in JSON value trees
pub struct TemplateResolver {
    env: Environment<'static>,
}

impl TemplateResolver {
    /// Build a resolver whose `datastore(key)` function reads from `datastore`
    pub fn new(datastore: Arc<dyn DataStore>) -> Self {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        functions::register(&mut env, datastore);
        Self { env }
    }

    /// Render one template string
    pub fn render(&self, source: &str, ctx: &Value) -> Result<String, TemplateError> {
        if !has_markup(source) {
            return Ok(source.to_string());
        }
        self.env
            .render_str(source, ctx)
            .map_err(|e| TemplateError::Render {
                template: source.to_string(),
                message: e.to_string(),
            })
    }

    /// Deep copy of `value` with every string rendered against `ctx`
    pub fn resolve(&self, value: &Value, ctx: &Value) -> Result<Value, TemplateError> {
        match value {
            Value::String(source) => Ok(Value::String(self.render(source, ctx)?)),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(entries) => {
                let mut resolved = Map::with_capacity(entries.len());
                for (key, item) in entries {
                    resolved.insert(key.clone(), self.resolve(item, ctx)?);
                }
                Ok(Value::Object(resolved))
            }
            scalar => Ok(scalar.clone()),
        }
    }

    /// Render every value of a string map; keys are kept verbatim
    pub fn resolve_map(
        &self,
        map: &BTreeMap<String, String>,
        ctx: &Value,
    ) -> Result<BTreeMap<String, String>, TemplateError> {
        map.iter()
            .map(|(key, source)| Ok((key.clone(), self.render(source, ctx)?)))
            .collect()
    }

    /// Render `source` and parse the output as a boolean
    pub fn resolve_bool(&self, source: &str, ctx: &Value) -> Result<bool, TemplateError> {
        let rendered = self.render(source, ctx)?;
        parse_bool(&rendered).ok_or_else(|| TemplateError::NotBoolean {
            template: source.to_string(),
            value: rendered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::InMemoryDataStore;
    use crate::models::{Labels, Pack};
    use serde_json::json;

    fn resolver() -> TemplateResolver {
        TemplateResolver::new(Arc::new(InMemoryDataStore::new()))
    }

    fn ctx() -> Value {
        let mut labels = Labels::new();
        labels.insert("env".into(), "dev".into());
        let pack = Pack::new("Slack", labels);
        let event = Event::new("MessageSent", &pack, json!({"n": 1, "user": "ada"}), None);
        let mut context = Context::new();
        context.insert("channel".into(), "#ops".into());
        template_context(&event, &context)
    }

    #[test]
    fn test_renders_event_and_context() {
        let out = resolver()
            .render(
                "{{ Event.Pack.Name }}/{{ Event.Pack.Labels.env }}: {{ Event.Payload.user }} in {{ Context.channel }}",
                &ctx(),
            )
            .unwrap();
        assert_eq!(out, "Slack/dev: ada in #ops");
    }

    #[test]
    fn test_template_free_tree_is_unchanged() {
        let tree = json!({
            "a": [1, 2.5, true, null, "plain", {"b": "text\n"}],
            "c": {"d": []},
            "e": "brace { not a template }"
        });
        let out = resolver().resolve(&tree, &ctx()).unwrap();
        assert_eq!(out, tree);
    }

    #[test]
    fn test_resolve_renders_lowercase_booleans() {
        let mut labels = Labels::new();
        labels.insert("env".into(), "dev".into());
        let pack = Pack::new("Slack", labels);
        let event = Event::new("MessageSent", &pack, json!({"n": 1, "t": "deploy api"}), None);
        let ctx = template_context(&event, &Context::new());

        let tree = json!({
            "eq": "{{ Event.Payload.n == 1 }}",
            "m": "{{ Event.Payload.t | match('^dep') }}",
            "no": "{{ Event.Payload.n > 5 }}"
        });
        let out = resolver().resolve(&tree, &ctx).unwrap();
        assert_eq!(out, json!({"eq": "true", "m": "true", "no": "false"}));
    }

    #[test]
    fn test_resolve_is_deep_copy() {
        let tree = json!({
            "text": "hi {{ Event.Payload.user }}",
            "list": ["{{ Event.Payload.n + 1 }}", 3],
            "{{ key }}": {"nested": "{{ Context.channel }}"}
        });
        let original = tree.clone();
        let out = resolver().resolve(&tree, &ctx()).unwrap();

        assert_eq!(tree, original);
        assert_eq!(
            out,
            json!({
                "text": "hi ada",
                "list": ["2", 3],
                "{{ key }}": {"nested": "#ops"}
            })
        );
    }

    #[test]
    fn test_resolve_is_all_or_nothing() {
        let tree = json!({"ok": "{{ Event.Name }}", "bad": "{{ randomInt(0) }}"});
        let err = resolver().resolve(&tree, &ctx()).unwrap_err();
        assert!(matches!(err, TemplateError::Render { template, .. } if template == "{{ randomInt(0) }}"));
    }

    #[test]
    fn test_syntax_error_names_template() {
        let err = resolver().render("{{ Event.Name ", &ctx()).unwrap_err();
        assert!(err.to_string().contains("{{ Event.Name "));
    }

    #[test]
    fn test_keeps_trailing_newline() {
        let out = resolver().render("{{ Event.Name }}\n", &ctx()).unwrap();
        assert_eq!(out, "MessageSent\n");
    }

    #[test]
    fn test_resolve_bool() {
        let resolver = resolver();
        let ctx = ctx();
        assert!(resolver.resolve_bool("{{ Event.Payload.n == 1 }}", &ctx).unwrap());
        assert!(!resolver.resolve_bool("{{ Event.Payload.n == 2 }}", &ctx).unwrap());
        assert!(resolver.resolve_bool(" TRUE ", &ctx).unwrap());
        assert!(!resolver.resolve_bool("0", &ctx).unwrap());
        assert!(matches!(
            resolver.resolve_bool("{{ Event.Name }}", &ctx),
            Err(TemplateError::NotBoolean { .. })
        ));
        assert!(resolver.resolve_bool("yes", &ctx).is_err());
    }

    #[test]
    fn test_resolve_map_keeps_keys() {
        let mut labels = Labels::new();
        labels.insert("env".into(), "{{ Event.Pack.Labels.env }}".into());
        let out = resolver().resolve_map(&labels, &ctx()).unwrap();
        assert_eq!(out["env"], "dev");
    }
}

// Step evaluation - decides whether a single step turns an event into an action

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::template::{template_context, TemplateError, TemplateResolver};
use crate::models::{labels_match, Action, Context, Event, Step};

/// Why a step could not be evaluated
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("step '{step}': context resolution failed: {source}")]
    ContextResolution { step: String, source: TemplateError },

    #[error("step '{step}': event label resolution failed: {source}")]
    LabelResolution { step: String, source: TemplateError },

    #[error("step '{step}': criteria evaluation failed: {source}")]
    Criteria { step: String, source: TemplateError },

    #[error("step '{step}': command resolution failed: {source}")]
    CommandResolution { step: String, source: TemplateError },
}

/// Evaluates one step against one event
///
/// Returns `Ok(None)` when the step simply does not apply (other event,
/// label mismatch, criteria false) and an error only when a template fails.
pub struct StepEvaluator {
    resolver: Arc<TemplateResolver>,
}

impl StepEvaluator {
    pub fn new(resolver: Arc<TemplateResolver>) -> Self {
        Self { resolver }
    }

    pub fn evaluate(
        &self,
        step: &Step,
        event: &Event,
        parent: &Context,
    ) -> Result<Option<Action>, EvaluationError> {
        // Context first so that labels and criteria can reference it
        let seed = template_context(event, parent);
        let resolved = self
            .resolver
            .resolve_map(&step.context, &seed)
            .map_err(|source| EvaluationError::ContextResolution {
                step: step.id.clone(),
                source,
            })?;
        let mut context = parent.clone();
        context.extend(resolved);
        let ctx = template_context(event, &context);

        if !step.listens_to(event) {
            return Ok(None);
        }

        let selector = self
            .resolver
            .resolve_map(&step.event.pack_labels, &ctx)
            .map_err(|source| EvaluationError::LabelResolution {
                step: step.id.clone(),
                source,
            })?;
        if !labels_match(&selector, &event.pack.labels) {
            debug!(step = %step.id, ?selector, "event pack labels do not match");
            return Ok(None);
        }

        if !step.criteria.trim().is_empty() {
            let satisfied = self
                .resolver
                .resolve_bool(&step.criteria, &ctx)
                .map_err(|source| EvaluationError::Criteria {
                    step: step.id.clone(),
                    source,
                })?;
            if !satisfied {
                debug!(step = %step.id, criteria = %step.criteria, "criteria not met");
                return Ok(None);
            }
        }

        let command_error = |source| EvaluationError::CommandResolution {
            step: step.id.clone(),
            source,
        };
        let pack_labels = self
            .resolver
            .resolve_map(&step.command.pack_labels, &ctx)
            .map_err(command_error)?;
        let input = self
            .resolver
            .resolve(&step.command.input, &ctx)
            .map_err(command_error)?;

        let mut action = Action::new(
            step.command.name.clone(),
            step.command.pack_name.clone(),
            pack_labels,
            input,
            event.clone(),
        );
        action.context = context;
        action.step_id = step.id.clone();
        Ok(Some(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::InMemoryDataStore;
    use crate::models::{ActionState, CommandSpec, EventTrigger, Labels, Pack};
    use serde_json::json;

    fn evaluator() -> StepEvaluator {
        StepEvaluator::new(Arc::new(TemplateResolver::new(Arc::new(
            InMemoryDataStore::new(),
        ))))
    }

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn step() -> Step {
        Step {
            id: "s".into(),
            event: EventTrigger {
                pack_name: "Slack".into(),
                name: "MessageSent".into(),
                ..Default::default()
            },
            command: CommandSpec {
                pack_name: "Jira".into(),
                name: "CreateIssue".into(),
                input: json!({"title": "{{ Event.Payload.text }} ({{ Context.team }})"}),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn event(pack_labels: Labels, payload: serde_json::Value) -> Event {
        Event::new("MessageSent", &Pack::new("Slack", pack_labels), payload, None)
    }

    #[test]
    fn test_matching_step_produces_new_action() {
        let mut step = step();
        step.context = labels(&[("team", "{{ Event.Payload.team }}")]);
        let mut parent = Context::new();
        parent.insert("origin".into(), "chat".into());
        parent.insert("team".into(), "old".into());

        let event = event(Labels::new(), json!({"text": "broken", "team": "core"}));
        let action = evaluator()
            .evaluate(&step, &event, &parent)
            .unwrap()
            .unwrap();

        assert_eq!(action.state.value, ActionState::New);
        assert_eq!(action.name, "CreateIssue");
        assert_eq!(action.pack_name, "Jira");
        assert_eq!(action.step_id, "s");
        assert_eq!(action.input, json!({"title": "broken (core)"}));
        assert_eq!(action.context["team"], "core");
        assert_eq!(action.context["origin"], "chat");
        assert_eq!(action.trigger, event);
        // parent context is untouched
        assert_eq!(parent["team"], "old");
    }

    #[test]
    fn test_other_event_is_skipped() {
        let mut other = event(Labels::new(), json!({}));
        other.name = "MessageEdited".into();
        assert!(evaluator()
            .evaluate(&step(), &other, &Context::new())
            .unwrap()
            .is_none());

        let from_jira = Event::new("MessageSent", &Pack::new("Jira", Labels::new()), json!({}), None);
        assert!(evaluator()
            .evaluate(&step(), &from_jira, &Context::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_label_selector_is_templated() {
        let mut step = step();
        step.event.pack_labels = labels(&[("env", "{{Event.Payload.env}}")]);
        let payload = json!({"env": "dev", "text": "x"});

        let dev = event(labels(&[("env", "dev")]), payload.clone());
        assert!(evaluator()
            .evaluate(&step, &dev, &Context::new())
            .unwrap()
            .is_some());

        let prod = event(labels(&[("env", "prod")]), payload);
        assert!(evaluator()
            .evaluate(&step, &prod, &Context::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_criteria() {
        let mut step = step();
        step.criteria = "{{ Event.Payload.n == 1 }}".into();

        let hit = event(Labels::new(), json!({"n": 1}));
        assert!(evaluator()
            .evaluate(&step, &hit, &Context::new())
            .unwrap()
            .is_some());

        let miss = event(Labels::new(), json!({"n": 2}));
        assert!(evaluator()
            .evaluate(&step, &miss, &Context::new())
            .unwrap()
            .is_none());

        step.criteria = "{{ Event.Payload.n }}0".into();
        assert!(matches!(
            evaluator().evaluate(&step, &hit, &Context::new()),
            Err(EvaluationError::Criteria { .. })
        ));
    }

    #[test]
    fn test_command_labels_resolved() {
        let mut step = step();
        step.command.pack_labels = labels(&[("env", "{{ Event.Pack.Labels.env }}")]);
        let event = event(labels(&[("env", "dev")]), json!({}));

        let action = evaluator()
            .evaluate(&step, &event, &Context::new())
            .unwrap()
            .unwrap();
        assert_eq!(action.pack_labels, labels(&[("env", "dev")]));
    }

    #[test]
    fn test_template_errors_are_classified() {
        let event = event(Labels::new(), json!({}));

        let mut bad_context = step();
        bad_context.context = labels(&[("x", "{{ randomInt(0) }}")]);
        assert!(matches!(
            evaluator().evaluate(&bad_context, &event, &Context::new()),
            Err(EvaluationError::ContextResolution { .. })
        ));

        let mut bad_input = step();
        bad_input.command.input = json!({"x": "{{ unmarshalJson('nope') }}"});
        assert!(matches!(
            evaluator().evaluate(&bad_input, &event, &Context::new()),
            Err(EvaluationError::CommandResolution { .. })
        ));
    }
}

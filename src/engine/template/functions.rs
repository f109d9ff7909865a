// Built-in filters and functions available to flow templates

//! Every template rendered by the resolver can use these helpers:
//!
//! | name | kind | example |
//! |---|---|---|
//! | `key` | filter | `{{ Event.Payload | key("user") }}` |
//! | `match` | filter | `{{ Event.Payload.text | match("^deploy") }}` |
//! | `extractMatch` | filter | `{{ Event.Payload.text | extractMatch("deploy (\\w+)") }}` |
//! | `kvp` | filter | `{{ ("a=1,b=2" | kvp).b }}` |
//! | `index` | filter | `{{ Event.Payload.items | index(0) }}` |
//! | `matchesCron` | filter | `{{ Event.Created | matchesCron("0 9 * * MON-FRI") }}` |
//! | `removedupwhitespaces` | filter | `{{ Event.Payload.text | removedupwhitespaces }}` |
//! | `safecopypaste` | filter | `{{ Event.Payload.text | safecopypaste }}` |
//! | `base64Encode` / `base64Decode` | filter | `{{ "hi" | base64Encode }}` |
//! | `unmarshalJson` | filter + function | `{{ unmarshalJson(Event.Payload.raw).id }}` |
//! | `randomInt` | function | `{{ randomInt(10) }}` |
//! | `randomAlpha` | function | `{{ randomAlpha(8) }}` |
//! | `datastore` | function | `{{ datastore("greeting") }}` |
//! | `template` | function | `{{ template("Hi {{ name }}", {"name": "x"}) }}` |

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::DateTime;
use lazy_static::lazy_static;
use minijinja::value::{Value, ValueKind};
use minijinja::{escape_formatter, Environment, Error, ErrorKind, Output, State};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::cron::CronSchedule;
use crate::engine::storage::DataStore;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("static regex");
    // Seeded once per process
    static ref RNG: Mutex<StdRng> = Mutex::new(StdRng::from_entropy());
}

/// Register all built-ins and the output formatter on `env`
pub(crate) fn register(env: &mut Environment<'static>, datastore: Arc<dyn DataStore>) {
    env.set_formatter(format_value);

    env.add_filter("key", key);
    env.add_filter("match", is_match);
    env.add_filter("extractMatch", extract_match);
    env.add_filter("kvp", kvp);
    env.add_filter("index", index);
    env.add_filter("matchesCron", matches_cron);
    env.add_filter("removedupwhitespaces", remove_dup_whitespaces);
    env.add_filter("safecopypaste", safe_copy_paste);
    env.add_filter("base64Encode", base64_encode);
    env.add_filter("base64Decode", base64_decode);
    env.add_filter("unmarshalJson", unmarshal_json);

    env.add_function("unmarshalJson", unmarshal_json);
    env.add_function("randomInt", random_int);
    env.add_function("randomAlpha", random_alpha);
    env.add_function("template", render_nested);
    env.add_function("datastore", move |key: String| -> Result<Value, Error> {
        lookup_datastore(datastore.as_ref(), &key)
    });
}

/// Booleans print as `true`/`false` and none prints as nothing
fn format_value(out: &mut Output<'_>, state: &State<'_, '_>, value: &Value) -> Result<(), Error> {
    match value.kind() {
        ValueKind::Bool => {
            out.write_str(if value.is_true() { "true" } else { "false" })?;
            Ok(())
        }
        ValueKind::None => Ok(()),
        _ => escape_formatter(out, state, value),
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

/// String form of a value; undefined and none become empty
fn text(value: &Value) -> String {
    if value.is_undefined() || value.is_none() {
        return String::new();
    }
    if value.kind() == ValueKind::Bool {
        return value.is_true().to_string();
    }
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

fn compile(pattern: &str) -> Result<Regex, Error> {
    Regex::new(pattern).map_err(|e| invalid(format!("invalid regex '{}': {}", pattern, e)))
}

fn key(value: Value, key: String) -> Value {
    if value.kind() != ValueKind::Map {
        return Value::UNDEFINED;
    }
    value
        .get_item(&Value::from(key))
        .unwrap_or(Value::UNDEFINED)
}

fn is_match(value: Value, pattern: String) -> Result<bool, Error> {
    Ok(compile(&pattern)?.is_match(&text(&value)))
}

fn extract_match(value: Value, pattern: String) -> Result<String, Error> {
    let input = text(&value);
    let captured = compile(&pattern)?
        .captures(&input)
        .and_then(|captures| captures.get(1))
        .map(|group| group.as_str().to_string());
    Ok(captured.unwrap_or(input))
}

fn kvp(value: Value) -> Value {
    let pairs: BTreeMap<String, String> = text(&value)
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split('=');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(k), Some(v), None) if !k.trim().is_empty() => {
                    Some((k.trim().to_string(), v.trim().to_string()))
                }
                _ => None,
            }
        })
        .collect();
    Value::from_serialize(&pairs)
}

fn index(value: Value, position: i64) -> Value {
    if value.kind() != ValueKind::Seq || position < 0 {
        return Value::from("");
    }
    match value.len() {
        Some(len) if (position as usize) < len => value
            .get_item(&Value::from(position))
            .unwrap_or_else(|_| Value::from("")),
        _ => Value::from(""),
    }
}

fn matches_cron(value: Value, expression: String) -> Result<bool, Error> {
    let raw = text(&value);
    let time = DateTime::parse_from_rfc3339(raw.trim())
        .map_err(|e| invalid(format!("invalid RFC3339 timestamp '{}': {}", raw, e)))?;
    let schedule = CronSchedule::parse(&expression)
        .map_err(|e| invalid(format!("invalid cron expression '{}': {}", expression, e)))?;
    Ok(schedule.matches(&time))
}

fn remove_dup_whitespaces(value: Value) -> String {
    WHITESPACE
        .replace_all(&text(&value), " ")
        .trim_end_matches(' ')
        .to_string()
}

fn safe_copy_paste(value: Value) -> String {
    text(&value).replace('\u{00A0}', " ")
}

fn base64_encode(value: Value) -> String {
    URL_SAFE_NO_PAD.encode(text(&value))
}

fn base64_decode(value: Value) -> Result<String, Error> {
    let bytes = URL_SAFE_NO_PAD
        .decode(text(&value))
        .map_err(|e| invalid(format!("invalid base64: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| invalid(format!("decoded base64 is not UTF-8: {}", e)))
}

fn unmarshal_json(value: Value) -> Result<Value, Error> {
    let parsed: serde_json::Value = serde_json::from_str(&text(&value))
        .map_err(|e| invalid(format!("invalid JSON: {}", e)))?;
    if !parsed.is_object() {
        return Err(invalid("unmarshalJson expects a JSON object"));
    }
    Ok(Value::from_serialize(&parsed))
}

fn random_int(upper: i64) -> Result<i64, Error> {
    if upper <= 0 {
        return Err(invalid(format!("randomInt needs a positive bound, got {}", upper)));
    }
    let mut rng = RNG.lock().map_err(|_| invalid("random source poisoned"))?;
    Ok(rng.gen_range(0..upper))
}

fn random_alpha(length: i64) -> Result<String, Error> {
    if length < 0 {
        return Err(invalid(format!("randomAlpha needs a non-negative length, got {}", length)));
    }
    let mut rng = RNG.lock().map_err(|_| invalid("random source poisoned"))?;
    Ok((0..length)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect())
}

fn render_nested(state: &State, source: String, context: Value) -> Result<String, Error> {
    state.env().render_str(&source, context)
}

fn lookup_datastore(store: &dyn DataStore, key: &str) -> Result<Value, Error> {
    let entry = store
        .get(key)
        .map_err(|e| invalid(format!("datastore lookup of '{}' failed: {}", key, e)))?
        .ok_or_else(|| invalid(format!("datastore key '{}' not found", key)))?;

    if entry.is_json() {
        let parsed: serde_json::Value = serde_json::from_str(&entry.value)
            .map_err(|e| invalid(format!("datastore key '{}' holds invalid JSON: {}", key, e)))?;
        Ok(Value::from_serialize(&parsed))
    } else {
        Ok(Value::from(entry.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::{DatastoreEntry, InMemoryDataStore};
    use serde_json::json;

    fn env() -> Environment<'static> {
        let store = InMemoryDataStore::new();
        store
            .put(DatastoreEntry::new("greeting", "text/plain", "hello"))
            .unwrap();
        store
            .put(DatastoreEntry::new(
                "config",
                "application/json; charset=utf-8",
                r##"{"channel": "#ops"}"##,
            ))
            .unwrap();

        let mut env = Environment::new();
        register(&mut env, Arc::new(store));
        env
    }

    fn render(source: &str, ctx: serde_json::Value) -> String {
        env().render_str(source, ctx).unwrap()
    }

    #[test]
    fn test_key() {
        let ctx = json!({"m": {"a": "x"}});
        assert_eq!(render("{{ m | key('a') }}", ctx.clone()), "x");
        assert_eq!(render("{{ m | key('missing') }}", ctx), "");
    }

    #[test]
    fn test_match_and_extract() {
        let ctx = json!({"t": "deploy api now"});
        assert_eq!(render("{{ t | match('^deploy') }}", ctx.clone()), "true");
        assert_eq!(render("{{ t | match('^rollback') }}", ctx.clone()), "false");
        assert_eq!(render(r"{{ t | extractMatch('deploy (\\w+)') }}", ctx.clone()), "api");
        assert_eq!(render(r"{{ t | extractMatch('rollback (\\w+)') }}", ctx), "deploy api now");
    }

    #[test]
    fn test_kvp() {
        let ctx = json!({"s": " a = 1 ,broken, b=2"});
        assert_eq!(render("{{ (s | kvp).a }}-{{ (s | kvp).b }}", ctx.clone()), "1-2");
        assert_eq!(render("{{ (s | kvp) | length }}", ctx), "2");

        let ctx = json!({"s": "a=b=c, =x, d=4, e="});
        assert_eq!(render("{{ (s | kvp) | length }}", ctx.clone()), "2");
        assert_eq!(render("{{ (s | kvp).d }}|{{ (s | kvp).e }}", ctx.clone()), "4|");
        assert_eq!(render("{{ (s | kvp).a is defined }}", ctx), "false");
    }

    #[test]
    fn test_bools_render_lowercase_and_none_empty() {
        let ctx = json!({"n": 1, "flag": true, "nothing": null});
        assert_eq!(render("{{ n == 1 }}|{{ n == 2 }}", ctx.clone()), "true|false");
        assert_eq!(render("{{ flag }}", ctx.clone()), "true");
        assert_eq!(render("[{{ nothing }}]", ctx.clone()), "[]");
        assert_eq!(render("{{ flag | base64Encode | base64Decode }}", ctx), "true");
    }

    #[test]
    fn test_index() {
        let ctx = json!({"l": ["x", "y"], "s": "xy"});
        assert_eq!(render("{{ l | index(1) }}", ctx.clone()), "y");
        assert_eq!(render("{{ l | index(5) }}", ctx.clone()), "");
        assert_eq!(render("{{ s | index(0) }}", ctx), "");
    }

    #[test]
    fn test_matches_cron() {
        let ctx = json!({"t": "2024-03-05T09:30:00Z"});
        assert_eq!(render("{{ t | matchesCron('30 9 * * TUE') }}", ctx.clone()), "true");
        assert_eq!(render("{{ t | matchesCron('0 9 * * *') }}", ctx.clone()), "false");
        assert!(env().render_str("{{ t | matchesCron('bad') }}", ctx).is_err());
        assert!(env()
            .render_str("{{ t | matchesCron('* * * * *') }}", json!({"t": "yesterday"}))
            .is_err());
    }

    #[test]
    fn test_whitespace_helpers() {
        let ctx = json!({"t": "a  \t b\n\nc   ", "n": "a\u{00A0}b"});
        assert_eq!(render("{{ t | removedupwhitespaces }}", ctx.clone()), "a b c");
        assert_eq!(render("{{ n | safecopypaste }}", ctx), "a b");
    }

    #[test]
    fn test_base64_is_url_safe_unpadded() {
        assert_eq!(render("{{ '??>' | base64Encode }}", json!({})), "Pz8-");
        assert_eq!(render("{{ 'Pz8-' | base64Decode }}", json!({})), "??>");
        assert!(env().render_str("{{ '***' | base64Decode }}", json!({})).is_err());
    }

    #[test]
    fn test_unmarshal_json() {
        let ctx = json!({"raw": r#"{"id": 7}"#});
        assert_eq!(render("{{ unmarshalJson(raw).id }}", ctx.clone()), "7");
        assert_eq!(render("{{ (raw | unmarshalJson).id }}", ctx), "7");
        assert!(env()
            .render_str("{{ unmarshalJson(raw) }}", json!({"raw": "[1]"}))
            .is_err());
    }

    #[test]
    fn test_random_helpers() {
        for _ in 0..20 {
            let n: i64 = render("{{ randomInt(3) }}", json!({})).parse().unwrap();
            assert!((0..3).contains(&n));
        }
        let alpha = render("{{ randomAlpha(12) }}", json!({}));
        assert_eq!(alpha.len(), 12);
        assert!(alpha.chars().all(|c| c.is_ascii_alphabetic()));
        assert_eq!(render("{{ randomAlpha(0) }}", json!({})), "");

        assert!(env().render_str("{{ randomInt(0) }}", json!({})).is_err());
        assert!(env().render_str("{{ randomAlpha(-1) }}", json!({})).is_err());
    }

    #[test]
    fn test_datastore() {
        assert_eq!(render("{{ datastore('greeting') }}", json!({})), "hello");
        assert_eq!(render("{{ datastore('config').channel }}", json!({})), "#ops");
        assert!(env().render_str("{{ datastore('missing') }}", json!({})).is_err());
    }

    #[test]
    fn test_nested_template() {
        let out = render(
            "{{ template('Hi {{ name | upper }}', {'name': who}) }}",
            json!({"who": "ada"}),
        );
        assert_eq!(out, "Hi ADA");
    }
}

// src/template.rs
//! Prompt template rendering: `{{key}}` placeholders resolved against an
//! ordered variable map with a closed value union. Keys with a leading
//! underscore are reserved for internal plumbing and are never substituted.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid");
    static ref LEFTOVER: Regex = Regex::new(r"\{\{[^}]*\}\}").expect("leftover regex is valid");
}

/// Values a template variable can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Null,
    List(Vec<TemplateValue>),
    Map(Vec<(String, TemplateValue)>),
}

impl TemplateValue {
    pub fn text(value: impl Into<String>) -> Self {
        TemplateValue::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TemplateValue::Null)
    }

    fn is_scalar(&self) -> bool {
        !matches!(self, TemplateValue::List(_) | TemplateValue::Map(_))
    }

    /// Deterministic string form used for substitution. Maps render as
    /// indented `key: value` lines; scalar lists join with commas.
    pub fn render(&self) -> String {
        self.render_with_indent(0)
    }

    fn render_with_indent(&self, indent: usize) -> String {
        match self {
            TemplateValue::Text(text) => text.clone(),
            TemplateValue::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            TemplateValue::Bool(b) => b.to_string(),
            TemplateValue::Null => String::new(),
            TemplateValue::List(items) => {
                if items.iter().all(TemplateValue::is_scalar) {
                    items
                        .iter()
                        .map(TemplateValue::render)
                        .collect::<Vec<_>>()
                        .join(", ")
                } else {
                    items
                        .iter()
                        .map(|item| item.render_with_indent(indent))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            TemplateValue::Map(entries) => {
                let pad = "  ".repeat(indent);
                entries
                    .iter()
                    .map(|(key, value)| match value {
                        TemplateValue::Map(_) => {
                            format!("{pad}{key}:\n{}", value.render_with_indent(indent + 1))
                        }
                        _ => format!("{pad}{key}: {}", value.render()),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    }

    /// Bridge from parsed JSON (phase outputs feed the next phase's inputs).
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => TemplateValue::Null,
            Value::Bool(b) => TemplateValue::Bool(*b),
            Value::Number(n) => TemplateValue::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => TemplateValue::Text(s.clone()),
            Value::Array(items) => {
                TemplateValue::List(items.iter().map(TemplateValue::from_json).collect())
            }
            Value::Object(map) => TemplateValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), TemplateValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            TemplateValue::Text(s) => Value::String(s.clone()),
            TemplateValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            TemplateValue::Bool(b) => Value::Bool(*b),
            TemplateValue::Null => Value::Null,
            TemplateValue::List(items) => {
                Value::Array(items.iter().map(TemplateValue::to_json).collect())
            }
            TemplateValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Ordered key → value map. Insertion order is preserved; setting an
/// existing key replaces its value in place.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    entries: Vec<(String, TemplateValue)>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: TemplateValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&TemplateValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Folds another map in, overwriting shared keys.
    pub fn merge(&mut self, other: &TemplateVars) {
        for (key, value) in &other.entries {
            self.set(key.as_str(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, TemplateValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Substitutes every `{{key}}` occurrence, strips whatever placeholders
/// remain (reserved keys included), and trims the result. Total for any
/// template/variable combination.
pub fn render_template(template: &str, vars: &TemplateVars) -> String {
    let substituted = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let key = &caps[1];
        if key.starts_with('_') {
            return String::new();
        }
        match vars.get(key) {
            Some(value) => value.render(),
            None => String::new(),
        }
    });
    LEFTOVER.replace_all(&substituted, "").trim().to_string()
}

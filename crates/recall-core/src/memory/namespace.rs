//! Namespace templates resolved against per-run values.
//!
//! A segment may contain `{name}` placeholders, e.g. `["memories", "{user_id}"]`
//! or `["team-{team_id}", "notes"]`. Every placeholder must be supplied by the
//! run, and no segment may resolve to an empty string.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MemoryError, Result};

/// Named values available to a single run (user id, thread id, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    values: HashMap<String, String>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context carrying only `user_id`
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self::new().with("user_id", user_id)
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// A parsed piece of a segment
#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Placeholder(String),
}

/// Namespace with placeholders, validated once and resolved per run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceTemplate {
    raw: Vec<String>,
    segments: Vec<Vec<Part>>,
}

impl NamespaceTemplate {
    pub fn parse(segments: &[String]) -> Result<Self> {
        if segments.is_empty() {
            return Err(MemoryError::Namespace(
                "Namespace template must have at least one segment".to_string(),
            ));
        }

        let parsed = segments
            .iter()
            .map(|segment| parse_segment(segment))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: segments.to_vec(),
            segments: parsed,
        })
    }

    /// The template as written
    pub fn segments(&self) -> &[String] {
        &self.raw
    }

    /// Names of all placeholders, in order of appearance
    pub fn placeholders(&self) -> Vec<&str> {
        self.segments
            .iter()
            .flatten()
            .filter_map(|part| match part {
                Part::Placeholder(name) => Some(name.as_str()),
                Part::Literal(_) => None,
            })
            .collect()
    }

    pub fn resolve(&self, run: &RunContext) -> Result<Vec<String>> {
        self.segments
            .iter()
            .zip(&self.raw)
            .map(|(parts, raw)| {
                let mut resolved = String::new();
                for part in parts {
                    match part {
                        Part::Literal(text) => resolved.push_str(text),
                        Part::Placeholder(name) => {
                            let value = run.get(name).ok_or_else(|| {
                                MemoryError::Namespace(format!(
                                    "Missing run value '{}' for namespace segment '{}'",
                                    name, raw
                                ))
                            })?;
                            resolved.push_str(value);
                        }
                    }
                }
                if resolved.is_empty() {
                    return Err(MemoryError::Namespace(format!(
                        "Namespace segment '{}' resolved to an empty string",
                        raw
                    )));
                }
                Ok(resolved)
            })
            .collect()
    }
}

fn parse_segment(segment: &str) -> Result<Vec<Part>> {
    let invalid = |reason: &str| {
        MemoryError::Namespace(format!("Invalid namespace segment '{}': {}", segment, reason))
    };

    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = segment.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    match c {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => return Err(invalid("nested '{'")),
                        c => name.push(c),
                    }
                }
                if !closed {
                    return Err(invalid("unclosed '{'"));
                }
                if name.is_empty() {
                    return Err(invalid("empty placeholder"));
                }
                if !literal.is_empty() {
                    parts.push(Part::Literal(std::mem::take(&mut literal)));
                }
                parts.push(Part::Placeholder(name));
            }
            '}' => return Err(invalid("unmatched '}'")),
            c => literal.push(c),
        }
    }

    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }
    Ok(parts)
}

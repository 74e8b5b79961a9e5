//! Field-path resolution against submitted introspection data or the
//! remote node object.
//!
//! A path is either `data://<dotpath>` (or a bare dotpath, which is the
//! same scheme), or `node://<dotpath>`. A `foo[*]` segment selects every
//! element of whatever sequence `foo` resolves to; everything after it is
//! resolved against each element independently, and the set of results is
//! reduced later according to the condition's `multiple` policy.

use introspector_core::MultiplePolicy;
use serde_json::Value;

use crate::error::{RulesError, RulesResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScheme {
    Data,
    Node,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    pub scheme: FieldScheme,
    pub segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> RulesResult<Self> {
        let (scheme, rest) = if let Some(rest) = raw.strip_prefix("data://") {
            (FieldScheme::Data, rest)
        } else if let Some(rest) = raw.strip_prefix("node://") {
            (FieldScheme::Node, rest)
        } else {
            (FieldScheme::Data, raw)
        };

        if rest.is_empty() {
            return Err(RulesError::MalformedFieldPath {
                path: raw.to_string(),
                reason: "empty path".to_string(),
            });
        }

        Ok(Self {
            scheme,
            segments: rest.split('.').map(|s| s.to_string()).collect(),
        })
    }
}

/// The outcome of resolving a field path against a JSON document.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// No value exists at this path (distinct from a present `null`).
    Missing,
    Values(Vec<Value>),
}

impl Resolved {
    pub fn is_missing(&self) -> bool {
        matches!(self, Resolved::Missing)
    }
}

/// Splits a `name[*]` segment into its bare name and whether it carries the
/// wildcard marker.
fn split_wildcard(segment: &str) -> (&str, bool) {
    match segment.strip_suffix("[*]") {
        Some(name) => (name, true),
        None => (segment, false),
    }
}

/// Resolves `segments` against `root`, expanding `[*]` wildcards into a
/// flattened set of candidate values.
pub fn resolve(root: &Value, segments: &[String]) -> Resolved {
    resolve_inner(std::slice::from_ref(root), segments)
}

fn resolve_inner(current: &[Value], segments: &[String]) -> Resolved {
    let Some((head, tail)) = segments.split_first() else {
        return Resolved::Values(current.to_vec());
    };

    let (name, wildcard) = split_wildcard(head);
    let mut next = Vec::new();
    let mut any_present = false;

    for value in current {
        let Some(field) = value.get(name) else {
            continue;
        };
        any_present = true;

        if wildcard {
            match field.as_array() {
                Some(items) => next.extend(items.iter().cloned()),
                None => {}
            }
        } else {
            next.push(field.clone());
        }
    }

    if !any_present {
        return Resolved::Missing;
    }

    if tail.is_empty() {
        Resolved::Values(next)
    } else {
        resolve_inner(&next, tail)
    }
}

/// Reduces a set of boolean per-element results to a single verdict per the
/// condition's `multiple` policy. An empty set (wildcard matched a field
/// that was an empty sequence) follows the original's `any([]) == False`,
/// `all([]) == True` semantics.
pub fn reduce_multiple(results: &[bool], policy: MultiplePolicy) -> bool {
    match policy {
        MultiplePolicy::Any => results.iter().any(|&b| b),
        MultiplePolicy::All => results.iter().all(|&b| b),
        MultiplePolicy::First => results.first().copied().unwrap_or(false),
        MultiplePolicy::Last => results.last().copied().unwrap_or(false),
    }
}

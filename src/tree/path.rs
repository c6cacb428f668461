//! Fully-qualified paths (FQPs) into a document tree

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use serde_yaml::{Mapping, Value};
use thiserror::Error;

/// One step of a path: a mapping key, optionally followed by a sequence index
///
/// A sequence nested directly inside another sequence gets a step with an empty key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathStep {
    pub key: String,
    pub index: Option<usize>,
}

impl PathStep {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            index: None,
        }
    }

    pub fn indexed(key: impl Into<String>, index: usize) -> Self {
        Self {
            key: key.into(),
            index: Some(index),
        }
    }
}

/// Location of a node, as the ordered list of steps from the document root
///
/// Equality is structural: two documents of the same shape yield the same paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fqp {
    steps: Vec<PathStep>,
}

impl Fqp {
    /// The empty path, addressing the document root
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The key of the last step when it names a mapping field, not a list element
    pub fn last_field(&self) -> Option<&str> {
        self.steps
            .last()
            .filter(|s| s.index.is_none())
            .map(|s| s.key.as_str())
    }

    /// Path of a mapping entry below this node
    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut steps = self.steps.clone();
        steps.push(PathStep::key(key));
        Self { steps }
    }

    /// Path of a sequence element below this node
    pub fn element(&self, index: usize) -> Self {
        let mut steps = self.steps.clone();
        match steps.last_mut() {
            Some(last) if last.index.is_none() => last.index = Some(index),
            _ => steps.push(PathStep::indexed("", index)),
        }
        Self { steps }
    }

    /// Path of the enclosing container, `None` at the root
    pub fn parent(&self) -> Option<Self> {
        let mut steps = self.steps.clone();
        let last = steps.last_mut()?;
        if last.index.is_some() && !last.key.is_empty() {
            last.index = None;
        } else {
            steps.pop();
        }
        Some(Self { steps })
    }

    /// Path of a sibling mapping entry (same parent, different key)
    pub fn sibling(&self, key: impl Into<String>) -> Option<Self> {
        self.parent().map(|p| p.child(key))
    }

    /// Append a path relative to this one
    pub fn join(&self, relative: &Fqp) -> Self {
        let mut out = self.clone();
        for (i, step) in relative.steps.iter().enumerate() {
            if i == 0 && step.key.is_empty() {
                if let Some(index) = step.index {
                    out = out.element(index);
                    continue;
                }
            }
            out.steps.push(step.clone());
        }
        out
    }

    pub fn starts_with(&self, prefix: &Fqp) -> bool {
        self.steps.starts_with(&prefix.steps)
    }
}

impl fmt::Display for Fqp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 && !step.key.is_empty() {
                f.write_str(".")?;
            }
            f.write_str(&step.key)?;
            if let Some(index) = step.index {
                write!(f, "[{}]", index)?;
            }
        }
        Ok(())
    }
}

impl Serialize for Fqp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Error parsing the dotted text form of a path
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid path '{input}': {reason}")]
pub struct PathParseError {
    pub input: String,
    pub reason: String,
}

impl FromStr for Fqp {
    type Err = PathParseError;

    /// Parse `pipeline.stages[0].stage`; keys may not contain `.` or `[`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| PathParseError {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let mut path = Fqp::root();
        if s.is_empty() {
            return Ok(path);
        }

        for segment in s.split('.') {
            let (key, mut rest) = match segment.find('[') {
                Some(pos) => (&segment[..pos], &segment[pos..]),
                None => (segment, ""),
            };
            if key.is_empty() && rest.is_empty() {
                return Err(err("empty segment"));
            }
            if !key.is_empty() || path.is_root() {
                path.steps.push(PathStep::key(key));
            }
            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(|| err("unclosed '['"))?;
                let index = rest[1..close]
                    .parse::<usize>()
                    .map_err(|_| err("index is not a number"))?;
                path = path.element(index);
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(err("unexpected text after index"));
                }
            }
        }
        Ok(path)
    }
}

/// String form of a mapping key
pub fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Every position of a tree, in document pre-order, with lookup by path
#[derive(Debug)]
pub struct PathIndex<'a> {
    entries: Vec<(Fqp, &'a Value)>,
    positions: HashMap<Fqp, usize>,
}

impl<'a> PathIndex<'a> {
    pub fn get(&self, path: &Fqp) -> Option<&'a Value> {
        self.positions.get(path).map(|&i| self.entries[i].1)
    }

    pub fn contains(&self, path: &Fqp) -> bool {
        self.positions.contains_key(path)
    }

    /// Entries in pre-order
    pub fn iter(&self) -> impl Iterator<Item = (&Fqp, &'a Value)> + '_ {
        self.entries.iter().map(|(p, v)| (p, *v))
    }

    /// Scalar positions only
    pub fn leaves(&self) -> impl Iterator<Item = (&Fqp, &'a Value)> + '_ {
        self.iter()
            .filter(|(_, v)| !matches!(v, Value::Mapping(_) | Value::Sequence(_)))
    }

    pub fn paths(&self) -> impl Iterator<Item = &Fqp> + '_ {
        self.entries.iter().map(|(p, _)| p)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Flatten a tree into its containers and leaves, keyed by path
pub fn compute_paths(tree: &Value) -> PathIndex<'_> {
    let mut entries = Vec::new();
    collect(tree, Fqp::root(), &mut entries);
    let positions = entries
        .iter()
        .enumerate()
        .map(|(i, (p, _))| (p.clone(), i))
        .collect();
    PathIndex { entries, positions }
}

fn collect<'a>(value: &'a Value, path: Fqp, out: &mut Vec<(Fqp, &'a Value)>) {
    out.push((path.clone(), value));
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                collect(v, path.child(key_string(k)), out);
            }
        }
        Value::Sequence(seq) => {
            for (i, v) in seq.iter().enumerate() {
                collect(v, path.element(i), out);
            }
        }
        _ => {}
    }
}

/// Follow a path from the root without building an index
pub fn lookup<'a>(tree: &'a Value, path: &Fqp) -> Option<&'a Value> {
    let mut current = tree;
    for step in path.steps() {
        if !step.key.is_empty() {
            current = mapping_get(current.as_mapping()?, &step.key)?;
        }
        if let Some(index) = step.index {
            current = current.as_sequence()?.get(index)?;
        }
    }
    Some(current)
}

/// Mutable variant of [`lookup`]
pub fn lookup_mut<'a>(tree: &'a mut Value, path: &Fqp) -> Option<&'a mut Value> {
    let mut current = tree;
    for step in path.steps() {
        if !step.key.is_empty() {
            current = current
                .as_mapping_mut()?
                .iter_mut()
                .find(|(k, _)| key_string(k) == step.key)
                .map(|(_, v)| v)?;
        }
        if let Some(index) = step.index {
            current = current.as_sequence_mut()?.get_mut(index)?;
        }
    }
    Some(current)
}

fn mapping_get<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.get(key)
        .or_else(|| map.iter().find(|(k, _)| key_string(k) == key).map(|(_, v)| v))
}

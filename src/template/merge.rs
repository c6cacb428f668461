//! Merging supplied inputs into template skeletons
//!
//! Supplied inputs mirror the shape of the skeleton they fill. Only placeholder
//! positions take supplied values; everything else in the skeleton is fixed.
//!
//! Lists merge by position, except *named* lists whose elements all carry an
//! `identifier` (directly, or under a single wrapper key such as `step:`). Those
//! are matched by identifier, and supplied elements the skeleton lacks are appended.

use std::collections::HashMap;

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::ResolveError;
use crate::tree::{key_string, value_text, Fqp, InputPlaceholder};

const IDENTIFIER: &str = "identifier";

/// Fold `supplied` into `skeleton`; `base` is where the skeleton root lands in the output
pub fn merge_inputs(
    skeleton: &Value,
    supplied: Option<&Value>,
    base: &Fqp,
) -> Result<Value, ResolveError> {
    merge_value(skeleton, supplied.filter(|v| !v.is_null()), base)
}

fn merge_value(
    template: &Value,
    supplied: Option<&Value>,
    path: &Fqp,
) -> Result<Value, ResolveError> {
    if let Some(placeholder) = InputPlaceholder::parse(template) {
        return match supplied {
            Some(value) if !value.is_null() => {
                if !placeholder.accepts(value) {
                    return Err(ResolveError::InvalidInputValue {
                        value: value_text(value),
                        allowed: placeholder.allowed_values.clone().unwrap_or_default(),
                        fqp: path.clone(),
                    });
                }
                Ok(value.clone())
            }
            _ => Ok(placeholder.fallback()),
        };
    }

    match template {
        Value::Mapping(map) => {
            let supplied_map = supplied.and_then(Value::as_mapping);
            let mut out = Mapping::with_capacity(map.len());
            for (key, child) in map {
                let child_path = path.child(key_string(key));
                let child_supplied = supplied_map.and_then(|m| m.get(key));
                out.insert(key.clone(), merge_value(child, child_supplied, &child_path)?);
            }
            if let Some(extra) = supplied_map {
                for key in extra.keys().filter(|k| !map.contains_key(*k)) {
                    debug!(path = %path, key = %key_string(key), "ignoring input with no matching placeholder");
                }
            }
            Ok(Value::Mapping(out))
        }
        Value::Sequence(seq) if is_named_list(seq) => {
            merge_named_list(seq, supplied.and_then(Value::as_sequence), path)
        }
        Value::Sequence(seq) => {
            let supplied_seq = supplied.and_then(Value::as_sequence);
            let merged = seq
                .iter()
                .enumerate()
                .map(|(i, child)| {
                    let child_supplied = supplied_seq.and_then(|s| s.get(i));
                    merge_value(child, child_supplied, &path.element(i))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Sequence(merged))
        }
        other => Ok(other.clone()),
    }
}

fn merge_named_list(
    template: &[Value],
    supplied: Option<&Vec<Value>>,
    path: &Fqp,
) -> Result<Value, ResolveError> {
    let mut by_id: HashMap<&str, &Value> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for element in supplied.into_iter().flatten() {
        let Some(id) = element_identifier(element) else {
            debug!(path = %path, "ignoring unnamed input in a named list");
            continue;
        };
        if by_id.insert(id, element).is_some() {
            return Err(ResolveError::AmbiguousInputMerge {
                identifier: id.to_string(),
                fqp: path.clone(),
            });
        }
        order.push(id);
    }

    let mut merged = Vec::with_capacity(template.len());
    for (i, element) in template.iter().enumerate() {
        let id = element_identifier(element);
        let element_supplied = id.and_then(|id| by_id.get(id).copied());
        merged.push(merge_value(element, element_supplied, &path.element(i))?);
    }

    let known: Vec<&str> = template.iter().filter_map(element_identifier).collect();
    for id in order.into_iter().filter(|id| !known.contains(id)) {
        merged.push(by_id[id].clone());
    }
    Ok(Value::Sequence(merged))
}

/// Identifier of a list element: `{identifier: x, ..}` or `{step: {identifier: x, ..}}`
fn element_identifier(element: &Value) -> Option<&str> {
    let map = element.as_mapping()?;
    if let Some(id) = map.get(IDENTIFIER).and_then(Value::as_str) {
        return Some(id);
    }
    if map.len() == 1 {
        let (_, inner) = map.iter().next()?;
        return inner.get(IDENTIFIER).and_then(Value::as_str);
    }
    None
}

fn is_named_list(seq: &[Value]) -> bool {
    !seq.is_empty() && seq.iter().all(|e| element_identifier(e).is_some())
}

/// Prune a skeleton down to the inputs a caller can supply
///
/// Keeps placeholders, the containers leading to them, and `identifier` keys of
/// named-list elements. `None` if the skeleton takes no inputs.
pub fn input_schema(skeleton: &Value) -> Option<Value> {
    if InputPlaceholder::is_placeholder(skeleton) {
        return Some(skeleton.clone());
    }
    match skeleton {
        Value::Mapping(map) => mapping_schema(map).map(Value::Mapping),
        Value::Sequence(seq) if is_named_list(seq) => {
            let kept: Vec<Value> = seq.iter().filter_map(input_schema).collect();
            (!kept.is_empty()).then_some(Value::Sequence(kept))
        }
        Value::Sequence(seq) => {
            let kept: Vec<Option<Value>> = seq.iter().map(input_schema).collect();
            if kept.iter().all(Option::is_none) {
                return None;
            }
            Some(Value::Sequence(
                kept.into_iter().map(|v| v.unwrap_or(Value::Null)).collect(),
            ))
        }
        _ => None,
    }
}

fn mapping_schema(map: &Mapping) -> Option<Mapping> {
    let mut out = Mapping::new();
    for (key, child) in map {
        if let Some(schema) = input_schema(child) {
            out.insert(key.clone(), schema);
        }
    }
    if out.is_empty() {
        return None;
    }
    Some(with_identifier(map, out))
}

/// Put the source mapping's `identifier` first so named elements stay matchable
fn with_identifier(source: &Mapping, kept: Mapping) -> Mapping {
    match source.get(IDENTIFIER) {
        Some(id) if !kept.contains_key(IDENTIFIER) => {
            let mut out = Mapping::with_capacity(kept.len() + 1);
            out.insert(Value::String(IDENTIFIER.to_string()), id.clone());
            out.extend(kept);
            out
        }
        _ => kept,
    }
}

/// Carry previously supplied inputs over to a new template version's input schema
///
/// A value survives only where the new schema has a placeholder at the same path and
/// the previous inputs hold a concrete value there. Paths the new schema dropped are
/// discarded; paths it added are left out for the caller to fill. `None` when nothing
/// carries over.
pub fn retain_variables(new_schema: &Value, previous: &Value) -> Option<Value> {
    retain(new_schema, Some(previous))
}

fn retain(schema: &Value, previous: Option<&Value>) -> Option<Value> {
    let previous = previous.filter(|v| !v.is_null())?;
    if InputPlaceholder::is_placeholder(schema) {
        return (!InputPlaceholder::is_placeholder(previous)).then(|| previous.clone());
    }
    match schema {
        Value::Mapping(map) => {
            let prev_map = previous.as_mapping()?;
            let mut out = Mapping::new();
            for (key, child) in map {
                if let Some(kept) = retain(child, prev_map.get(key)) {
                    out.insert(key.clone(), kept);
                }
            }
            (!out.is_empty()).then(|| Value::Mapping(with_identifier(map, out)))
        }
        Value::Sequence(seq) if is_named_list(seq) => {
            let prev_seq = previous.as_sequence()?;
            let kept: Vec<Value> = seq
                .iter()
                .filter_map(|element| {
                    let id = element_identifier(element)?;
                    let prev = prev_seq
                        .iter()
                        .find(|p| element_identifier(p) == Some(id))?;
                    retain(element, Some(prev))
                })
                .collect();
            (!kept.is_empty()).then_some(Value::Sequence(kept))
        }
        Value::Sequence(seq) => {
            let prev_seq = previous.as_sequence()?;
            let kept: Vec<Option<Value>> = seq
                .iter()
                .enumerate()
                .map(|(i, element)| retain(element, prev_seq.get(i)))
                .collect();
            if kept.iter().all(Option::is_none) {
                return None;
            }
            Some(Value::Sequence(
                kept.into_iter().map(|v| v.unwrap_or(Value::Null)).collect(),
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_supplied_value_replaces_placeholder() {
        let skeleton = yaml("type: Deployment\nspec:\n  env: <+input>\n  replicas: 2\n");
        let merged =
            merge_inputs(&skeleton, Some(&yaml("spec:\n  env: prod\n")), &Fqp::root()).unwrap();
        assert_eq!(merged, yaml("type: Deployment\nspec:\n  env: prod\n  replicas: 2\n"));
    }

    #[test]
    fn test_fixed_fields_ignore_inputs() {
        let skeleton = yaml("type: Deployment\nenv: <+input>\n");
        let merged = merge_inputs(
            &skeleton,
            Some(&yaml("type: Custom\nenv: qa\nunknown: 1\n")),
            &Fqp::root(),
        )
        .unwrap();
        assert_eq!(merged, yaml("type: Deployment\nenv: qa\n"));
    }

    #[test]
    fn test_defaults_and_unresolved_placeholders() {
        let skeleton = yaml("env: <+input>.default(dev)\nregion: <+input>\n");
        let merged = merge_inputs(&skeleton, None, &Fqp::root()).unwrap();
        assert_eq!(merged, yaml("env: dev\nregion: <+input>\n"));
    }

    #[test]
    fn test_allowed_values_enforced() {
        let skeleton = yaml("env: <+input>.allowedValues(dev,prod)\n");
        let err = merge_inputs(&skeleton, Some(&yaml("env: qa")), &"stage".parse().unwrap())
            .unwrap_err();
        match err {
            ResolveError::InvalidInputValue { value, fqp, .. } => {
                assert_eq!(value, "qa");
                assert_eq!(fqp.to_string(), "stage.env");
            }
            other => panic!("Expected InvalidInputValue, got {:?}", other),
        }
    }

    #[test]
    fn test_structured_input_replaces_placeholder() {
        let skeleton = yaml("variables: <+input>\n");
        let merged = merge_inputs(
            &skeleton,
            Some(&yaml("variables:\n  - name: a\n    value: 1\n")),
            &Fqp::root(),
        )
        .unwrap();
        assert_eq!(merged, yaml("variables:\n  - name: a\n    value: 1\n"));
    }

    #[test]
    fn test_positional_list_merge() {
        let skeleton = yaml("hosts:\n  - <+input>\n  - fixed\n  - <+input>\n");
        let merged = merge_inputs(
            &skeleton,
            Some(&yaml("hosts:\n  - a\n  - ignored\n")),
            &Fqp::root(),
        )
        .unwrap();
        assert_eq!(merged, yaml("hosts:\n  - a\n  - fixed\n  - <+input>\n"));
    }

    #[test]
    fn test_named_list_matches_by_identifier_and_appends() {
        let skeleton = yaml(
            r#"
steps:
  - step:
      identifier: build
      timeout: <+input>
  - step:
      identifier: test
      timeout: 5m
"#,
        );
        let supplied = yaml(
            r#"
steps:
  - step:
      identifier: extra
      timeout: 1m
  - step:
      identifier: build
      timeout: 10m
"#,
        );
        let merged = merge_inputs(&skeleton, Some(&supplied), &Fqp::root()).unwrap();
        assert_eq!(
            merged,
            yaml(
                r#"
steps:
  - step:
      identifier: build
      timeout: 10m
  - step:
      identifier: test
      timeout: 5m
  - step:
      identifier: extra
      timeout: 1m
"#
            )
        );
    }

    #[test]
    fn test_duplicate_identifier_is_ambiguous() {
        let skeleton = yaml("steps:\n  - identifier: build\n    timeout: <+input>\n");
        let supplied = yaml(
            "steps:\n  - identifier: build\n    timeout: 1m\n  - identifier: build\n    timeout: 2m\n",
        );
        let err = merge_inputs(&skeleton, Some(&supplied), &Fqp::root()).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::AmbiguousInputMerge { ref identifier, .. } if identifier == "build"
        ));
    }

    #[test]
    fn test_input_schema() {
        let skeleton = yaml(
            r#"
type: Deployment
spec:
  env: <+input>
  replicas: 2
  steps:
    - step:
        identifier: build
        name: Build
        timeout: <+input>.default(5m)
    - step:
        identifier: fixed
        timeout: 1m
"#,
        );
        let schema = input_schema(&skeleton).unwrap();
        assert_eq!(
            schema,
            yaml(
                r#"
spec:
  env: <+input>
  steps:
    - step:
        identifier: build
        timeout: <+input>.default(5m)
"#
            )
        );
        assert_eq!(input_schema(&yaml("type: Fixed\n")), None);
    }

    #[test]
    fn test_retain_variables_drops_removed_and_skips_added() {
        let new_schema = yaml("a: <+input>\nc: <+input>\n");
        let previous = yaml("a: x\nb: y\n");
        assert_eq!(retain_variables(&new_schema, &previous), Some(yaml("a: x\n")));
    }

    #[test]
    fn test_retain_variables_named_lists() {
        let new_schema = yaml(
            "steps:\n  - step:\n      identifier: build\n      timeout: <+input>\n  - step:\n      identifier: deploy\n      region: <+input>\n",
        );
        let previous = yaml(
            "steps:\n  - step:\n      identifier: build\n      timeout: 10m\n  - step:\n      identifier: gone\n      timeout: 1m\n",
        );
        assert_eq!(
            retain_variables(&new_schema, &previous),
            Some(yaml(
                "steps:\n  - step:\n      identifier: build\n      timeout: 10m\n"
            ))
        );
    }

    #[test]
    fn test_retain_skips_unfilled_placeholders() {
        let new_schema = yaml("a: <+input>\n");
        assert_eq!(retain_variables(&new_schema, &yaml("a: <+input>\n")), None);
        assert_eq!(retain_variables(&new_schema, &yaml("b: 1\n")), None);
    }
}

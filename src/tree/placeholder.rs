//! Runtime-input placeholders inside template bodies
//!
//! A placeholder is a string scalar starting with `<+input>`, optionally followed by
//! modifiers: `<+input>.default(dev)`, `<+input>.allowedValues(dev,prod)`.
//! Unknown modifiers are kept verbatim and otherwise ignored.

use serde_yaml::Value;

/// Marker that opens every input placeholder
pub const INPUT_MARKER: &str = "<+input>";

/// A parsed input placeholder
#[derive(Debug, Clone, PartialEq)]
pub struct InputPlaceholder {
    raw: String,
    /// Value used when the caller supplies nothing
    pub default: Option<Value>,
    /// Accepted values, if the template restricts them
    pub allowed_values: Option<Vec<String>>,
}

impl InputPlaceholder {
    /// Parse a value as a placeholder; `None` if it is not one
    pub fn parse(value: &Value) -> Option<Self> {
        let raw = value.as_str()?;
        let mut rest = raw.trim().strip_prefix(INPUT_MARKER)?;

        let mut default = None;
        let mut allowed_values = None;

        while let Some(after_dot) = rest.strip_prefix('.') {
            let Some(open) = after_dot.find('(') else {
                break;
            };
            let Some(close) = after_dot[open..].find(')').map(|c| c + open) else {
                break;
            };
            let name = &after_dot[..open];
            let args = &after_dot[open + 1..close];
            match name {
                "default" => default = Some(scalar_from_text(args.trim())),
                "allowedValues" => {
                    allowed_values = Some(
                        args.split(',')
                            .map(|a| a.trim().to_string())
                            .filter(|a| !a.is_empty())
                            .collect(),
                    )
                }
                _ => {}
            }
            rest = &after_dot[close + 1..];
        }

        Some(Self {
            raw: raw.to_string(),
            default,
            allowed_values,
        })
    }

    pub fn is_placeholder(value: &Value) -> bool {
        value
            .as_str()
            .map(|s| s.trim().starts_with(INPUT_MARKER))
            .unwrap_or(false)
    }

    /// The placeholder text as written in the template
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// What the placeholder becomes when no value is supplied
    pub fn fallback(&self) -> Value {
        match &self.default {
            Some(v) => v.clone(),
            None => Value::String(self.raw.clone()),
        }
    }

    /// Whether a supplied value satisfies `allowedValues`
    ///
    /// Expressions (`<+...>`) are evaluated at runtime and always pass here.
    pub fn accepts(&self, value: &Value) -> bool {
        let Some(allowed) = &self.allowed_values else {
            return true;
        };
        match scalar_text(value) {
            Some(text) if text.starts_with("<+") => true,
            Some(text) => allowed.iter().any(|a| *a == text),
            None => false,
        }
    }
}

/// Text of a scalar as it would appear in YAML
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Text of any value, for messages
pub(crate) fn value_text(value: &Value) -> String {
    scalar_text(value).unwrap_or_else(|| {
        serde_yaml::to_string(value)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default()
    })
}

fn scalar_from_text(text: &str) -> Value {
    match serde_yaml::from_str::<Value>(text) {
        Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::String(_))) => v,
        _ => Value::String(text.to_string()),
    }
}

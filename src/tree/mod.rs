//! Ordered-tree model for template documents
//!
//! Documents are plain `serde_yaml::Value` trees: mappings keep insertion order and
//! sequences keep index order. This module adds positional addressing (fully-qualified
//! paths) and recognition of input placeholders on top of that value model.

mod path;
mod placeholder;

pub use path::{compute_paths, key_string, lookup, lookup_mut, Fqp, PathIndex, PathParseError, PathStep};
pub use placeholder::{InputPlaceholder, INPUT_MARKER};
pub(crate) use placeholder::value_text;

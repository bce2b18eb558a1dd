//! JSON-tree projector: projects an arbitrary `serde_json::Value`
//! into a directory/file subtree. Objects become directories keyed by their
//! member names, arrays become directories with zero-padded decimal indices,
//! and primitives become read-only files whose content is the value's
//! textual form plus a trailing newline.
//!
//! A configurable set of "stringified fields" names object members whose
//! string value is itself JSON to be parsed and projected recursively (used
//! for `llm_data`/`usage_data` on message nodes).
//!
//! Pure and deterministic: identical input trees produce identical layouts,
//! and node ordering matches the source JSON's insertion order. This relies
//! on the `preserve_order` feature on `serde_json` (enabled in `Cargo.toml`):
//! without it `Value::Object` is a `BTreeMap` and iterates alphabetically,
//! not in wire order.

use serde_json::Value;

/// One entry in a projected directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub node: ProjectedNode,
}

/// A node in the projected tree. `File` content already has its trailing
/// newline; `Dir` entries preserve the projector's insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectedNode {
    File(Vec<u8>),
    Dir(Vec<Entry>),
}

/// Names of object fields whose string value is itself JSON and should be
/// parsed and projected recursively rather than emitted as a plain file.
#[derive(Debug, Clone, Default)]
pub struct StringifiedFields {
    names: Vec<String>,
}

impl StringifiedFields {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, field: &str) -> bool {
        self.names.iter().any(|n| n == field)
    }
}

/// Project `value` into a tree of directories and files. `field_name` is the
/// object key this value was reached through (if any) so stringified-field
/// unpacking can be applied at the right level; pass `None` at the root.
pub fn project(value: &Value, field_name: Option<&str>, stringified: &StringifiedFields) -> ProjectedNode {
    if let (Some(name), Value::String(s)) = (field_name, value) {
        if stringified.matches(name) {
            if let Ok(nested) = serde_json::from_str::<Value>(s) {
                return project(&nested, None, stringified);
            }
        }
    }

    match value {
        Value::Object(map) => {
            let entries = map
                .iter()
                .map(|(k, v)| Entry {
                    name: k.clone(),
                    node: project(v, Some(k.as_str()), stringified),
                })
                .collect();
            ProjectedNode::Dir(entries)
        }
        Value::Array(items) => {
            let width = index_width(items.len());
            let entries = items
                .iter()
                .enumerate()
                .map(|(i, v)| Entry {
                    name: format!("{i:0width$}", width = width),
                    node: project(v, None, stringified),
                })
                .collect();
            ProjectedNode::Dir(entries)
        }
        Value::String(s) => ProjectedNode::File(format!("{s}\n").into_bytes()),
        Value::Number(n) => ProjectedNode::File(format!("{n}\n").into_bytes()),
        Value::Bool(b) => ProjectedNode::File(format!("{b}\n").into_bytes()),
        Value::Null => ProjectedNode::File(b"null\n".to_vec()),
    }
}

/// Zero-padded width needed so lexicographic and numeric sort agree, e.g. 10
/// items -> width 2 (`00`..`09`), 100 items -> width 3. Boundary cases worth
/// keeping straight: 1, 9, 10, 99, 100, 999.
pub fn index_width(len: usize) -> usize {
    if len <= 1 {
        1
    } else {
        (len - 1).to_string().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primitives_become_files_with_newline() {
        let node = project(&json!("hello"), None, &StringifiedFields::default());
        assert_eq!(node, ProjectedNode::File(b"hello\n".to_vec()));
    }

    #[test]
    fn object_preserves_key_order() {
        let value = json!({"b": 1, "a": 2});
        let node = project(&value, None, &StringifiedFields::default());
        match node {
            ProjectedNode::Dir(entries) => {
                assert_eq!(entries[0].name, "b");
                assert_eq!(entries[1].name, "a");
            }
            _ => panic!("expected dir"),
        }
    }

    #[test]
    fn array_indices_are_zero_padded() {
        let value = json!(["a"; 10]);
        let node = project(&value, None, &StringifiedFields::default());
        match node {
            ProjectedNode::Dir(entries) => {
                assert_eq!(entries[0].name, "00");
                assert_eq!(entries[9].name, "09");
            }
            _ => panic!("expected dir"),
        }
    }

    #[test]
    fn index_width_boundaries() {
        assert_eq!(index_width(1), 1);
        assert_eq!(index_width(9), 1);
        assert_eq!(index_width(10), 2);
        assert_eq!(index_width(99), 2);
        assert_eq!(index_width(100), 3);
        assert_eq!(index_width(999), 3);
    }

    #[test]
    fn numeric_string_key_projects_correctly() {
        let value = json!({"42": "answer"});
        let node = project(&value, None, &StringifiedFields::default());
        match node {
            ProjectedNode::Dir(entries) => {
                assert_eq!(entries[0].name, "42");
            }
            _ => panic!("expected dir"),
        }
    }

    #[test]
    fn stringified_field_is_parsed_and_projected() {
        let value = json!({"usage_data": "{\"tokens\": 42}"});
        let stringified = StringifiedFields::new(["usage_data"]);
        let node = project(&value, None, &stringified);
        match node {
            ProjectedNode::Dir(entries) => {
                assert_eq!(entries[0].name, "usage_data");
                match &entries[0].node {
                    ProjectedNode::Dir(inner) => assert_eq!(inner[0].name, "tokens"),
                    _ => panic!("expected nested dir"),
                }
            }
            _ => panic!("expected dir"),
        }
    }

    #[test]
    fn non_json_stringified_field_falls_back_to_plain_file() {
        let value = json!({"llm_data": "not json"});
        let stringified = StringifiedFields::new(["llm_data"]);
        let node = project(&value, None, &stringified);
        match node {
            ProjectedNode::Dir(entries) => {
                assert_eq!(entries[0].node, ProjectedNode::File(b"not json\n".to_vec()));
            }
            _ => panic!("expected dir"),
        }
    }

    #[test]
    fn identical_trees_produce_identical_layouts() {
        let value = json!({"a": [1, 2, {"b": "c"}]});
        let a = project(&value, None, &StringifiedFields::default());
        let b = project(&value, None, &StringifiedFields::default());
        assert_eq!(a, b);
    }
}

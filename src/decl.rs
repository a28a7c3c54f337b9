//! Declarative schema descriptors.
//!
//! A schema arrives as one JSON document, discriminated on the `base` key:
//!
//! ```json
//! {
//!   "types": [
//!     { "base": "object", "name": "tree",
//!       "value": "int", "mod_three": "mod_three",
//!       "left": "optional[tree]", "right": "optional[tree]" },
//!     { "base": "enum", "name": "mod_three", "options": ["zero", "one", "two"] },
//!     { "base": "optional", "type": "tree" }
//!   ]
//! }
//! ```
//!
//! Object fields are every key besides `name`/`base`, captured in declaration
//! order (`IndexMap` + serde_json's `preserve_order`); that order is the
//! canonical traversal order for the whole codec, so it must survive parsing.

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::SchemaError;

/// One declarative type descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "base", rename_all = "lowercase")]
pub enum Descriptor {
    /// Named record; every remaining key maps a field name to a
    /// type-reference string, in declaration order.
    Object {
        name: String,
        #[serde(flatten)]
        fields: IndexMap<String, String>,
    },
    /// Named closed set of option tags; exactly one is selected per instance.
    Enum { name: String, options: Vec<String> },
    /// Wrapper around one inner reference; registers as `optional[<type>]`.
    Optional {
        #[serde(rename = "type")]
        inner: String,
    },
}

/// The top-level wire shape: an ordered list of descriptors. Index 0 is the
/// schema's root type.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaDoc {
    pub types: Vec<Descriptor>,
}

/// Deserialize a descriptor document with JSON-path context in error
/// messages, so a bad `base` tag or field shape points at the exact node.
pub fn from_json_with_path(src: &str) -> Result<SchemaDoc, SchemaError> {
    let de = &mut serde_json::Deserializer::from_str(src);
    match serde_path_to_error::deserialize::<_, SchemaDoc>(de) {
        Ok(doc) => Ok(doc),
        Err(err) => {
            let path = err.path().to_string();
            Err(SchemaError::Parse {
                path,
                message: err.into_inner().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE_DOC: &str = r#"{
        "types": [
            { "base": "object", "name": "tree",
              "value": "int", "mod_three": "mod_three",
              "left": "optional[tree]", "right": "optional[tree]" },
            { "base": "enum", "name": "mod_three", "options": ["zero", "one", "two"] },
            { "base": "optional", "type": "tree" }
        ]
    }"#;

    #[test]
    fn parses_the_reference_document() {
        let doc = from_json_with_path(REFERENCE_DOC).unwrap();
        assert_eq!(doc.types.len(), 3);

        let Descriptor::Object { name, fields } = &doc.types[0] else {
            panic!("first descriptor must be the object");
        };
        assert_eq!(name, "tree");
        // declaration order, not alphabetical
        let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
        assert_eq!(keys, ["value", "mod_three", "left", "right"]);
        assert_eq!(fields["left"], "optional[tree]");

        let Descriptor::Enum { options, .. } = &doc.types[1] else {
            panic!("second descriptor must be the enum");
        };
        assert_eq!(options, &["zero", "one", "two"]);

        let Descriptor::Optional { inner } = &doc.types[2] else {
            panic!("third descriptor must be the optional");
        };
        assert_eq!(inner, "tree");
    }

    #[test]
    fn unknown_base_tag_is_a_parse_error() {
        let src = r#"{ "types": [ { "base": "struct", "name": "x" } ] }"#;
        let err = from_json_with_path(src).unwrap_err();
        let SchemaError::Parse { message, .. } = err else {
            panic!("expected a parse error, got {err:?}");
        };
        assert!(message.contains("struct"), "message names the bad tag: {message}");
    }

    #[test]
    fn invalid_json_reports_a_path() {
        let src = r#"{ "types": [ { "base": "enum", "name": "e", "options": "nope" } ] }"#;
        let err = from_json_with_path(src).unwrap_err();
        let SchemaError::Parse { path, .. } = err else {
            panic!("expected a parse error, got {err:?}");
        };
        assert!(path.contains("types"), "path points into the document: {path}");
    }
}

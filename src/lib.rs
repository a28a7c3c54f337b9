//! Schema-driven structural codec for recursive tree-shaped data.
//!
//! Three pieces, one data flow:
//! - a **schema registry** ([`schema::Schema`]) resolving declarative type
//!   descriptors (object / enum / optional / base, possibly self-referential)
//!   into an immutable handle table plus a finite decision-state table;
//! - a **tree codec** ([`codec`]) turning conforming instances into ordered
//!   (state, output) decision sequences and back, along one canonical
//!   traversal;
//! - a **batch padder** ([`padder`]) rectangularizing ragged token sequences
//!   into model-facing arrays and inverting that transform exactly.
//!
//! Design goals:
//! - References resolve to handles, never inlined copies, so `tree` may
//!   contain `optional[tree]` without unbounded expansion.
//! - Encode and decode share one recursive traversal; order symmetry is the
//!   correctness backbone.
//! - Recorded counts, not fill-value scanning, separate real data from
//!   padding.
//! - Everything after schema construction is a pure transform over a
//!   read-only schema, safe to run in parallel per example or per batch.

pub mod codec;
pub mod decl;
pub mod error;
pub mod padder;
pub mod schema;

pub use codec::{
    Output, Token, TokenCursor, decode, decode_batch, decode_or_else, encode, encode_batch,
};
pub use decl::{Descriptor, SchemaDoc};
pub use error::{DecodeError, EncodeError, PadError, SchemaError};
pub use padder::{FILL, PaddedBatch, pad, unpad, unpad_all};
pub use schema::{BaseKind, FieldDef, Schema, StateId, StateInfo, StateKind, TypeDef, TypeId};

// ------------------------------ Test fixtures ------------------------------ //

#[cfg(test)]
pub(crate) mod testutil {
    use serde_json::{Value, json};

    use crate::schema::{Schema, StateId};

    /// The worked example the codec was designed around: product trees over
    /// prime factorizations, with a derived `mod three` tag per node.
    pub const TREE_SCHEMA: &str = r#"{
        "types": [
            { "base": "object", "name": "tree",
              "value": "int", "mod_three": "mod_three",
              "left": "optional[tree]", "right": "optional[tree]" },
            { "base": "enum", "name": "mod_three", "options": ["zero", "one", "two"] },
            { "base": "optional", "type": "tree" }
        ]
    }"#;

    pub fn tree_schema() -> Schema {
        Schema::from_json(TREE_SCHEMA).unwrap()
    }

    pub fn state_id(schema: &Schema, name: &str) -> StateId {
        let index = schema
            .states()
            .iter()
            .position(|s| s.name == name)
            .unwrap_or_else(|| panic!("no state named `{name}`"));
        StateId(index as u32)
    }

    pub fn node(value: i64, left: Value, right: Value) -> Value {
        let tag = ["zero", "one", "two"][value.rem_euclid(3) as usize];
        json!({ "value": value, "mod_three": tag, "left": left, "right": right })
    }

    pub fn leaf(value: i64) -> Value {
        node(value, Value::Null, Value::Null)
    }

    /// Balanced-ish product tree over the prime factors of `x` (x >= 2):
    /// leaves are primes, inner nodes the product of their children.
    pub fn factor_tree(x: i64) -> Value {
        let mut nodes: Vec<Value> = prime_factors(x).into_iter().map(leaf).collect();
        while nodes.len() > 1 {
            let mut merged = Vec::with_capacity(nodes.len().div_ceil(2));
            for pair in nodes.chunks(2) {
                match pair {
                    [a, b] => {
                        let product = a["value"].as_i64().unwrap() * b["value"].as_i64().unwrap();
                        merged.push(node(product, a.clone(), b.clone()));
                    }
                    [a] => merged.push(a.clone()),
                    _ => unreachable!(),
                }
            }
            nodes = merged;
        }
        nodes.pop().unwrap()
    }

    fn prime_factors(mut x: i64) -> Vec<i64> {
        let mut factors = Vec::new();
        let mut i = 2;
        while i <= x {
            if x % i == 0 {
                factors.push(i);
                x /= i;
            } else {
                i += 1;
            }
        }
        factors
    }
}

// --------------------------------- Tests ----------------------------------- //

//! Tree codec: encode instances into ordered (state, output) decision steps
//! and decode such sequences back, against one shared read-only schema.
//!
//! Encode and decode are written against the identical recursive traversal —
//! declared field order for objects, presence-then-inner for optionals — so a
//! decode cursor always lines up with the tokens an encode of the same type
//! would have produced. That order symmetry is the correctness backbone of
//! the whole module; neither side holds state across calls.
//!
//! Instances are `serde_json::Value` trees: objects for objects, option-tag
//! strings for enums, numbers/bools for base scalars, `null` for an absent
//! optional.

use rayon::prelude::*;
use serde_json::{Map, Value};

use crate::error::{DecodeError, EncodeError};
use crate::schema::{BaseKind, Schema, StateId, TypeDef, TypeId};

// -------------------------------- Tokens ----------------------------------- //

/// One decision step: which state asked, what was answered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token {
    pub state: StateId,
    pub output: Output,
}

/// The realized decision at one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Output {
    Int(i64),
    Float(f64),
    Flag(bool),
    Choice(u32),
}

impl Output {
    /// Lenient readings: decode also consumes model-generated sequences, so
    /// every variant must be interpretable at every step kind. Tokens that
    /// came out of `encode` always hit the exact arm.
    pub fn as_i64(self) -> i64 {
        match self {
            Output::Int(v) => v,
            Output::Float(v) => v.round() as i64,
            Output::Flag(b) => b as i64,
            Output::Choice(k) => k as i64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Output::Int(v) => v as f64,
            Output::Float(v) => v,
            Output::Flag(b) => b as i64 as f64,
            Output::Choice(k) => k as f64,
        }
    }

    pub fn as_flag(self) -> bool {
        match self {
            Output::Flag(b) => b,
            Output::Int(v) => v != 0,
            Output::Float(v) => v >= 0.5,
            Output::Choice(k) => k != 0,
        }
    }

    /// Clamped into `0..options`; `options` is at least 1 for any registered
    /// enum.
    pub fn as_choice(self, options: usize) -> usize {
        let raw = match self {
            Output::Choice(k) => k as i64,
            other => other.as_i64(),
        };
        raw.clamp(0, options as i64 - 1) as usize
    }
}

// -------------------------------- Cursor ----------------------------------- //

/// Forward-only, non-restartable view over a token buffer. The explicit
/// "no more tokens" signal is `DecodeError::SequenceExhausted`.
#[derive(Debug)]
pub struct TokenCursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Consume the next token, or fail if the sequence is spent.
    pub fn take(&mut self) -> Result<Token, DecodeError> {
        let tok = self
            .tokens
            .get(self.pos)
            .copied()
            .ok_or(DecodeError::SequenceExhausted)?;
        self.pos += 1;
        Ok(tok)
    }

    pub fn consumed(&self) -> usize {
        self.pos
    }
}

// -------------------------------- Encode ----------------------------------- //

/// Encode one instance of the schema's root type into its ordered token
/// sequence. Single pass, always finite: the instance is finite and every
/// node emits at most one token plus its children's tokens.
pub fn encode(schema: &Schema, value: &Value) -> Result<Vec<Token>, EncodeError> {
    let mut out = Vec::new();
    encode_value(schema, schema.root(), schema.root_steps(), value, &mut out)?;
    Ok(out)
}

/// Encode many instances in parallel; the schema is shared strictly
/// read-only, so per-example encodes are independent.
pub fn encode_batch(schema: &Schema, values: &[Value]) -> Result<Vec<Vec<Token>>, EncodeError> {
    values.par_iter().map(|v| encode(schema, v)).collect()
}

fn encode_value(
    schema: &Schema,
    ty: TypeId,
    steps: &[StateId],
    value: &Value,
    out: &mut Vec<Token>,
) -> Result<(), EncodeError> {
    // `steps` is the spine chain for this position: non-empty for every
    // token-emitting kind by construction (schema::assign_states).
    match schema.ty(ty) {
        TypeDef::Object { name, fields } => {
            let Some(map) = value.as_object() else {
                return Err(mismatch(name, "object", value));
            };
            for field in fields {
                // a missing key reads as null, which an optional field
                // encodes as absent and anything else rejects
                let child = map.get(&field.name).unwrap_or(&Value::Null);
                encode_value(schema, field.ty, &field.steps, child, out)?;
            }
        }
        TypeDef::Enum { name, options } => {
            let Some(tag) = value.as_str() else {
                return Err(mismatch(name, "option tag string", value));
            };
            let Some(k) = options.iter().position(|o| o == tag) else {
                return Err(EncodeError::UnknownOption {
                    name: name.clone(),
                    tag: tag.to_string(),
                });
            };
            out.push(Token {
                state: steps[0],
                output: Output::Choice(k as u32),
            });
        }
        TypeDef::Optional { inner, .. } => {
            let present = !value.is_null();
            out.push(Token {
                state: steps[0],
                output: Output::Flag(present),
            });
            if present {
                encode_value(schema, *inner, &steps[1..], value, out)?;
            }
        }
        TypeDef::Base { name, kind } => {
            let output = match kind {
                BaseKind::Int => Output::Int(
                    value.as_i64().ok_or_else(|| mismatch(name, "integer", value))?,
                ),
                BaseKind::Float => Output::Float(
                    value.as_f64().ok_or_else(|| mismatch(name, "number", value))?,
                ),
                BaseKind::Bool => Output::Flag(
                    value.as_bool().ok_or_else(|| mismatch(name, "boolean", value))?,
                ),
            };
            out.push(Token {
                state: steps[0],
                output,
            });
        }
    }
    Ok(())
}

fn mismatch(at: &str, expected: &'static str, got: &Value) -> EncodeError {
    EncodeError::Mismatch {
        at: at.to_string(),
        expected,
        got: kind_name(got),
    }
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// -------------------------------- Decode ----------------------------------- //

/// Decode a token sequence back into an instance of the schema's root type.
/// Consumes tokens front-to-back in exactly the encode order; trailing
/// unconsumed tokens are ignored (a generative model may run past the point
/// where the structure completed).
pub fn decode(schema: &Schema, tokens: &[Token]) -> Result<Value, DecodeError> {
    let mut cursor = TokenCursor::new(tokens);
    decode_value(schema, schema.root(), &mut cursor)
}

/// Decode with a caller-supplied placeholder for sequences that run out
/// before the structure is complete — the expected failure mode for samples
/// from an imperfect generative model.
pub fn decode_or_else(
    schema: &Schema,
    tokens: &[Token],
    fallback: impl FnOnce() -> Value,
) -> Value {
    decode(schema, tokens).unwrap_or_else(|_| fallback())
}

/// Per-example decode over a whole batch; one malformed sample degrades to
/// the placeholder instead of aborting the rest.
pub fn decode_batch(
    schema: &Schema,
    sequences: &[Vec<Token>],
    fallback: impl Fn() -> Value,
) -> Vec<Value> {
    sequences
        .iter()
        .map(|seq| decode_or_else(schema, seq, &fallback))
        .collect()
}

fn decode_value(
    schema: &Schema,
    ty: TypeId,
    cursor: &mut TokenCursor<'_>,
) -> Result<Value, DecodeError> {
    match schema.ty(ty) {
        TypeDef::Object { fields, .. } => {
            // zero tokens at the object node itself
            let mut map = Map::new();
            for field in fields {
                let child = decode_value(schema, field.ty, cursor)?;
                map.insert(field.name.clone(), child);
            }
            Ok(Value::Object(map))
        }
        TypeDef::Enum { options, .. } => {
            let k = cursor.take()?.output.as_choice(options.len());
            Ok(Value::String(options[k].clone()))
        }
        TypeDef::Optional { inner, .. } => {
            if cursor.take()?.output.as_flag() {
                decode_value(schema, *inner, cursor)
            } else {
                Ok(Value::Null)
            }
        }
        TypeDef::Base { kind, .. } => {
            let output = cursor.take()?.output;
            Ok(match kind {
                BaseKind::Int => Value::from(output.as_i64()),
                BaseKind::Bool => Value::from(output.as_flag()),
                // a non-finite model output has no JSON carrier; it becomes null
                BaseKind::Float => Value::from(output.as_f64()),
            })
        }
    }
}

// --------------------------------- Tests ----------------------------------- //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::error::{DecodeError, EncodeError};
    use crate::testutil::{factor_tree, leaf, tree_schema};

    fn state_names(schema: &Schema, tokens: &[Token]) -> Vec<String> {
        tokens
            .iter()
            .map(|t| schema.state(t.state).unwrap().name.clone())
            .collect()
    }

    /// Structural token count: 1 per enum, 1 per optional (+ inner if
    /// present), 1 per base, summed over fields in declared order.
    fn expected_count(tree: &Value) -> usize {
        let mut n = 2; // value + mod_three
        for side in ["left", "right"] {
            n += 1; // presence
            if !tree[side].is_null() {
                n += expected_count(&tree[side]);
            }
        }
        n
    }

    #[test]
    fn leaf_encodes_in_declared_field_order() {
        let schema = tree_schema();
        let instance = leaf(5);
        let tokens = encode(&schema, &instance).unwrap();

        assert_eq!(
            state_names(&schema, &tokens),
            ["value", "mod_three", "left.presence", "right.presence"]
        );
        let outputs: Vec<Output> = tokens.iter().map(|t| t.output).collect();
        assert_eq!(
            outputs,
            [
                Output::Int(5),
                Output::Choice(2), // 5 % 3 == 2 -> "two"
                Output::Flag(false),
                Output::Flag(false),
            ]
        );

        assert_eq!(decode(&schema, &tokens).unwrap(), instance);
    }

    #[test]
    fn round_trips_trees_of_varied_shape() {
        let schema = tree_schema();
        for x in 2..=60 {
            let instance = factor_tree(x);
            let tokens = encode(&schema, &instance).unwrap();
            let back = decode(&schema, &tokens).unwrap();
            assert_eq!(back, instance, "round trip for {x}");
        }
    }

    #[test]
    fn reencoding_a_decoded_sequence_reproduces_it() {
        let schema = tree_schema();
        for x in [2, 12, 36, 59] {
            let tokens = encode(&schema, &factor_tree(x)).unwrap();
            let again = encode(&schema, &decode(&schema, &tokens).unwrap()).unwrap();
            assert_eq!(again, tokens, "re-encode for {x}");
        }
    }

    #[test]
    fn token_count_follows_the_structural_formula() {
        let schema = tree_schema();
        for x in 2..=40 {
            let instance = factor_tree(x);
            let tokens = encode(&schema, &instance).unwrap();
            assert_eq!(tokens.len(), expected_count(&instance), "count for {x}");
        }

        // independent of scalar magnitude
        let small = encode(&schema, &leaf(1)).unwrap();
        let large = encode(&schema, &leaf(982_451_653)).unwrap();
        assert_eq!(small.len(), large.len());
    }

    #[test]
    fn arbitrary_depth_left_spines_round_trip() {
        let schema = tree_schema();
        // depth 0 is the bare leaf; each level wraps on the left only
        let mut instance = leaf(2);
        for depth in 0..40 {
            let tokens = encode(&schema, &instance).unwrap();
            assert_eq!(decode(&schema, &tokens).unwrap(), instance, "depth {depth}");
            instance = json!({
                "value": 2,
                "mod_three": "two",
                "left": instance,
                "right": null,
            });
        }
    }

    #[test]
    fn exhaustion_is_an_error_at_every_truncation_point() {
        let schema = tree_schema();
        let tokens = encode(&schema, &factor_tree(12)).unwrap();
        for cut in 0..tokens.len() {
            let err = decode(&schema, &tokens[..cut]).unwrap_err();
            assert_eq!(err, DecodeError::SequenceExhausted, "cut at {cut}");
        }
    }

    #[test]
    fn fallback_substitutes_a_placeholder() {
        let schema = tree_schema();
        let tokens = encode(&schema, &factor_tree(12)).unwrap();
        let placeholder = leaf(-1);

        let ok = decode_or_else(&schema, &tokens, || placeholder.clone());
        assert_eq!(ok, factor_tree(12));

        let substituted = decode_or_else(&schema, &tokens[..2], || placeholder.clone());
        assert_eq!(substituted, placeholder);

        let batch = vec![tokens.clone(), tokens[..1].to_vec()];
        let decoded = decode_batch(&schema, &batch, || placeholder.clone());
        assert_eq!(decoded[0], factor_tree(12));
        assert_eq!(decoded[1], placeholder);
    }

    #[test]
    fn decode_is_lenient_about_output_variants() {
        let schema = tree_schema();
        let mut tokens = encode(&schema, &leaf(5)).unwrap();
        // a model emits floats everywhere; 0.9 at a presence step means present
        tokens[1].output = Output::Float(1.6); // rounds towards option 2
        tokens[2].output = Output::Float(0.2); // below threshold: absent
        tokens[3].output = Output::Float(0.2);
        let decoded = decode(&schema, &tokens).unwrap();
        assert_eq!(decoded, leaf(5));

        // out-of-range choices clamp instead of indexing out of bounds
        tokens[1].output = Output::Choice(99);
        let decoded = decode(&schema, &tokens).unwrap();
        assert_eq!(decoded["mod_three"], "two");
    }

    #[test]
    fn missing_keys_read_as_absent_optionals() {
        let schema = tree_schema();
        let tokens = encode(&schema, &json!({"value": 5, "mod_three": "two"})).unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!(decode(&schema, &tokens).unwrap(), leaf(5));
    }

    #[test]
    fn nonconforming_instances_are_rejected() {
        let schema = tree_schema();

        let err = encode(&schema, &json!({"value": "five", "mod_three": "two"})).unwrap_err();
        assert!(matches!(err, EncodeError::Mismatch { expected: "integer", .. }));

        let err = encode(&schema, &json!({"value": 5, "mod_three": "seven"})).unwrap_err();
        assert!(matches!(err, EncodeError::UnknownOption { tag, .. } if tag == "seven"));

        let err = encode(&schema, &json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, EncodeError::Mismatch { expected: "object", .. }));
    }

    #[test]
    fn encode_batch_matches_sequential_encoding() {
        let schema = tree_schema();
        let instances: Vec<Value> = (2..30).map(factor_tree).collect();
        let parallel = encode_batch(&schema, &instances).unwrap();
        for (instance, tokens) in instances.iter().zip(&parallel) {
            assert_eq!(*tokens, encode(&schema, instance).unwrap());
        }
    }

    #[test]
    fn cursor_reports_consumption() {
        let schema = tree_schema();
        let tokens = encode(&schema, &leaf(7)).unwrap();
        let mut cursor = TokenCursor::new(&tokens);
        assert_eq!(cursor.consumed(), 0);
        cursor.take().unwrap();
        cursor.take().unwrap();
        assert_eq!(cursor.consumed(), 2);
    }
}

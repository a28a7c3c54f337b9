//! End-to-end driver for the codec pipeline: declare the factor-tree schema,
//! encode a handful of instances, rectangularize, then invert both
//! transforms and check losslessness — the same sequence a training loop
//! performs around a real model.

use serde_json::{Value, json};
use treestate::{Schema, decode_batch, encode_batch, pad, unpad_all};

const TREE_SCHEMA: &str = r#"{
    "types": [
        { "base": "object", "name": "tree",
          "value": "int", "mod_three": "mod_three",
          "left": "optional[tree]", "right": "optional[tree]" },
        { "base": "enum", "name": "mod_three", "options": ["zero", "one", "two"] },
        { "base": "optional", "type": "tree" }
    ]
}"#;

fn node(value: i64, left: Value, right: Value) -> Value {
    let tag = ["zero", "one", "two"][value.rem_euclid(3) as usize];
    json!({ "value": value, "mod_three": tag, "left": left, "right": right })
}

/// Product tree over the prime factors of `x`: leaves are primes, inner
/// nodes the product of their children, merged pairwise bottom-up.
fn factor_tree(x: i64) -> Value {
    let mut factors = Vec::new();
    let (mut rest, mut i) = (x, 2);
    while i <= rest {
        if rest % i == 0 {
            factors.push(i);
            rest /= i;
        } else {
            i += 1;
        }
    }

    let mut nodes: Vec<Value> = factors
        .into_iter()
        .map(|p| node(p, Value::Null, Value::Null))
        .collect();
    while nodes.len() > 1 {
        let mut merged = Vec::new();
        for pair in nodes.chunks(2) {
            merged.push(match pair {
                [a, b] => node(
                    a["value"].as_i64().unwrap() * b["value"].as_i64().unwrap(),
                    a.clone(),
                    b.clone(),
                ),
                [a] => a.clone(),
                _ => unreachable!(),
            });
        }
        nodes = merged;
    }
    nodes.pop().unwrap()
}

fn main() {
    // 1) resolve the schema
    let schema = Schema::from_json(TREE_SCHEMA).expect("schema must resolve");
    println!("states:");
    for state in schema.states() {
        println!("  {} (arity {})", state.name, state.kind.arity());
    }

    // 2) generate instances and encode
    let instances: Vec<Value> = (2..=16).map(factor_tree).collect();
    let sequences = encode_batch(&schema, &instances).expect("instances conform");
    println!(
        "\nsequence lengths: {:?}",
        sequences.iter().map(Vec::len).collect::<Vec<_>>()
    );

    // 3) rectangularize
    let padded = pad(&schema, &sequences).expect("encoder output pads");
    println!(
        "padded: {} examples x {} steps x {} output slots",
        padded.len(),
        padded.max_steps(),
        padded.max_arity()
    );

    // 4) invert both transforms
    let recovered = unpad_all(&schema, &padded).expect("pad round-trips");
    assert_eq!(recovered, sequences);
    let decoded = decode_batch(&schema, &recovered, || node(-1, Value::Null, Value::Null));
    assert_eq!(decoded, instances);

    println!("\nround trip ok:");
    for (x, instance) in (2..=16).zip(&decoded) {
        println!("  {x} -> {instance}");
    }
}

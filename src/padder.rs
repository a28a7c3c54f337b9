//! Batch padder: ragged per-example token sequences <-> rectangular arrays.
//!
//! `pad` rectangularizes a batch to the maximum step count and the maximum
//! per-step output arity, recording the true extents; `unpad` reads back
//! exactly those extents and nothing else. The recorded counts are the sole
//! boundary between real data and fill — the fill value (0) may legitimately
//! occur inside the counted region and is never scanned for.
//!
//! Both directions are pure transforms; the only shared input is the
//! read-only schema, used to map state ids to per-step arities and to
//! reconstruct typed outputs.

use log::debug;
use ndarray::{Array1, Array2, Array3, ArrayView1, s};

use crate::codec::{Output, Token};
use crate::error::PadError;
use crate::schema::{BaseKind, Schema, StateId, StateInfo, StateKind};

/// Neutral fill for every cell beyond the recorded counts.
pub const FILL: f64 = 0.0;

/// Rectangular arrays over `[example, step, ...]`, sufficient to recover the
/// exact ragged batch. The same four arrays are the contract towards a
/// consuming sequence model, and `new` accepts the model-generated side.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedBatch {
    /// State ids, `[example, step]`.
    pub states: Array2<i64>,
    /// Output cells, `[example, step, slot]`.
    pub outputs: Array3<f64>,
    /// True per-step output arity, `[example, step]`.
    pub output_counts: Array2<usize>,
    /// True per-example step count, `[example]`.
    pub step_counts: Array1<usize>,
}

impl PaddedBatch {
    /// Checked assembly from externally produced arrays (typically a
    /// generating model). Dimension or count inconsistencies are a
    /// `PadError::Shape`; they indicate a defective producer, not data.
    pub fn new(
        states: Array2<i64>,
        outputs: Array3<f64>,
        output_counts: Array2<usize>,
        step_counts: Array1<usize>,
    ) -> Result<Self, PadError> {
        let (n, m) = states.dim();
        let (on, om, oa) = outputs.dim();
        if (on, om) != (n, m) {
            return Err(PadError::Shape(format!(
                "outputs dim ({on}, {om}, {oa}) disagrees with states dim ({n}, {m})"
            )));
        }
        if output_counts.dim() != (n, m) {
            return Err(PadError::Shape(format!(
                "output_counts dim {:?} disagrees with states dim ({n}, {m})",
                output_counts.dim()
            )));
        }
        if step_counts.len() != n {
            return Err(PadError::Shape(format!(
                "step_counts length {} disagrees with {n} examples",
                step_counts.len()
            )));
        }
        for (i, &count) in step_counts.iter().enumerate() {
            if count > m {
                return Err(PadError::Shape(format!(
                    "example {i}: step count {count} exceeds padded width {m}"
                )));
            }
        }
        for ((i, j), &count) in output_counts.indexed_iter() {
            if count > oa {
                return Err(PadError::Shape(format!(
                    "example {i} step {j}: output count {count} exceeds padded arity {oa}"
                )));
            }
        }
        Ok(Self {
            states,
            outputs,
            output_counts,
            step_counts,
        })
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.step_counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Padded step width `M`.
    pub fn max_steps(&self) -> usize {
        self.states.dim().1
    }

    /// Padded output arity `A`.
    pub fn max_arity(&self) -> usize {
        self.outputs.dim().2
    }
}

// ---------------------------------- Pad ------------------------------------ //

/// Rectangularize a batch of token sequences. Fails only on tokens a
/// conforming encoder cannot produce: a state id outside the schema table
/// or a choice index at or beyond its declared arity.
pub fn pad(schema: &Schema, batch: &[Vec<Token>]) -> Result<PaddedBatch, PadError> {
    let n = batch.len();
    let m = batch.iter().map(Vec::len).max().unwrap_or(0);

    // First pass: arity ceiling plus validity of every (state, output) pair,
    // so the fill pass below cannot fail halfway through.
    let mut a = 0usize;
    for seq in batch {
        for token in seq {
            let info = state_info(schema, token.state)?;
            if let (StateKind::Choice { options }, Output::Choice(k)) = (&info.kind, token.output)
            {
                if k >= *options {
                    return Err(PadError::Arity {
                        state: info.name.clone(),
                        got: k as usize,
                        arity: *options as usize,
                    });
                }
            }
            a = a.max(info.kind.arity());
        }
    }

    debug!("padding {n} sequences to {m} steps x {a} output slots");

    let mut states = Array2::<i64>::zeros((n, m));
    let mut outputs = Array3::<f64>::from_elem((n, m, a), FILL);
    let mut output_counts = Array2::<usize>::zeros((n, m));
    let mut step_counts = Array1::<usize>::zeros(n);

    for (i, seq) in batch.iter().enumerate() {
        step_counts[i] = seq.len();
        for (j, token) in seq.iter().enumerate() {
            let info = state_info(schema, token.state)?;
            states[[i, j]] = token.state.index() as i64;
            output_counts[[i, j]] = info.kind.arity();
            write_cells(&info.kind, token.output, &mut outputs, i, j);
        }
    }

    // counts are the boundary; everything beyond them stays FILL
    Ok(PaddedBatch {
        states,
        outputs,
        output_counts,
        step_counts,
    })
}

fn write_cells(kind: &StateKind, output: Output, outputs: &mut Array3<f64>, i: usize, j: usize) {
    match kind {
        StateKind::Scalar(BaseKind::Int) => outputs[[i, j, 0]] = output.as_i64() as f64,
        StateKind::Scalar(BaseKind::Float) => outputs[[i, j, 0]] = output.as_f64(),
        StateKind::Scalar(BaseKind::Bool) | StateKind::Presence => {
            outputs[[i, j, 0]] = if output.as_flag() { 1.0 } else { 0.0 }
        }
        StateKind::Choice { options } => {
            // one-hot row; the index was validated against the arity above
            let k = output.as_choice(*options as usize);
            outputs[[i, j, k]] = 1.0;
        }
    }
}

// --------------------------------- Unpad ----------------------------------- //

/// Recover the ragged batch, lazily, one example per iterator item. Each
/// example reads exactly `step_counts[i]` steps and, per step, exactly
/// `output_counts[i][j]` cells — never into the padded region. A state cell
/// outside the schema table (possible in model-generated arrays) yields an
/// `Err` for that example only.
pub fn unpad<'a>(
    schema: &'a Schema,
    padded: &'a PaddedBatch,
) -> impl Iterator<Item = Result<Vec<Token>, PadError>> + 'a {
    (0..padded.len()).map(move |i| unpad_example(schema, padded, i))
}

/// Eager counterpart of [`unpad`].
pub fn unpad_all(schema: &Schema, padded: &PaddedBatch) -> Result<Vec<Vec<Token>>, PadError> {
    unpad(schema, padded).collect()
}

fn unpad_example(schema: &Schema, padded: &PaddedBatch, i: usize) -> Result<Vec<Token>, PadError> {
    let steps = padded.step_counts[i];
    let mut seq = Vec::with_capacity(steps);
    for j in 0..steps {
        let raw = padded.states[[i, j]];
        let (state, info) = state_from_raw(schema, raw)?;
        let count = padded.output_counts[[i, j]];
        let cells = padded.outputs.slice(s![i, j, ..count]);
        seq.push(Token {
            state,
            output: read_cells(&info.kind, cells),
        });
    }
    Ok(seq)
}

/// Typed output from the counted cells, interpreted by the state's kind:
/// rounding for ints, a 0.5 threshold for flags, argmax for choices. Exact
/// for cells written by `pad`; total for anything a model may emit.
fn read_cells(kind: &StateKind, cells: ArrayView1<'_, f64>) -> Output {
    let first = cells.first().copied().unwrap_or(FILL);
    match kind {
        StateKind::Scalar(BaseKind::Int) => Output::Int(first.round() as i64),
        StateKind::Scalar(BaseKind::Float) => Output::Float(first),
        StateKind::Scalar(BaseKind::Bool) | StateKind::Presence => Output::Flag(first >= 0.5),
        StateKind::Choice { .. } => {
            let mut best = 0usize;
            let mut best_value = f64::NEG_INFINITY;
            for (k, &v) in cells.iter().enumerate() {
                if v > best_value {
                    best = k;
                    best_value = v;
                }
            }
            Output::Choice(best as u32)
        }
    }
}

fn state_info(schema: &Schema, id: StateId) -> Result<&StateInfo, PadError> {
    schema
        .state(id)
        .ok_or(PadError::StateOutOfRange(id.index() as i64))
}

fn state_from_raw(schema: &Schema, raw: i64) -> Result<(StateId, &StateInfo), PadError> {
    let id = usize::try_from(raw)
        .ok()
        .filter(|&ix| ix < schema.states().len())
        .map(|ix| StateId(ix as u32))
        .ok_or(PadError::StateOutOfRange(raw))?;
    let info = state_info(schema, id)?;
    Ok((id, info))
}

// --------------------------------- Tests ----------------------------------- //

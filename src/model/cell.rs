//! Single-step recurrent cells and the length-aware sequence runner.
//!
//! Cells map `(state, input[batch, d_in])` to a new state. `dynamic_rnn`
//! unrolls a cell over `[batch, time, d_in]`, freezing each example's state
//! once its length is reached.

use burn::module::{Module, Param};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{sigmoid, tanh};

use super::rnn::CellType;

/// LSTM forget-gate bias added at every step.
const FORGET_BIAS: f64 = 1.0;

/// Recurrent state of a cell. `cell` is only present for LSTMs.
#[derive(Debug, Clone)]
pub struct CellState<B: Backend> {
    pub hidden: Tensor<B, 2>,
    pub cell: Option<Tensor<B, 2>>,
}

impl<B: Backend> CellState<B> {
    /// Take `next` where `mask` is 1 and keep `self` where it is 0.
    /// `mask`: [batch, 1]
    pub fn blend(self, next: CellState<B>, mask: Tensor<B, 2>) -> CellState<B> {
        let keep = mask.clone().neg().add_scalar(1.0);
        let hidden = next.hidden * mask.clone() + self.hidden * keep.clone();
        let cell = match (self.cell, next.cell) {
            (Some(prev), Some(new)) => Some(new * mask + prev * keep),
            _ => None,
        };
        CellState { hidden, cell }
    }
}

/// Linear layer whose bias starts at zero.
pub(crate) fn zero_bias_linear<B: Backend>(d_in: usize, d_out: usize, device: &B::Device) -> Linear<B> {
    let mut linear = LinearConfig::new(d_in, d_out).init(device);
    linear.bias = Some(Param::from_tensor(Tensor::zeros([d_out], device)));
    linear
}

// ─── GRU ──────────────────────────────────────────────────────────

/// Gated recurrent unit.
///
/// r, u = σ(W·[x, h])
/// c = tanh(W_x·x + W_h·(r ⊙ h))        (standard)
/// c = tanh(W_x·x + r ⊙ (W_h·h))        (reset after, Nematus)
/// h' = u ⊙ h + (1 − u) ⊙ c
#[derive(Module, Debug)]
pub struct GruCell<B: Backend> {
    gates: Linear<B>,
    candidate_input: Linear<B>,
    candidate_state: Linear<B>,
    reset_after: bool,
}

impl<B: Backend> GruCell<B> {
    pub fn new(d_in: usize, d_hidden: usize, reset_after: bool, device: &B::Device) -> Self {
        Self {
            gates: LinearConfig::new(d_in + d_hidden, 2 * d_hidden).init(device),
            candidate_input: zero_bias_linear(d_in, d_hidden, device),
            candidate_state: zero_bias_linear(d_hidden, d_hidden, device),
            reset_after,
        }
    }

    pub fn step(&self, hidden: Tensor<B, 2>, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let joined = Tensor::cat(vec![input.clone(), hidden.clone()], 1);
        let d_hidden = hidden.dims()[1];
        let gates = sigmoid(self.gates.forward(joined));
        let reset = gates.clone().narrow(1, 0, d_hidden);
        let update = gates.narrow(1, d_hidden, d_hidden);

        let recurrent = if self.reset_after {
            reset * self.candidate_state.forward(hidden.clone())
        } else {
            self.candidate_state.forward(reset * hidden.clone())
        };
        let candidate = tanh(self.candidate_input.forward(input) + recurrent);

        let keep = update.clone().neg().add_scalar(1.0);
        update * hidden + keep * candidate
    }
}

// ─── LSTM ─────────────────────────────────────────────────────────

/// Long short-term memory cell; the output is the hidden component.
#[derive(Module, Debug)]
pub struct LstmCell<B: Backend> {
    gates: Linear<B>,
}

impl<B: Backend> LstmCell<B> {
    pub fn new(d_in: usize, d_hidden: usize, device: &B::Device) -> Self {
        Self {
            gates: zero_bias_linear(d_in + d_hidden, 4 * d_hidden, device),
        }
    }

    /// Returns (cell, hidden).
    pub fn step(
        &self,
        cell: Tensor<B, 2>,
        hidden: Tensor<B, 2>,
        input: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let d_hidden = hidden.dims()[1];
        let joined = Tensor::cat(vec![input, hidden], 1);
        // gate order: input, candidate, forget, output
        let gates = self.gates.forward(joined);
        let gate = |i: usize| gates.clone().narrow(1, i * d_hidden, d_hidden);
        let (input_gate, candidate) = (gate(0), gate(1));
        let (forget_gate, output_gate) = (gate(2), gate(3));

        let new_cell = cell * sigmoid(forget_gate.add_scalar(FORGET_BIAS))
            + sigmoid(input_gate) * tanh(candidate);
        let new_hidden = sigmoid(output_gate) * tanh(new_cell.clone());
        (new_cell, new_hidden)
    }
}

// ─── Cell dispatch ────────────────────────────────────────────────

/// One of the supported cells. Exactly one field is populated.
#[derive(Module, Debug)]
pub struct RnnCell<B: Backend> {
    gru: Option<GruCell<B>>,
    lstm: Option<LstmCell<B>>,
    hidden_size: usize,
}

/// Initialize a cell of the given type.
pub fn init_cell<B: Backend>(
    cell_type: CellType,
    d_in: usize,
    d_hidden: usize,
    device: &B::Device,
) -> RnnCell<B> {
    let (gru, lstm) = match cell_type {
        CellType::Gru => (Some(GruCell::new(d_in, d_hidden, false, device)), None),
        CellType::NematusGru => (Some(GruCell::new(d_in, d_hidden, true, device)), None),
        CellType::Lstm => (None, Some(LstmCell::new(d_in, d_hidden, device))),
    };
    RnnCell {
        gru,
        lstm,
        hidden_size: d_hidden,
    }
}

impl<B: Backend> RnnCell<B> {
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// All-zero state for a batch.
    pub fn zero_state(&self, batch: usize, device: &B::Device) -> CellState<B> {
        let zeros = Tensor::zeros([batch, self.hidden_size], device);
        CellState {
            cell: self.lstm.as_ref().map(|_| zeros.clone()),
            hidden: zeros,
        }
    }

    /// State whose hidden component is `hidden` (cell memory zeroed for LSTMs).
    pub fn state_from_hidden(&self, hidden: Tensor<B, 2>) -> CellState<B> {
        CellState {
            cell: self.lstm.as_ref().map(|_| hidden.zeros_like()),
            hidden,
        }
    }

    pub fn step(&self, state: &CellState<B>, input: Tensor<B, 2>) -> CellState<B> {
        if let Some(lstm) = &self.lstm {
            let cell = state
                .cell
                .clone()
                .unwrap_or_else(|| state.hidden.zeros_like());
            let (cell, hidden) = lstm.step(cell, state.hidden.clone(), input);
            return CellState {
                hidden,
                cell: Some(cell),
            };
        }
        match &self.gru {
            Some(gru) => CellState {
                hidden: gru.step(state.hidden.clone(), input),
                cell: None,
            },
            None => state.clone(),
        }
    }
}

// ─── Sequence helpers ─────────────────────────────────────────────

/// Float mask [batch, time]: 1.0 inside each example's length.
pub fn sequence_mask<B: Backend>(lengths: &[usize], time: usize, device: &B::Device) -> Tensor<B, 2> {
    let data: Vec<f32> = lengths
        .iter()
        .flat_map(|&len| (0..time).map(move |t| if t < len { 1.0 } else { 0.0 }))
        .collect();
    Tensor::from_data(TensorData::new(data, [lengths.len(), time]), device)
}

/// Reverse every example over its own length; padding stays in place.
///
/// `states`: [batch, time, dim]
pub fn reverse_sequence<B: Backend>(states: Tensor<B, 3>, lengths: &[usize]) -> Tensor<B, 3> {
    let [batch, time, dim] = states.dims();
    let mut indices = Vec::with_capacity(batch * time);
    for &len in lengths {
        let len = len.min(time);
        for t in 0..time {
            let src = if t < len { len - 1 - t } else { t };
            indices.push(src as i32);
        }
    }
    let indices = Tensor::<B, 2, Int>::from_data(TensorData::new(indices, [batch, time]), &states.device())
        .unsqueeze_dim::<3>(2)
        .expand([batch, time, dim]);
    states.gather(1, indices)
}

/// Unroll `cell` over `inputs` [batch, time, d_in].
///
/// Returns the per-position outputs [batch, time, hidden] (zero past each
/// length) and the state at each example's last valid position.
pub fn dynamic_rnn<B: Backend>(
    cell: &RnnCell<B>,
    inputs: Tensor<B, 3>,
    mask: Tensor<B, 2>,
) -> (Tensor<B, 3>, CellState<B>) {
    let [batch, time, d_in] = inputs.dims();
    let device = inputs.device();
    let mut state = cell.zero_state(batch, &device);
    let mut outputs = Vec::with_capacity(time);

    for t in 0..time {
        let x_t: Tensor<B, 2> = inputs
            .clone()
            .slice([0..batch, t..t + 1, 0..d_in])
            .squeeze_dim::<2>(1);
        let m_t: Tensor<B, 2> = mask.clone().slice([0..batch, t..t + 1]); // [batch, 1]

        let next = cell.step(&state, x_t);
        state = state.blend(next, m_t.clone());
        outputs.push(state.hidden.clone() * m_t);
    }

    (Tensor::stack::<3>(outputs, 1), state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::host_values;
    use burn::backend::NdArray;

    type B = NdArray;

    fn ramp(batch: usize, time: usize, dim: usize) -> Tensor<B, 3> {
        let data: Vec<f32> = (0..batch * time * dim).map(|v| v as f32).collect();
        Tensor::from_data(TensorData::new(data, [batch, time, dim]), &Default::default())
    }

    #[test]
    fn reverse_respects_lengths() {
        let states = ramp(2, 3, 1);
        let reversed = reverse_sequence(states, &[2, 3]);
        assert_eq!(host_values(reversed), vec![1.0, 0.0, 2.0, 5.0, 4.0, 3.0]);
    }

    #[test]
    fn reverse_twice_is_identity() {
        let states = ramp(3, 4, 2);
        let lengths = [4, 1, 3];
        let twice = reverse_sequence(reverse_sequence(states.clone(), &lengths), &lengths);
        assert_eq!(host_values(twice), host_values(states));
    }

    #[test]
    fn mask_marks_valid_positions() {
        let mask = sequence_mask::<B>(&[1, 3, 0], 3, &Default::default());
        assert_eq!(
            host_values(mask),
            vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn cells_keep_hidden_size() {
        let device = Default::default();
        for cell_type in [CellType::Gru, CellType::NematusGru, CellType::Lstm] {
            let cell = init_cell::<B>(cell_type, 3, 5, &device);
            let state = cell.zero_state(2, &device);
            let next = cell.step(&state, Tensor::ones([2, 3], &device));
            assert_eq!(next.hidden.dims(), [2, 5]);
            assert_eq!(next.cell.is_some(), cell_type == CellType::Lstm);
        }
    }

    #[test]
    fn state_freezes_after_length() {
        let device = Default::default();
        let cell = init_cell::<B>(CellType::Gru, 2, 4, &device);
        let inputs = ramp(2, 3, 2).div_scalar(10.0);
        let mask = sequence_mask::<B>(&[1, 3], 3, &device);
        let (outputs, final_state) = dynamic_rnn(&cell, inputs, mask);
        assert_eq!(outputs.dims(), [2, 3, 4]);

        // example 0 stops after the first position
        let first = outputs.clone().slice([0..1, 0..1, 0..4]).reshape([1, 4]);
        let final0 = final_state.hidden.clone().slice([0..1, 0..4]);
        assert_eq!(host_values(first), host_values(final0));

        let padded = outputs.clone().slice([0..1, 1..3, 0..4]);
        assert!(host_values(padded).iter().all(|&v| v == 0.0));

        // example 1 ends at the last position
        let last = outputs.slice([1..2, 2..3, 0..4]).reshape([1, 4]);
        let final1 = final_state.hidden.slice([1..2, 0..4]);
        assert_eq!(host_values(last), host_values(final1));
    }
}

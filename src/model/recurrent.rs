//! Bidirectional single-layer GRU over the time axis of `[B, C, T]` sequences.
//!
//! The forward GRU reads frames `0..T`, the backward GRU reads the
//! time-reversed sequence; its outputs are flipped back and summed with the
//! forward outputs, so the channel count is preserved:
//!
//! ```text
//! x [B, C, T] → [B, T, C] ─┬→ GRU_fwd ────────────────┬→ sum → [B, C, T]
//!                          └→ flip → GRU_bwd → flip ──┘
//! ```
//!
//! The recurrence runs over every frame, padding included. Callers that need
//! padded frames to be zero must mask afterwards.

use candle_core::Tensor;
use candle_nn::rnn::{GRUConfig, RNN};
use candle_nn::VarBuilder;

use crate::Result;

#[derive(Debug, Clone)]
pub struct BiGru {
    gru_fwd: candle_nn::rnn::GRU,
    gru_bwd: candle_nn::rnn::GRU,
    channels: usize,
}

impl BiGru {
    pub fn load(vb: VarBuilder, channels: usize) -> Result<Self> {
        let gru_fwd = candle_nn::rnn::gru(
            channels,
            channels,
            GRUConfig::default(),
            vb.pp("forward"),
        )?;
        let gru_bwd = candle_nn::rnn::gru(
            channels,
            channels,
            GRUConfig::default(),
            vb.pp("backward"),
        )?;
        Ok(Self {
            gru_fwd,
            gru_bwd,
            channels,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// `[B, T, C]` → `[B, T, C]` for one direction.
    fn run(&self, gru: &candle_nn::rnn::GRU, x: &Tensor) -> Result<Tensor> {
        let (b, t, _) = x.dims3()?;
        let states = gru.seq(x)?;
        // states_to_tensor concatenates the per-step `[B, C]` states into `[B, T·C]`
        let out = gru.states_to_tensor(&states)?;
        Ok(out.reshape((b, t, self.channels))?)
    }

    /// `[B, C, T]` → `[B, C, T]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = x.transpose(1, 2)?.contiguous()?; // [B, T, C]

        let fwd = self.run(&self.gru_fwd, &x)?;
        let reversed = x.flip(&[1])?.contiguous()?;
        let bwd = self.run(&self.gru_bwd, &reversed)?.flip(&[1])?;

        let out = (fwd + bwd)?;
        Ok(out.transpose(1, 2)?.contiguous()?)
    }
}

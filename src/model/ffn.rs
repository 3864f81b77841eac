//! Position-wise feed-forward built from two 1D convolutions.
//!
//! ```text
//! x [B, C_in, T]
//!   → mask → pad → Conv1d(C_in → filter, k)
//!   → ReLU → dropout
//!   → mask → pad → Conv1d(filter → C_out, k)
//!   → mask                                   [B, C_out, T]
//! ```
//!
//! Causal mode pads `k - 1` frames on the left only, so frame `t` never sees
//! frames after `t`. Same mode pads `(k - 1) / 2` left and `k / 2` right.

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use super::Mode;
use crate::Result;

/// Feed-forward with causal or centered receptive field.
#[derive(Debug, Clone)]
pub struct FeedForward {
    conv_1: candle_nn::Conv1d,
    conv_2: candle_nn::Conv1d,
    dropout: candle_nn::Dropout,
    kernel_size: usize,
    causal: bool,
}

impl FeedForward {
    pub fn load(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        filter_channels: usize,
        kernel_size: usize,
        p_dropout: f64,
        causal: bool,
    ) -> Result<Self> {
        // Padding is applied explicitly in forward().
        let cfg = candle_nn::Conv1dConfig {
            padding: 0,
            stride: 1,
            dilation: 1,
            groups: 1,
            ..Default::default()
        };
        let conv_1 = candle_nn::conv1d(
            in_channels,
            filter_channels,
            kernel_size,
            cfg,
            vb.pp("conv_1"),
        )?;
        let conv_2 = candle_nn::conv1d(
            filter_channels,
            out_channels,
            kernel_size,
            cfg,
            vb.pp("conv_2"),
        )?;

        Ok(Self {
            conv_1,
            conv_2,
            dropout: candle_nn::Dropout::new(p_dropout as f32),
            kernel_size,
            causal,
        })
    }

    pub fn is_causal(&self) -> bool {
        self.causal
    }

    fn pad(&self, x: &Tensor) -> Result<Tensor> {
        if self.kernel_size == 1 {
            return Ok(x.clone());
        }
        let (left, right) = if self.causal {
            (self.kernel_size - 1, 0)
        } else {
            ((self.kernel_size - 1) / 2, self.kernel_size / 2)
        };
        Ok(x.pad_with_zeros(2, left, right)?)
    }

    /// Forward pass.
    ///
    /// - `x`: `[B, C_in, T]`
    /// - `mask`: `[B, 1, T]`
    ///
    /// Returns `[B, C_out, T]`, zero on padded frames.
    pub fn forward(&self, x: &Tensor, mask: &Tensor, mode: Mode) -> Result<Tensor> {
        let x = self.pad(&x.broadcast_mul(mask)?)?;
        let x = self.conv_1.forward(&x)?;
        let x = x.relu()?;
        let x = self.dropout.forward(&x, mode.is_train())?;

        let x = self.pad(&x.broadcast_mul(mask)?)?;
        let x = self.conv_2.forward(&x)?;
        Ok(x.broadcast_mul(mask)?)
    }
}

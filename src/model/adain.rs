//! Style-conditioned residual block (AdaIN normalization).
//!
//! ```text
//! residual: AdaIN(x, s) → LeakyReLU(0.2) → Conv1d(in → out, k)
//!           → AdaIN(·, s) → LeakyReLU(0.2) → Conv1d(out → out, k)
//! shortcut: x, or Conv1d(in → out, 1, no bias) when in ≠ out
//! out = (shortcut + residual) / √2
//! ```

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use super::norm::AdaIn1d;
use crate::Result;

const LEAKY_SLOPE: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct AdainResBlock1d {
    norm1: AdaIn1d,
    conv1: candle_nn::Conv1d,
    norm2: AdaIn1d,
    conv2: candle_nn::Conv1d,
    /// Present only when input and output channels differ.
    conv1x1: Option<candle_nn::Conv1d>,
}

impl AdainResBlock1d {
    pub fn load(
        vb: VarBuilder,
        dim_in: usize,
        dim_out: usize,
        style_dim: usize,
        kernel_size: usize,
    ) -> Result<Self> {
        let cfg = candle_nn::Conv1dConfig {
            padding: (kernel_size - 1) / 2,
            ..Default::default()
        };
        let norm1 = AdaIn1d::load(vb.pp("norm1"), style_dim, dim_in)?;
        let conv1 = candle_nn::conv1d(dim_in, dim_out, kernel_size, cfg, vb.pp("conv1"))?;
        let norm2 = AdaIn1d::load(vb.pp("norm2"), style_dim, dim_out)?;
        let conv2 = candle_nn::conv1d(dim_out, dim_out, kernel_size, cfg, vb.pp("conv2"))?;
        let conv1x1 = if dim_in != dim_out {
            Some(candle_nn::conv1d_no_bias(
                dim_in,
                dim_out,
                1,
                candle_nn::Conv1dConfig::default(),
                vb.pp("conv1x1"),
            )?)
        } else {
            None
        };

        Ok(Self {
            norm1,
            conv1,
            norm2,
            conv2,
            conv1x1,
        })
    }

    fn shortcut(&self, x: &Tensor) -> Result<Tensor> {
        match &self.conv1x1 {
            Some(conv) => Ok(conv.forward(x)?),
            None => Ok(x.clone()),
        }
    }

    fn residual(&self, x: &Tensor, style: &Tensor) -> Result<Tensor> {
        let act = candle_nn::Activation::LeakyRelu(LEAKY_SLOPE);
        let x = self.norm1.forward(x, style)?;
        let x = x.apply(&act)?;
        let x = self.conv1.forward(&x)?;
        let x = self.norm2.forward(&x, style)?;
        let x = x.apply(&act)?;
        Ok(self.conv2.forward(&x)?)
    }

    /// - `x`: `[B, C_in, T]`
    /// - `style`: `[B, S]`
    ///
    /// Returns `[B, C_out, T]`.
    pub fn forward(&self, x: &Tensor, style: &Tensor) -> Result<Tensor> {
        let out = (self.shortcut(x)? + self.residual(x, style)?)?;
        Ok((out / std::f64::consts::SQRT_2)?)
    }
}

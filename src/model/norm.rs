//! Normalization layers over channel-first `[B, C, T]` sequences.
//!
//! - [`ConditionalLayerNorm`]: per-frame norm over channels, affine from a style vector
//! - [`InstanceNorm1d`]: per-channel norm over time, optional learned affine
//! - [`AdaIn1d`]: instance norm with `(1 + γ, β)` predicted from a style vector

use candle_core::{Module, Tensor};
use candle_nn::{Init, VarBuilder};

use crate::Result;

/// Normalize along `dim` with biased variance: `(x - mean) / sqrt(var + eps)`.
fn normalize(x: &Tensor, dim: usize, eps: f64) -> Result<Tensor> {
    let mean = x.mean_keepdim(dim)?;
    let centered = x.broadcast_sub(&mean)?;
    let var = centered.sqr()?.mean_keepdim(dim)?;
    let denom = (var + eps)?.sqrt()?;
    Ok(centered.broadcast_div(&denom)?)
}

// ---------------------------------------------------------------------------
// Conditional layer norm
// ---------------------------------------------------------------------------

/// Layer norm across channels whose scale and shift are linear functions of a
/// style embedding.
///
/// ```text
/// y = norm_C(x) * W_scale·g + W_bias·g
/// ```
#[derive(Debug, Clone)]
pub struct ConditionalLayerNorm {
    scale: candle_nn::Linear,
    bias: candle_nn::Linear,
    eps: f64,
}

impl ConditionalLayerNorm {
    pub const DEFAULT_EPS: f64 = 1e-5;

    pub fn load(vb: VarBuilder, channels: usize, style_dim: usize, eps: f64) -> Result<Self> {
        let scale = candle_nn::linear(style_dim, channels, vb.pp("scale"))?;
        let bias = candle_nn::linear(style_dim, channels, vb.pp("bias"))?;
        Ok(Self { scale, bias, eps })
    }

    /// Forward pass.
    ///
    /// - `x`: `[B, C, T]`
    /// - `style`: `[B, S]`; when absent the normalized input is returned as-is
    pub fn forward(&self, x: &Tensor, style: Option<&Tensor>) -> Result<Tensor> {
        let normed = normalize(x, 1, self.eps)?;
        let Some(style) = style else {
            return Ok(normed);
        };
        // [B, S] → [B, C, 1]
        let scale = self.scale.forward(style)?.unsqueeze(2)?;
        let bias = self.bias.forward(style)?.unsqueeze(2)?;
        Ok(normed.broadcast_mul(&scale)?.broadcast_add(&bias)?)
    }
}

// ---------------------------------------------------------------------------
// Instance norm
// ---------------------------------------------------------------------------

/// Instance normalization over the time axis.
#[derive(Debug, Clone)]
pub struct InstanceNorm1d {
    /// `(weight, bias)`, each `[C]`.
    affine: Option<(Tensor, Tensor)>,
    eps: f64,
}

impl InstanceNorm1d {
    pub const DEFAULT_EPS: f64 = 1e-5;

    /// Instance norm with a learned per-channel affine (weight 1, bias 0 at init).
    pub fn load(vb: VarBuilder, channels: usize, eps: f64) -> Result<Self> {
        let weight = vb.get_with_hints(channels, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(channels, "bias", Init::Const(0.0))?;
        Ok(Self {
            affine: Some((weight, bias)),
            eps,
        })
    }

    /// Parameter-free instance norm.
    pub fn new(eps: f64) -> Self {
        Self { affine: None, eps }
    }

    /// `[B, C, T]` → `[B, C, T]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let normed = normalize(x, 2, self.eps)?;
        match &self.affine {
            Some((weight, bias)) => {
                let c = weight.dim(0)?;
                let weight = weight.reshape((1, c, 1))?;
                let bias = bias.reshape((1, c, 1))?;
                Ok(normed.broadcast_mul(&weight)?.broadcast_add(&bias)?)
            }
            None => Ok(normed),
        }
    }
}

// ---------------------------------------------------------------------------
// AdaIN
// ---------------------------------------------------------------------------

/// Adaptive instance norm: `(1 + γ) * IN(x) + β`, `[γ, β] = fc(style)`.
#[derive(Debug, Clone)]
pub struct AdaIn1d {
    norm: InstanceNorm1d,
    /// Linear(style_dim, 2 * channels)
    fc: candle_nn::Linear,
}

impl AdaIn1d {
    pub fn load(vb: VarBuilder, style_dim: usize, channels: usize) -> Result<Self> {
        let fc = candle_nn::linear(style_dim, 2 * channels, vb.pp("fc"))?;
        Ok(Self {
            norm: InstanceNorm1d::new(InstanceNorm1d::DEFAULT_EPS),
            fc,
        })
    }

    /// - `x`: `[B, C, T]`
    /// - `style`: `[B, S]`
    pub fn forward(&self, x: &Tensor, style: &Tensor) -> Result<Tensor> {
        let h = self.fc.forward(style)?.unsqueeze(2)?; // [B, 2C, 1]
        let chunks = h.chunk(2, 1)?;
        let gamma = &chunks[0];
        let beta = &chunks[1];
        let normed = self.norm.forward(x)?;
        Ok(normed
            .broadcast_mul(&(gamma + 1.0)?)?
            .broadcast_add(beta)?)
    }
}

//! Masked multi-head self-attention over channel-first sequences.
//!
//! ```text
//! x [B, C, T_q], c [B, C, T_k]
//!   → 1×1 conv q(x), k(c), v(c)           [B, H·D, T]
//!   → split heads                         [B, H, T, D]
//!   → softmax(fill(q·kᵀ / √D, mask))      [B, H, T_q, T_k]
//!   → dropout → ·v → merge heads          [B, H·D, T_q]
//!   → 1×1 conv o                          [B, C_out, T_q]
//! ```
//!
//! Masked query/key pairs have their score replaced by a finite
//! [`MASKED_SCORE`](super::mask::MASKED_SCORE) rather than `-inf`, so fully
//! padded query rows produce a uniform distribution instead of NaN.

use candle_core::{Module, Tensor, D};
use candle_nn::VarBuilder;

use super::mask::mask_scores;
use super::Mode;
use crate::Result;

/// Multi-head attention with 1×1 convolution projections.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    conv_q: candle_nn::Conv1d,
    conv_k: candle_nn::Conv1d,
    conv_v: candle_nn::Conv1d,
    conv_o: candle_nn::Conv1d,
    dropout: candle_nn::Dropout,
    n_heads: usize,
    dim_head: usize,
}

impl MultiHeadAttention {
    /// - `channels`: input channels of both query and key/value sources
    /// - `out_channels`: output channels
    /// - `dim_head`: per-head width, defaults to `channels / n_heads`
    pub fn load(
        vb: VarBuilder,
        channels: usize,
        out_channels: usize,
        n_heads: usize,
        dim_head: Option<usize>,
        p_dropout: f64,
    ) -> Result<Self> {
        let dim_head = dim_head.unwrap_or(channels / n_heads);
        let inner = n_heads * dim_head;
        let cfg = candle_nn::Conv1dConfig::default();

        let conv_q = candle_nn::conv1d(channels, inner, 1, cfg, vb.pp("conv_q"))?;
        let conv_k = candle_nn::conv1d(channels, inner, 1, cfg, vb.pp("conv_k"))?;
        let conv_v = candle_nn::conv1d(channels, inner, 1, cfg, vb.pp("conv_v"))?;
        let conv_o = candle_nn::conv1d(inner, out_channels, 1, cfg, vb.pp("conv_o"))?;

        Ok(Self {
            conv_q,
            conv_k,
            conv_v,
            conv_o,
            dropout: candle_nn::Dropout::new(p_dropout as f32),
            n_heads,
            dim_head,
        })
    }

    pub fn dim_head(&self) -> usize {
        self.dim_head
    }

    /// `[B, H·D, T]` → `[B, H, T, D]`
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (b, _, t) = x.dims3()?;
        Ok(x
            .reshape((b, self.n_heads, self.dim_head, t))?
            .transpose(2, 3)?
            .contiguous()?)
    }

    /// Forward pass.
    ///
    /// - `x`: `[B, C, T_q]` query source
    /// - `c`: `[B, C, T_k]` key/value source (`x` itself for self-attention)
    /// - `attn_mask`: `[B, T_q, T_k]` pairwise mask (1 = visible)
    ///
    /// Returns `[B, C_out, T_q]`.
    pub fn forward(
        &self,
        x: &Tensor,
        c: &Tensor,
        attn_mask: Option<&Tensor>,
        mode: Mode,
    ) -> Result<Tensor> {
        let (batch, _, t_q) = x.dims3()?;

        let q = self.split_heads(&self.conv_q.forward(x)?)?;
        let k = self.split_heads(&self.conv_k.forward(c)?)?;
        let v = self.split_heads(&self.conv_v.forward(c)?)?;

        // scores = Q · Kᵀ / √D → [B, H, T_q, T_k]
        let scale = (self.dim_head as f64).sqrt();
        let scores = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? / scale)?;

        let scores = match attn_mask {
            Some(mask) => mask_scores(&scores, mask)?,
            None => scores,
        };

        let p_attn = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let p_attn = self.dropout.forward(&p_attn, mode.is_train())?;
        let out = p_attn.matmul(&v)?; // [B, H, T_q, D]

        // Merge heads: [B, H, T_q, D] → [B, H·D, T_q]
        let out = out
            .transpose(2, 3)?
            .reshape((batch, self.n_heads * self.dim_head, t_q))?;

        self.conv_o.forward(&out).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mask::{pairwise_mask, sequence_mask};
    use candle_core::{DType, Device, IndexOp};
    use candle_nn::VarMap;

    fn make_vb(device: &Device) -> (VarMap, VarBuilder<'static>) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        (varmap, vb)
    }

    #[test]
    fn test_self_attention_output_shape() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let attn = MultiHeadAttention::load(vb, 32, 32, 4, None, 0.0).unwrap();
        assert_eq!(attn.dim_head(), 8);

        let x = Tensor::randn(0f32, 1.0, (2, 32, 12), &device).unwrap();
        let out = attn.forward(&x, &x, None, Mode::Eval).unwrap();
        assert_eq!(out.dims(), &[2, 32, 12]);
    }

    #[test]
    fn test_explicit_dim_head_and_out_channels() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let attn = MultiHeadAttention::load(vb, 30, 10, 4, Some(16), 0.0).unwrap();

        let x = Tensor::randn(0f32, 1.0, (1, 30, 7), &device).unwrap();
        let out = attn.forward(&x, &x, None, Mode::Eval).unwrap();
        assert_eq!(out.dims(), &[1, 10, 7]);
    }

    #[test]
    fn test_masked_keys_do_not_affect_valid_queries() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let attn = MultiHeadAttention::load(vb, 16, 16, 2, None, 0.0).unwrap();

        let mask = sequence_mask(&[5], Some(8), DType::F32, &device).unwrap();
        let pair = pairwise_mask(&mask).unwrap();

        let x = Tensor::randn(0f32, 1.0, (1, 16, 8), &device).unwrap();
        // Replace the padded tail with different noise.
        let head = x.narrow(2, 0, 5).unwrap();
        let tail = Tensor::randn(0f32, 10.0, (1, 16, 3), &device).unwrap();
        let x2 = Tensor::cat(&[&head, &tail], 2).unwrap();

        let a = attn.forward(&x, &x, Some(&pair), Mode::Eval).unwrap();
        let b = attn.forward(&x2, &x2, Some(&pair), Mode::Eval).unwrap();
        let diff: f32 = (a.i((.., .., ..5)).unwrap() - b.i((.., .., ..5)).unwrap())
            .unwrap()
            .abs()
            .unwrap()
            .max_keepdim(2)
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-4, "padded keys leaked into valid queries: {diff}");
    }

    #[test]
    fn test_fully_masked_rows_are_finite() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let attn = MultiHeadAttention::load(vb, 8, 8, 2, None, 0.0).unwrap();

        let mask = Tensor::zeros((1, 1, 4), DType::F32, &device).unwrap();
        let pair = pairwise_mask(&mask).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 8, 4), &device).unwrap();
        let out = attn.forward(&x, &x, Some(&pair), Mode::Eval).unwrap();
        let vals: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert!(vals.iter().all(|v| v.is_finite()));

        // Uniform weights over all keys: every query position gets the same output.
        let first = out.i((.., .., 0..1)).unwrap();
        let diff: f32 = out
            .broadcast_sub(&first)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-5, "fully masked rows are not uniform: {diff}");
    }
}

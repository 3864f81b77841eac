//! Conditional transformer stack.
//!
//! Post-norm layers whose norms take their affine parameters from the style
//! embedding:
//!
//! ```text
//! x = x * mask
//! n_layers ×
//!   1. y = MHA(x, x, mask ⊗ mask) → dropout → x = CondLN₁(x + y, g)
//!   2. y = FFN_causal(x, mask)     → dropout → x = CondLN₂(x + y, g)
//! x = x * mask
//! ```
//!
//! ## Weight key paths
//!
//! ```text
//! layers.{i}.attn.conv_{q,k,v,o}.{weight,bias}
//! layers.{i}.norm_1.{scale,bias}.{weight,bias}
//! layers.{i}.ffn.conv_{1,2}.{weight,bias}
//! layers.{i}.norm_2.{scale,bias}.{weight,bias}
//! ```

use candle_core::Tensor;
use candle_nn::VarBuilder;

use super::attention::MultiHeadAttention;
use super::ffn::FeedForward;
use super::mask::{apply_mask, pairwise_mask};
use super::norm::ConditionalLayerNorm;
use super::{shape, Mode};
use crate::config::{EncoderConfig, Validate};
use crate::Result;

/// One attention + feed-forward layer. Owns all of its parameters.
#[derive(Debug, Clone)]
pub struct EncoderLayer {
    attn: MultiHeadAttention,
    norm_1: ConditionalLayerNorm,
    ffn: FeedForward,
    norm_2: ConditionalLayerNorm,
    dropout: candle_nn::Dropout,
}

impl EncoderLayer {
    pub fn load(vb: VarBuilder, config: &EncoderConfig) -> Result<Self> {
        let c = config.hidden_channels;
        let attn = MultiHeadAttention::load(
            vb.pp("attn"),
            c,
            c,
            config.n_heads,
            config.dim_head,
            config.p_dropout,
        )?;
        let norm_1 = ConditionalLayerNorm::load(
            vb.pp("norm_1"),
            c,
            config.utt_emb_dim,
            ConditionalLayerNorm::DEFAULT_EPS,
        )?;
        let ffn = FeedForward::load(
            vb.pp("ffn"),
            c,
            c,
            config.filter_channels,
            config.kernel_size,
            config.p_dropout,
            true,
        )?;
        let norm_2 = ConditionalLayerNorm::load(
            vb.pp("norm_2"),
            c,
            config.utt_emb_dim,
            ConditionalLayerNorm::DEFAULT_EPS,
        )?;

        Ok(Self {
            attn,
            norm_1,
            ffn,
            norm_2,
            dropout: candle_nn::Dropout::new(config.p_dropout as f32),
        })
    }

    /// - `x`: `[B, C, T]`, already masked
    /// - `mask`: `[B, 1, T]`
    /// - `attn_mask`: `[B, T, T]`
    pub fn forward(
        &self,
        x: &Tensor,
        mask: &Tensor,
        attn_mask: &Tensor,
        style: Option<&Tensor>,
        mode: Mode,
    ) -> Result<Tensor> {
        let train = mode.is_train();

        // Self-attention, residual, conditional norm
        let y = self.attn.forward(x, x, Some(attn_mask), mode)?;
        let y = self.dropout.forward(&y, train)?;
        let x = self.norm_1.forward(&(x + y)?, style)?;

        // Causal feed-forward, residual, conditional norm
        let y = self.ffn.forward(&x, mask, mode)?;
        let y = self.dropout.forward(&y, train)?;
        self.norm_2.forward(&(x + y)?, style)
    }
}

/// Transformer stack of [`EncoderLayer`]s conditioned on a style embedding.
#[derive(Debug, Clone)]
pub struct Encoder {
    layers: Vec<EncoderLayer>,
    config: EncoderConfig,
}

impl Encoder {
    pub fn load(vb: VarBuilder, config: &EncoderConfig) -> Result<Self> {
        config.validate()?;

        let mut layers = Vec::with_capacity(config.n_layers);
        for i in 0..config.n_layers {
            layers.push(EncoderLayer::load(vb.pp(format!("layers.{i}")), config)?);
        }

        tracing::debug!(
            "encoder: {} layers, {} channels, {} heads, filter {}",
            config.n_layers,
            config.hidden_channels,
            config.n_heads,
            config.filter_channels,
        );

        Ok(Self {
            layers,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Forward pass.
    ///
    /// - `x`: `[B, hidden_channels, T]`
    /// - `mask`: `[B, 1, T]`
    /// - `style`: optional `[B, utt_emb_dim]`
    ///
    /// Returns `[B, hidden_channels, T]`, zero on padded frames.
    pub fn forward(
        &self,
        x: &Tensor,
        mask: &Tensor,
        style: Option<&Tensor>,
        mode: Mode,
    ) -> Result<Tensor> {
        shape::check_inputs(
            x,
            self.config.hidden_channels,
            mask,
            style,
            self.config.utt_emb_dim,
        )?;
        tracing::trace!("encoder forward: x {:?}", x.dims());

        let attn_mask = pairwise_mask(mask)?;
        let mut x = apply_mask(x, mask)?;
        for layer in &self.layers {
            x = layer.forward(&x, mask, &attn_mask, style, mode)?;
        }
        Ok(apply_mask(&x, mask)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mask::sequence_mask;
    use candle_core::{DType, Device, IndexOp};
    use candle_nn::VarMap;

    fn small_cfg(n_layers: usize) -> EncoderConfig {
        EncoderConfig {
            hidden_channels: 16,
            filter_channels: 32,
            n_heads: 2,
            n_layers,
            kernel_size: 3,
            p_dropout: 0.1,
            utt_emb_dim: 8,
            dim_head: None,
        }
    }

    fn build(n_layers: usize) -> (VarMap, Encoder) {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let enc = Encoder::load(vb, &small_cfg(n_layers)).unwrap();
        (varmap, enc)
    }

    fn param_count(varmap: &VarMap) -> usize {
        varmap.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    #[test]
    fn test_output_shape_and_padding() {
        let device = Device::Cpu;
        let (_varmap, enc) = build(2);
        let x = Tensor::randn(0f32, 1.0, (2, 16, 9), &device).unwrap();
        let mask = sequence_mask(&[9, 4], None, DType::F32, &device).unwrap();
        let g = Tensor::randn(0f32, 1.0, (2, 8), &device).unwrap();

        let y = enc.forward(&x, &mask, Some(&g), Mode::Eval).unwrap();
        assert_eq!(y.dims(), &[2, 16, 9]);
        let tail: Vec<f32> = y.i((1, .., 4..)).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert!(tail.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_runs_without_style() {
        let device = Device::Cpu;
        let (_varmap, enc) = build(1);
        let x = Tensor::randn(0f32, 1.0, (1, 16, 5), &device).unwrap();
        let mask = Tensor::ones((1, 1, 5), DType::F32, &device).unwrap();
        let y = enc.forward(&x, &mask, None, Mode::Eval).unwrap();
        assert_eq!(y.dims(), &[1, 16, 5]);
    }

    #[test]
    fn test_eval_is_deterministic() {
        let device = Device::Cpu;
        let (_varmap, enc) = build(2);
        let x = Tensor::randn(0f32, 1.0, (2, 16, 6), &device).unwrap();
        let mask = sequence_mask(&[6, 5], None, DType::F32, &device).unwrap();
        let g = Tensor::randn(0f32, 1.0, (2, 8), &device).unwrap();

        let a: Vec<f32> = enc
            .forward(&x, &mask, Some(&g), Mode::Eval)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        let b: Vec<f32> = enc
            .forward(&x, &mask, Some(&g), Mode::Eval)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_train_mode_applies_dropout() {
        let device = Device::Cpu;
        let (_varmap, enc) = build(2);
        let x = Tensor::randn(0f32, 1.0, (2, 16, 12), &device).unwrap();
        let mask = Tensor::ones((2, 1, 12), DType::F32, &device).unwrap();
        let g = Tensor::randn(0f32, 1.0, (2, 8), &device).unwrap();

        let eval: Vec<f32> = enc
            .forward(&x, &mask, Some(&g), Mode::Eval)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        let train: Vec<f32> = enc
            .forward(&x, &mask, Some(&g), Mode::Train)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_ne!(eval, train);
    }

    #[test]
    fn test_parameters_scale_linearly_with_layers() {
        let (vm1, e1) = build(1);
        let (vm2, e2) = build(2);
        let (vm3, e3) = build(3);
        assert_eq!(e1.num_layers(), 1);
        assert_eq!(e3.num_layers(), 3);

        // attn (4 convs × 2) + ffn (2 convs × 2) + 2 norms × (2 linears × 2)
        assert_eq!(vm1.all_vars().len(), 20);
        assert_eq!(vm3.all_vars().len(), 60);

        let (p1, p2, p3) = (param_count(&vm1), param_count(&vm2), param_count(&vm3));
        assert_eq!(p2 - p1, p1);
        assert_eq!(p3 - p2, p1);

        // Output shape is unaffected by depth.
        let device = Device::Cpu;
        let x = Tensor::randn(0f32, 1.0, (1, 16, 4), &device).unwrap();
        let mask = Tensor::ones((1, 1, 4), DType::F32, &device).unwrap();
        let y2 = e2.forward(&x, &mask, None, Mode::Eval).unwrap();
        let y3 = e3.forward(&x, &mask, None, Mode::Eval).unwrap();
        assert_eq!(y2.dims(), y3.dims());
    }

    #[test]
    fn test_rejects_wrong_channels() {
        let device = Device::Cpu;
        let (_varmap, enc) = build(1);
        let x = Tensor::randn(0f32, 1.0, (1, 15, 4), &device).unwrap();
        let mask = Tensor::ones((1, 1, 4), DType::F32, &device).unwrap();
        assert!(matches!(
            enc.forward(&x, &mask, None, Mode::Eval),
            Err(crate::Error::ShapeMismatch { .. })
        ));
    }
}

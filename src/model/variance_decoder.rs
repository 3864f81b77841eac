//! Variance decoder: predicts a per-frame prosodic trajectory.
//!
//! ## Architecture
//!
//! ```text
//! x [B, C_in, T]
//! n_blocks ×
//!   n_layers × ConvBlock:
//!     Conv1d(k, same pad) · mask → LeakyReLU(0.2) → CondLN(g, eps 1e-6) → dropout
//!   BiGRU (runs over padded frames too)
//!   [MHA(x, x, mask ⊗ mask) + x]            only when n_heads > 0
//! proj: Conv1d(hidden → C_out, 1)(x · mask) → InstanceNorm1d(affine) · mask
//! out · mask                                                   [B, C_out, T]
//! ```
//!
//! The first conv maps `C_in → hidden`; every later layer keeps `hidden`.
//!
//! ## Weight key paths
//!
//! ```text
//! layers.{i}.conv.{weight,bias}  # ConvBlock
//! layers.{i}.norm.{scale,bias}.{weight,bias}
//! layers.{i}.{forward,backward}.{weight,bias}_{ih,hh}_l0  # BiGRU
//! layers.{i}.conv_{q,k,v,o}.{weight,bias}  # attention
//! proj.0.{weight,bias}  # Conv1d
//! proj.1.{weight,bias}  # InstanceNorm1d
//! ```

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use super::attention::MultiHeadAttention;
use super::mask::{apply_mask, pairwise_mask};
use super::norm::{ConditionalLayerNorm, InstanceNorm1d};
use super::recurrent::BiGru;
use super::{shape, Mode};
use crate::config::{Validate, VarianceDecoderConfig};
use crate::Result;

const LEAKY_SLOPE: f64 = 0.2;
const NORM_EPS: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

/// Conv → LeakyReLU → conditional layer norm → dropout.
#[derive(Debug, Clone)]
pub struct ConvBlock {
    conv: candle_nn::Conv1d,
    norm: ConditionalLayerNorm,
    dropout: candle_nn::Dropout,
}

impl ConvBlock {
    pub fn load(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        utt_emb_dim: usize,
        p_dropout: f64,
    ) -> Result<Self> {
        let cfg = candle_nn::Conv1dConfig {
            padding: (kernel_size - 1) / 2,
            ..Default::default()
        };
        let conv = candle_nn::conv1d(in_channels, out_channels, kernel_size, cfg, vb.pp("conv"))?;
        let norm = ConditionalLayerNorm::load(vb.pp("norm"), out_channels, utt_emb_dim, NORM_EPS)?;
        Ok(Self {
            conv,
            norm,
            dropout: candle_nn::Dropout::new(p_dropout as f32),
        })
    }

    /// Only the convolution output is masked; norm and dropout run on the
    /// masked result.
    pub fn forward(
        &self,
        x: &Tensor,
        mask: &Tensor,
        style: &Tensor,
        mode: Mode,
    ) -> Result<Tensor> {
        let x = apply_mask(&self.conv.forward(x)?, mask)?;
        let x = x.apply(&candle_nn::Activation::LeakyRelu(LEAKY_SLOPE))?;
        let x = self.norm.forward(&x, Some(style))?;
        Ok(self.dropout.forward(&x, mode.is_train())?)
    }
}

/// One entry of the decoder's layer sequence.
#[derive(Debug, Clone)]
pub enum SequenceLayer {
    /// Residual self-attention: `x ← attn(x, x, pairwise) + x`.
    Attention(MultiHeadAttention),
    ConvBlock(ConvBlock),
    /// Bidirectional GRU over the full (padded) sequence.
    Recurrent(BiGru),
}

impl SequenceLayer {
    pub fn forward(
        &self,
        x: &Tensor,
        mask: &Tensor,
        attn_mask: &Tensor,
        style: &Tensor,
        mode: Mode,
    ) -> Result<Tensor> {
        match self {
            SequenceLayer::Attention(attn) => {
                Ok((attn.forward(x, x, Some(attn_mask), mode)? + x)?)
            }
            SequenceLayer::ConvBlock(block) => block.forward(x, mask, style, mode),
            SequenceLayer::Recurrent(gru) => gru.forward(x),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            SequenceLayer::Attention(_) => "attention",
            SequenceLayer::ConvBlock(_) => "conv",
            SequenceLayer::Recurrent(_) => "gru",
        }
    }
}

// ---------------------------------------------------------------------------
// Output projection
// ---------------------------------------------------------------------------

/// 1×1 conv to the output channels followed by affine instance norm.
#[derive(Debug, Clone)]
struct Projection {
    conv: candle_nn::Conv1d,
    norm: InstanceNorm1d,
}

impl Projection {
    fn load(vb: VarBuilder, hidden_channels: usize, output_channels: usize) -> Result<Self> {
        let conv = candle_nn::conv1d(
            hidden_channels,
            output_channels,
            1,
            candle_nn::Conv1dConfig::default(),
            vb.pp("0"),
        )?;
        let norm = InstanceNorm1d::load(vb.pp("1"), output_channels, InstanceNorm1d::DEFAULT_EPS)?;
        Ok(Self { conv, norm })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.conv.forward(x)?;
        self.norm.forward(&x)
    }
}

// ---------------------------------------------------------------------------
// Variance decoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VarianceDecoder {
    layers: Vec<SequenceLayer>,
    proj: Projection,
    config: VarianceDecoderConfig,
}

impl VarianceDecoder {
    pub fn load(vb: VarBuilder, config: &VarianceDecoderConfig) -> Result<Self> {
        config.validate()?;
        let hidden = config.hidden_channels;

        let mut layers = Vec::new();
        let mut in_channels = config.input_channels;
        for _ in 0..config.n_blocks {
            for _ in 0..config.n_layers {
                let layer_vb = vb.pp(format!("layers.{}", layers.len()));
                layers.push(SequenceLayer::ConvBlock(ConvBlock::load(
                    layer_vb,
                    in_channels,
                    hidden,
                    config.kernel_size,
                    config.utt_emb_dim,
                    config.p_dropout,
                )?));
                in_channels = hidden;
            }

            let layer_vb = vb.pp(format!("layers.{}", layers.len()));
            layers.push(SequenceLayer::Recurrent(BiGru::load(layer_vb, hidden)?));

            if config.n_heads > 0 {
                let layer_vb = vb.pp(format!("layers.{}", layers.len()));
                layers.push(SequenceLayer::Attention(MultiHeadAttention::load(
                    layer_vb,
                    hidden,
                    hidden,
                    config.n_heads,
                    config.dim_head,
                    config.p_dropout,
                )?));
            }
        }

        let proj = Projection::load(vb.pp("proj"), hidden, config.output_channels)?;

        tracing::debug!(
            "variance decoder: {} → {} → {}, layers [{}]",
            config.input_channels,
            hidden,
            config.output_channels,
            layers
                .iter()
                .map(SequenceLayer::kind)
                .collect::<Vec<_>>()
                .join(", "),
        );

        Ok(Self {
            layers,
            proj,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &VarianceDecoderConfig {
        &self.config
    }

    pub fn layers(&self) -> &[SequenceLayer] {
        &self.layers
    }

    /// Forward pass.
    ///
    /// - `x`: `[B, input_channels, T]`
    /// - `mask`: `[B, 1, T]`
    /// - `style`: `[B, utt_emb_dim]`
    ///
    /// Returns `[B, output_channels, T]`, exactly zero on padded frames.
    pub fn forward(
        &self,
        x: &Tensor,
        mask: &Tensor,
        style: &Tensor,
        mode: Mode,
    ) -> Result<Tensor> {
        shape::check_inputs(
            x,
            self.config.input_channels,
            mask,
            Some(style),
            self.config.utt_emb_dim,
        )?;
        tracing::trace!("variance decoder forward: x {:?}", x.dims());

        let attn_mask = pairwise_mask(mask)?;

        let mut x = x.clone();
        for layer in &self.layers {
            x = layer.forward(&x, mask, &attn_mask, style, mode)?;
        }

        let x = self.proj.forward(&apply_mask(&x, mask)?)?;
        let x = apply_mask(&x, mask)?;
        Ok(apply_mask(&x, mask)?)
    }
}

//! Token embedding refined by a style-conditioned residual block.
//!
//! ```text
//! ids [B, T] → Embedding(num_embeddings, d_model) → [B, T, d_model]
//!   → transpose → [B, d_model, T]
//!   → AdainResBlock1d(d_model → d_model, k=3, style)
//!   → mask
//! ```

use candle_core::{DType, Module, Tensor};
use candle_nn::VarBuilder;

use super::adain::AdainResBlock1d;
use super::mask::apply_mask;
use super::shape;
use crate::config::{ConditionalEmbeddingConfig, Validate};
use crate::{Error, Result};

const ADAIN_KERNEL_SIZE: usize = 3;

#[derive(Debug, Clone)]
pub struct ConditionalEmbedding {
    embed: candle_nn::Embedding,
    adain: AdainResBlock1d,
    config: ConditionalEmbeddingConfig,
}

impl ConditionalEmbedding {
    pub fn load(vb: VarBuilder, config: &ConditionalEmbeddingConfig) -> Result<Self> {
        config.validate()?;
        let embed = candle_nn::embedding(config.num_embeddings, config.d_model, vb.pp("embed"))?;
        let adain = AdainResBlock1d::load(
            vb.pp("adain"),
            config.d_model,
            config.d_model,
            config.style_dim,
            ADAIN_KERNEL_SIZE,
        )?;
        tracing::debug!(
            "conditional embedding: {} × {}",
            config.num_embeddings,
            config.d_model
        );
        Ok(Self {
            embed,
            adain,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &ConditionalEmbeddingConfig {
        &self.config
    }

    /// Reject ids outside `[0, num_embeddings)` instead of letting the lookup
    /// wrap or clamp.
    fn check_ids(&self, ids: &Tensor) -> Result<()> {
        let ids: Vec<i64> = ids.flatten_all()?.to_dtype(DType::I64)?.to_vec1()?;
        let num_embeddings = self.config.num_embeddings;
        match ids
            .into_iter()
            .find(|&id| id < 0 || id as usize >= num_embeddings)
        {
            Some(id) => Err(Error::InvalidTokenId { id, num_embeddings }),
            None => Ok(()),
        }
    }

    /// Forward pass.
    ///
    /// - `ids`: `[B, T]` integer token ids
    /// - `mask`: `[B, 1, T]`
    /// - `style`: `[B, style_dim]`
    ///
    /// Returns `[B, d_model, T]`, zero on padded frames.
    pub fn forward(&self, ids: &Tensor, mask: &Tensor, style: &Tensor) -> Result<Tensor> {
        let (b, t) = match *ids.dims() {
            [b, t] => (b, t),
            _ => return Err(Error::shape("ids", "[B, T]", ids.dims())),
        };
        shape::check_mask(mask, b, t)?;
        shape::check_style(style, b, self.config.style_dim)?;
        self.check_ids(ids)?;

        let emb = self.embed.forward(ids)?.transpose(1, 2)?.contiguous()?;
        let x = self.adain.forward(&emb, style)?;
        Ok(apply_mask(&x, mask)?)
    }
}

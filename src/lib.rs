//! Style-conditioned variance decoding in pure Rust.
//!
//! A candle-based implementation of the decoder stack that predicts a
//! per-frame prosodic trajectory (pitch, energy, ...) from an intermediate
//! phoneme representation, conditioned on an utterance-level style embedding.
//!
//! ## Architecture
//!
//! ```text
//! phoneme hidden [B, C_in, T] ─┐
//!                              ├→ VarianceDecoder
//! style embedding [B, S] ──────┤    n_blocks × ( n_layers × [conv → LeakyReLU → CondLN → dropout]
//!                              │                 → BiGRU )
//!                              │    → 1×1 conv → InstanceNorm → mask       [B, C_out, T]
//!                              │
//! aux features [B, C_aux, T] ──┴→ AuxDecoder
//!                                   detach(x) + aux_prenet(aux) → prenet
//!                                   → Encoder (attention + causal FFN, CondLN)
//!                                   → 1×1 conv → mask                      [B, C_out, T]
//! ```
//!
//! Every stage multiplies its output by a `[B, 1, T]` validity mask, so
//! padded frames are exactly zero on the way out.
//!
//! ## Modules
//!
//! - [`config`]: serde-deserializable hyperparameters with validation
//! - [`model`]: encoder, conditional embedding, aux decoder, variance decoder
//!   and the layers they are built from

pub mod config;
pub mod model;

mod error;

pub use error::{Error, Result};
pub use model::{AuxDecoder, ConditionalEmbedding, Encoder, Mode, VarianceDecoder};

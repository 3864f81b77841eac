//! Hyperparameters for the decoder stack.
//!
//! Every struct deserializes from JSON with per-field defaults, so a config
//! file only needs to list what differs from the stock model. Defaults match
//! the mel-conditioned pitch decoder (80 mel bins in, 256 hidden, 1 out,
//! 512-dim utterance embedding).

use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{Error, Result};

/// Dropout the aux decoder's inner encoder always uses, independent of the
/// aux decoder's own `p_dropout`.
pub const AUX_ENCODER_DROPOUT: f64 = 0.1;

/// Filter width multiplier for the aux decoder's inner encoder.
pub const AUX_ENCODER_FILTER_RATIO: usize = 4;

/// Load any config type from a JSON string and validate it.
pub fn from_json_str<T: DeserializeOwned + Validate>(json: &str) -> Result<T> {
    let cfg: T = serde_json::from_str(json)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load any config type from a JSON file and validate it.
pub fn from_file<T: DeserializeOwned + Validate>(path: impl AsRef<Path>) -> Result<T> {
    let json = std::fs::read_to_string(path)?;
    from_json_str(&json)
}

/// Construction-time sanity checks.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Encoder (transformer stack)
// ---------------------------------------------------------------------------

/// Configuration for the conditional transformer [`Encoder`](crate::Encoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Channel count of the sequence flowing through the stack.
    #[serde(default = "default_hidden_channels")]
    pub hidden_channels: usize,

    /// Inner width of the feed-forward convolutions.
    #[serde(default = "default_filter_channels")]
    pub filter_channels: usize,

    /// Number of attention heads.
    #[serde(default = "default_n_heads")]
    pub n_heads: usize,

    /// Number of attention + feed-forward layers.
    #[serde(default = "default_encoder_layers")]
    pub n_layers: usize,

    /// Feed-forward kernel size (causal).
    #[serde(default = "default_encoder_kernel_size")]
    pub kernel_size: usize,

    /// Dropout on attention probabilities and on both residual branches.
    #[serde(default)]
    pub p_dropout: f64,

    /// Style embedding dimension consumed by the conditional layer norms.
    #[serde(default = "default_utt_emb_dim")]
    pub utt_emb_dim: usize,

    /// Per-head width; `None` splits `hidden_channels` evenly across heads.
    #[serde(default)]
    pub dim_head: Option<usize>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            hidden_channels: default_hidden_channels(),
            filter_channels: default_filter_channels(),
            n_heads: default_n_heads(),
            n_layers: default_encoder_layers(),
            kernel_size: default_encoder_kernel_size(),
            p_dropout: 0.0,
            utt_emb_dim: default_utt_emb_dim(),
            dim_head: None,
        }
    }
}

impl Validate for EncoderConfig {
    fn validate(&self) -> Result<()> {
        check_positive("hidden_channels", self.hidden_channels)?;
        check_positive("filter_channels", self.filter_channels)?;
        check_positive("kernel_size", self.kernel_size)?;
        check_positive("utt_emb_dim", self.utt_emb_dim)?;
        check_heads(self.hidden_channels, self.n_heads, self.dim_head)?;
        check_dropout(self.p_dropout)
    }
}

// ---------------------------------------------------------------------------
// Conditional embedding
// ---------------------------------------------------------------------------

/// Configuration for [`ConditionalEmbedding`](crate::ConditionalEmbedding).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalEmbeddingConfig {
    /// Vocabulary size.
    #[serde(default = "default_num_embeddings")]
    pub num_embeddings: usize,

    /// Embedding width (output channels).
    #[serde(default = "default_hidden_channels")]
    pub d_model: usize,

    /// Style embedding dimension.
    #[serde(default = "default_utt_emb_dim")]
    pub style_dim: usize,
}

impl Default for ConditionalEmbeddingConfig {
    fn default() -> Self {
        Self {
            num_embeddings: default_num_embeddings(),
            d_model: default_hidden_channels(),
            style_dim: default_utt_emb_dim(),
        }
    }
}

impl Validate for ConditionalEmbeddingConfig {
    fn validate(&self) -> Result<()> {
        check_positive("num_embeddings", self.num_embeddings)?;
        check_positive("d_model", self.d_model)?;
        check_positive("style_dim", self.style_dim)
    }
}

// ---------------------------------------------------------------------------
// Aux decoder
// ---------------------------------------------------------------------------

/// Configuration for [`AuxDecoder`](crate::AuxDecoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxDecoderConfig {
    /// Channels of the auxiliary feature sequence.
    #[serde(default = "default_input_channels")]
    pub input_channels: usize,

    /// Channels of the primary hidden sequence and of the inner encoder.
    #[serde(default = "default_hidden_channels")]
    pub hidden_channels: usize,

    /// Projected output channels.
    #[serde(default = "default_output_channels")]
    pub output_channels: usize,

    /// Aux prenet and encoder feed-forward kernel size.
    #[serde(default = "default_kernel_size")]
    pub kernel_size: usize,

    /// Inner encoder layers.
    #[serde(default = "default_encoder_layers")]
    pub n_layers: usize,

    /// Inner encoder attention heads.
    #[serde(default = "default_n_heads")]
    pub n_heads: usize,

    #[serde(default)]
    pub dim_head: Option<usize>,

    /// Accepted for parity with the other decoders; the inner encoder always
    /// runs with [`AUX_ENCODER_DROPOUT`].
    #[serde(default = "default_p_dropout")]
    pub p_dropout: f64,

    #[serde(default = "default_utt_emb_dim")]
    pub utt_emb_dim: usize,
}

impl Default for AuxDecoderConfig {
    fn default() -> Self {
        Self {
            input_channels: default_input_channels(),
            hidden_channels: default_hidden_channels(),
            output_channels: default_output_channels(),
            kernel_size: default_kernel_size(),
            n_layers: default_encoder_layers(),
            n_heads: default_n_heads(),
            dim_head: None,
            p_dropout: default_p_dropout(),
            utt_emb_dim: default_utt_emb_dim(),
        }
    }
}

impl AuxDecoderConfig {
    /// Configuration of the inner transformer stack.
    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            hidden_channels: self.hidden_channels,
            filter_channels: self.hidden_channels * AUX_ENCODER_FILTER_RATIO,
            n_heads: self.n_heads,
            n_layers: self.n_layers,
            kernel_size: self.kernel_size,
            p_dropout: AUX_ENCODER_DROPOUT,
            utt_emb_dim: self.utt_emb_dim,
            dim_head: self.dim_head,
        }
    }
}

impl Validate for AuxDecoderConfig {
    fn validate(&self) -> Result<()> {
        check_positive("input_channels", self.input_channels)?;
        check_positive("output_channels", self.output_channels)?;
        check_same_padding(self.kernel_size)?;
        check_dropout(self.p_dropout)?;
        self.encoder_config().validate()
    }
}

// ---------------------------------------------------------------------------
// Variance decoder
// ---------------------------------------------------------------------------

/// Configuration for [`VarianceDecoder`](crate::VarianceDecoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceDecoderConfig {
    #[serde(default = "default_input_channels")]
    pub input_channels: usize,

    #[serde(default = "default_hidden_channels")]
    pub hidden_channels: usize,

    #[serde(default = "default_output_channels")]
    pub output_channels: usize,

    /// Prenet convolution kernel size (same padding, must be odd).
    #[serde(default = "default_kernel_size")]
    pub kernel_size: usize,

    /// Conv blocks per group.
    #[serde(default = "default_n_layers")]
    pub n_layers: usize,

    /// Groups, each closed by a bidirectional GRU.
    #[serde(default = "default_n_blocks")]
    pub n_blocks: usize,

    #[serde(default = "default_p_dropout")]
    pub p_dropout: f64,

    #[serde(default = "default_utt_emb_dim")]
    pub utt_emb_dim: usize,

    /// Heads of the self-attention layer appended to every group. `0` (the
    /// default) builds no attention layers.
    #[serde(default)]
    pub n_heads: usize,

    #[serde(default)]
    pub dim_head: Option<usize>,
}

impl Default for VarianceDecoderConfig {
    fn default() -> Self {
        Self {
            input_channels: default_input_channels(),
            hidden_channels: default_hidden_channels(),
            output_channels: default_output_channels(),
            kernel_size: default_kernel_size(),
            n_layers: default_n_layers(),
            n_blocks: default_n_blocks(),
            p_dropout: default_p_dropout(),
            utt_emb_dim: default_utt_emb_dim(),
            n_heads: 0,
            dim_head: None,
        }
    }
}

impl Validate for VarianceDecoderConfig {
    fn validate(&self) -> Result<()> {
        check_positive("input_channels", self.input_channels)?;
        check_positive("hidden_channels", self.hidden_channels)?;
        check_positive("output_channels", self.output_channels)?;
        check_positive("n_layers", self.n_layers)?;
        check_positive("n_blocks", self.n_blocks)?;
        check_positive("utt_emb_dim", self.utt_emb_dim)?;
        check_same_padding(self.kernel_size)?;
        check_dropout(self.p_dropout)?;
        if self.n_heads > 0 {
            check_heads(self.hidden_channels, self.n_heads, self.dim_head)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Checks and defaults
// ---------------------------------------------------------------------------

fn check_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(Error::Config(format!("{name} must be > 0")));
    }
    Ok(())
}

fn check_dropout(p: f64) -> Result<()> {
    if !(0.0..1.0).contains(&p) {
        return Err(Error::Config(format!("p_dropout must be in [0, 1), got {p}")));
    }
    Ok(())
}

/// Same padding `(k - 1) / 2` only preserves the time length for odd kernels.
fn check_same_padding(kernel_size: usize) -> Result<()> {
    if kernel_size % 2 == 0 {
        return Err(Error::Config(format!(
            "kernel_size must be odd for same padding, got {kernel_size}"
        )));
    }
    Ok(())
}

fn check_heads(channels: usize, n_heads: usize, dim_head: Option<usize>) -> Result<()> {
    check_positive("n_heads", n_heads)?;
    match dim_head {
        Some(d) => check_positive("dim_head", d),
        None if channels % n_heads != 0 => Err(Error::Config(format!(
            "hidden_channels ({channels}) must be divisible by n_heads ({n_heads})"
        ))),
        None => Ok(()),
    }
}

fn default_input_channels() -> usize {
    80
}
fn default_hidden_channels() -> usize {
    256
}
fn default_output_channels() -> usize {
    1
}
fn default_filter_channels() -> usize {
    1024
}
fn default_n_heads() -> usize {
    2
}
fn default_encoder_layers() -> usize {
    4
}
fn default_encoder_kernel_size() -> usize {
    1
}
fn default_kernel_size() -> usize {
    3
}
fn default_n_layers() -> usize {
    2
}
fn default_n_blocks() -> usize {
    2
}
fn default_p_dropout() -> f64 {
    0.1
}
fn default_utt_emb_dim() -> usize {
    512
}
fn default_num_embeddings() -> usize {
    256
}

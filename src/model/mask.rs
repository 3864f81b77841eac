//! Validity masks for padded batches.
//!
//! A validity mask is a `[B, 1, T]` float tensor with 1.0 on real frames and
//! 0.0 on padding. It broadcasts over the channel axis of `[B, C, T]`
//! features. Attention uses the `[B, T, T]` outer product of the mask with
//! itself.

use candle_core::{DType, Device, Result, Tensor};

/// Score written into masked query/key pairs before the softmax.
pub const MASKED_SCORE: f64 = -1e4;

/// Build a `[B, 1, max_len]` mask from per-sequence lengths.
///
/// `max_len` defaults to the longest length. Lengths beyond `max_len` are
/// clamped to a full row.
pub fn sequence_mask(
    lengths: &[usize],
    max_len: Option<usize>,
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    let max_len = max_len.unwrap_or_else(|| lengths.iter().copied().max().unwrap_or(0));
    let mut mask_data = vec![0.0f32; lengths.len() * max_len];
    for (b, &len) in lengths.iter().enumerate() {
        let row = &mut mask_data[b * max_len..(b + 1) * max_len];
        for v in row.iter_mut().take(len) {
            *v = 1.0;
        }
    }
    Tensor::from_vec(mask_data, (lengths.len(), 1, max_len), device)?.to_dtype(dtype)
}

/// Outer product of a `[B, 1, T]` mask with itself → `[B, T, T]`.
///
/// Entry `(b, i, j)` is 1 iff both frame `i` and frame `j` are valid.
pub fn pairwise_mask(mask: &Tensor) -> Result<Tensor> {
    let rows = mask.transpose(1, 2)?; // [B, T, 1]
    rows.broadcast_mul(mask)
}

/// Zero out padded frames of a `[B, C, T]` sequence.
pub fn apply_mask(x: &Tensor, mask: &Tensor) -> Result<Tensor> {
    x.broadcast_mul(mask)
}

/// Overwrite the `[B, H, T_q, T_k]` scores of masked pairs with
/// [`MASKED_SCORE`]. `pairwise` is the `[B, T_q, T_k]` mask, shared by all heads.
///
/// A query row with no visible key ends up constant, so its softmax is uniform.
pub fn mask_scores(scores: &Tensor, pairwise: &Tensor) -> Result<Tensor> {
    let visible = pairwise
        .ne(0.0)?
        .unsqueeze(1)?
        .broadcast_as(scores.shape())?;
    let fill = Tensor::new(MASKED_SCORE, scores.device())?
        .to_dtype(scores.dtype())?
        .broadcast_as(scores.shape())?;
    visible.where_cond(scores, &fill)
}

//! Input shape checks run at the top of every public forward pass.
//!
//! Inputs that disagree with the model's hyperparameters, or with each
//! other, fail with [`Error::ShapeMismatch`] before any compute happens.

use candle_core::Tensor;

use crate::{Error, Result};

/// Check a `[B, C, T]` sequence against an expected channel count.
/// Returns `(B, T)`.
pub fn check_sequence(name: &'static str, x: &Tensor, channels: usize) -> Result<(usize, usize)> {
    let dims = x.dims();
    match *dims {
        [b, c, t] if c == channels => Ok((b, t)),
        _ => Err(Error::shape(name, format!("[B, {channels}, T]"), dims)),
    }
}

/// Check a `[B, 1, T]` validity mask against the batch and time of its sequence.
pub fn check_mask(mask: &Tensor, batch: usize, time: usize) -> Result<()> {
    let dims = mask.dims();
    if dims != [batch, 1, time] {
        return Err(Error::shape("mask", format!("[{batch}, 1, {time}]"), dims));
    }
    Ok(())
}

/// Check a `[B, S]` style embedding.
pub fn check_style(style: &Tensor, batch: usize, style_dim: usize) -> Result<()> {
    let dims = style.dims();
    if dims != [batch, style_dim] {
        return Err(Error::shape(
            "style",
            format!("[{batch}, {style_dim}]"),
            dims,
        ));
    }
    Ok(())
}

/// Check sequence, mask and (optional) style together. Returns `(B, T)`.
pub fn check_inputs(
    x: &Tensor,
    channels: usize,
    mask: &Tensor,
    style: Option<&Tensor>,
    style_dim: usize,
) -> Result<(usize, usize)> {
    let (b, t) = check_sequence("x", x, channels)?;
    check_mask(mask, b, t)?;
    if let Some(style) = style {
        check_style(style, b, style_dim)?;
    }
    Ok((b, t))
}

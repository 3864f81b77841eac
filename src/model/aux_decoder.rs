//! Auxiliary decoder: fuses a detached hidden sequence with auxiliary features.
//!
//! ```text
//! x [B, hidden, T] ── detach ──┐
//! aux [B, C_aux, T] → aux_prenet (Conv1d k, same pad) · mask ─→ +
//!   → prenet (Conv1d k=3, pad 1) · mask
//!   → Encoder(hidden, filter = 4·hidden, p_dropout = 0.1, style)
//!   → proj (Conv1d 1×1 → C_out) · mask
//!   → · mask                                                   [B, C_out, T]
//! ```
//!
//! `x` is detached before use: no gradient flows from this decoder back into
//! whatever produced `x`. The trailing second mask multiply is a no-op and
//! kept on purpose.

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use super::encoder::Encoder;
use super::mask::apply_mask;
use super::{shape, Mode};
use crate::config::{AuxDecoderConfig, Validate};
use crate::Result;

#[derive(Debug, Clone)]
pub struct AuxDecoder {
    aux_prenet: candle_nn::Conv1d,
    prenet: candle_nn::Conv1d,
    encoder: Encoder,
    proj: candle_nn::Conv1d,
    config: AuxDecoderConfig,
}

impl AuxDecoder {
    pub fn load(vb: VarBuilder, config: &AuxDecoderConfig) -> Result<Self> {
        config.validate()?;
        let hidden = config.hidden_channels;

        let aux_prenet = candle_nn::conv1d(
            config.input_channels,
            hidden,
            config.kernel_size,
            candle_nn::Conv1dConfig {
                padding: (config.kernel_size - 1) / 2,
                ..Default::default()
            },
            vb.pp("aux_prenet"),
        )?;
        let prenet = candle_nn::conv1d(
            hidden,
            hidden,
            3,
            candle_nn::Conv1dConfig {
                padding: 1,
                ..Default::default()
            },
            vb.pp("prenet"),
        )?;
        let encoder = Encoder::load(vb.pp("aux_decoder"), &config.encoder_config())?;
        let proj = candle_nn::conv1d(
            hidden,
            config.output_channels,
            1,
            candle_nn::Conv1dConfig::default(),
            vb.pp("proj"),
        )?;

        tracing::debug!(
            "aux decoder: {} aux → {} hidden → {} out",
            config.input_channels,
            hidden,
            config.output_channels,
        );

        Ok(Self {
            aux_prenet,
            prenet,
            encoder,
            proj,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &AuxDecoderConfig {
        &self.config
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Forward pass.
    ///
    /// - `x`: `[B, hidden_channels, T]` primary hidden sequence (detached here)
    /// - `mask`: `[B, 1, T]`
    /// - `aux`: `[B, input_channels, T]`
    /// - `style`: `[B, utt_emb_dim]`
    ///
    /// Returns `[B, output_channels, T]`, zero on padded frames.
    pub fn forward(
        &self,
        x: &Tensor,
        mask: &Tensor,
        aux: &Tensor,
        style: &Tensor,
        mode: Mode,
    ) -> Result<Tensor> {
        let (b, t) = shape::check_inputs(
            x,
            self.config.hidden_channels,
            mask,
            Some(style),
            self.config.utt_emb_dim,
        )?;
        let (aux_b, aux_t) = shape::check_sequence("aux", aux, self.config.input_channels)?;
        if (aux_b, aux_t) != (b, t) {
            return Err(crate::Error::shape(
                "aux",
                format!("[{b}, {}, {t}]", self.config.input_channels),
                aux.dims(),
            ));
        }
        tracing::trace!("aux decoder forward: x {:?}, aux {:?}", x.dims(), aux.dims());

        let x = x.detach();

        // Prenets
        let aux = apply_mask(&self.aux_prenet.forward(aux)?, mask)?;
        let x = (x + aux)?;
        let x = apply_mask(&self.prenet.forward(&x)?, mask)?;

        let x = self.encoder.forward(&x, mask, Some(style), mode)?;

        let x = apply_mask(&self.proj.forward(&x)?, mask)?;
        Ok(apply_mask(&x, mask)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mask::sequence_mask;
    use candle_core::{DType, Device, IndexOp, Var};
    use candle_nn::VarMap;

    fn small_cfg() -> AuxDecoderConfig {
        AuxDecoderConfig {
            input_channels: 6,
            hidden_channels: 16,
            output_channels: 3,
            kernel_size: 3,
            n_layers: 2,
            n_heads: 2,
            dim_head: None,
            p_dropout: 0.1,
            utt_emb_dim: 8,
        }
    }

    fn build() -> (VarMap, AuxDecoder) {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        (varmap, AuxDecoder::load(vb, &small_cfg()).unwrap())
    }

    #[test]
    fn test_output_shape_and_padding() {
        let device = Device::Cpu;
        let (_varmap, dec) = build();
        assert_eq!(dec.encoder().config().filter_channels, 64);

        let x = Tensor::randn(0f32, 1.0, (2, 16, 8), &device).unwrap();
        let aux = Tensor::randn(0f32, 1.0, (2, 6, 8), &device).unwrap();
        let mask = sequence_mask(&[8, 5], None, DType::F32, &device).unwrap();
        let g = Tensor::randn(0f32, 1.0, (2, 8), &device).unwrap();

        let y = dec.forward(&x, &mask, &aux, &g, Mode::Eval).unwrap();
        assert_eq!(y.dims(), &[2, 3, 8]);
        let tail: Vec<f32> = y.i((1, .., 5..)).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert!(tail.iter().all(|&v| v == 0.0));
        let head: Vec<f32> = y.i((1, .., ..5)).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert!(head.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_no_gradient_through_hidden_input() {
        let device = Device::Cpu;
        let (_varmap, dec) = build();

        // Stand-in for the upstream model that produced `x`.
        let upstream = Var::randn(0f32, 1.0, (1, 16, 6), &device).unwrap();
        let x = (upstream.as_tensor() * 2.0).unwrap();
        let aux = Var::randn(0f32, 1.0, (1, 6, 6), &device).unwrap();
        let mask = Tensor::ones((1, 1, 6), DType::F32, &device).unwrap();
        let g = Tensor::randn(0f32, 1.0, (1, 8), &device).unwrap();

        let y = dec
            .forward(&x, &mask, aux.as_tensor(), &g, Mode::Eval)
            .unwrap();
        let grads = y.sum_all().unwrap().backward().unwrap();

        if let Some(grad) = grads.get(upstream.as_tensor()) {
            let total: f32 = grad.abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
            assert_eq!(total, 0.0, "gradient leaked through detach");
        }
        assert!(
            grads.get(aux.as_tensor()).is_some(),
            "aux branch should still receive gradients"
        );
    }

    #[test]
    fn test_eval_is_deterministic() {
        let device = Device::Cpu;
        let (_varmap, dec) = build();
        let x = Tensor::randn(0f32, 1.0, (1, 16, 7), &device).unwrap();
        let aux = Tensor::randn(0f32, 1.0, (1, 6, 7), &device).unwrap();
        let mask = sequence_mask(&[6], Some(7), DType::F32, &device).unwrap();
        let g = Tensor::randn(0f32, 1.0, (1, 8), &device).unwrap();

        let a: Vec<f32> = dec
            .forward(&x, &mask, &aux, &g, Mode::Eval)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        let b: Vec<f32> = dec
            .forward(&x, &mask, &aux, &g, Mode::Eval)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_aux_length_mismatch() {
        let device = Device::Cpu;
        let (_varmap, dec) = build();
        let x = Tensor::randn(0f32, 1.0, (1, 16, 7), &device).unwrap();
        let aux = Tensor::randn(0f32, 1.0, (1, 6, 6), &device).unwrap();
        let mask = Tensor::ones((1, 1, 7), DType::F32, &device).unwrap();
        let g = Tensor::randn(0f32, 1.0, (1, 8), &device).unwrap();
        assert!(matches!(
            dec.forward(&x, &mask, &aux, &g, Mode::Eval),
            Err(crate::Error::ShapeMismatch { name: "aux", .. })
        ));
    }

    #[test]
    fn test_rejects_aux_channel_mismatch() {
        let device = Device::Cpu;
        let (_varmap, dec) = build();
        let x = Tensor::randn(0f32, 1.0, (1, 16, 7), &device).unwrap();
        let aux = Tensor::randn(0f32, 1.0, (1, 16, 7), &device).unwrap();
        let mask = Tensor::ones((1, 1, 7), DType::F32, &device).unwrap();
        let g = Tensor::randn(0f32, 1.0, (1, 8), &device).unwrap();
        assert!(dec.forward(&x, &mask, &aux, &g, Mode::Eval).is_err());
    }
}

//! Model components for the variance decoder.
//!
//! ## Components
//!
//! - [`encoder`]: conditional transformer stack (attention + causal FFN, CondLN)
//! - [`embedding`]: token embedding refined by an AdaIN residual block
//! - [`aux_decoder`]: fuses a detached hidden sequence with auxiliary features
//! - [`variance_decoder`]: conv/GRU prenet stack with instance-normed projection
//!
//! Building blocks: [`attention`], [`ffn`], [`norm`], [`adain`], [`recurrent`],
//! plus [`mask`] helpers and input [`shape`] checks.

pub mod adain;
pub mod attention;
pub mod aux_decoder;
pub mod embedding;
pub mod encoder;
pub mod ffn;
pub mod mask;
pub mod norm;
pub mod recurrent;
pub mod shape;
pub mod variance_decoder;

pub use aux_decoder::AuxDecoder;
pub use embedding::ConditionalEmbedding;
pub use encoder::Encoder;
pub use variance_decoder::VarianceDecoder;

/// Whether stochastic layers (dropout) are active.
///
/// Passed explicitly into every forward call that owns dropout; there is no
/// global train/eval switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Train,
    #[default]
    Eval,
}

impl Mode {
    pub fn is_train(self) -> bool {
        self == Mode::Train
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_models_are_send_and_sync() {
        assert_send_sync::<Encoder>();
        assert_send_sync::<ConditionalEmbedding>();
        assert_send_sync::<AuxDecoder>();
        assert_send_sync::<VarianceDecoder>();
    }

    #[test]
    fn test_default_mode_is_eval() {
        assert_eq!(Mode::default(), Mode::Eval);
        assert!(!Mode::Eval.is_train());
        assert!(Mode::Train.is_train());
    }
}

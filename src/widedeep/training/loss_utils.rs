//! Objectives, their losses and loss validation.

use burn::nn::loss::{
    BinaryCrossEntropyLossConfig, CrossEntropyLossConfig, MseLoss, Reduction,
};
use burn::prelude::*;
use burn::tensor::Int;
use serde::{Deserialize, Serialize};

use crate::widedeep::error::{Result, WideDeepError};

/// Loss magnitude above which a warning is logged.
const LARGE_LOSS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    /// Mean squared error on one output.
    Regression,
    /// Binary cross-entropy on one logit, targets 0 or 1.
    Binary,
    /// Cross-entropy over `n_classes` logits, targets `0..n_classes`.
    Multiclass { n_classes: usize },
}

impl Objective {
    /// Model output width this objective expects.
    pub fn output_dim(&self) -> usize {
        match self {
            Objective::Regression | Objective::Binary => 1,
            Objective::Multiclass { n_classes } => *n_classes,
        }
    }

    /// Mean loss of `output` (`[batch, output_dim]`) against `targets`.
    ///
    /// `rows` are the absolute source rows of the batch, used to report
    /// invalid targets.
    pub fn loss<B: Backend>(
        &self,
        output: Tensor<B, 2>,
        targets: &[f32],
        rows: &[usize],
        device: &B::Device,
    ) -> Result<Tensor<B, 1>> {
        let [batch, width] = output.dims();
        if targets.len() != batch {
            return Err(WideDeepError::shape("loss targets", batch, targets.len()));
        }
        if width != self.output_dim() {
            return Err(WideDeepError::shape("model output", self.output_dim(), width));
        }

        match self {
            Objective::Regression => {
                let targets = Tensor::<B, 2>::from_data(TensorData::new(targets.to_vec(), [batch, 1]), device);
                Ok(MseLoss::new().forward(output, targets, Reduction::Mean))
            }
            Objective::Binary => {
                let labels = class_labels(targets, rows, 2)?;
                let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch]), device);
                let loss = BinaryCrossEntropyLossConfig::new()
                    .with_logits(true)
                    .init(device);
                Ok(loss.forward(output.reshape([batch]), labels))
            }
            Objective::Multiclass { n_classes } => {
                let labels = class_labels(targets, rows, *n_classes)?;
                let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch]), device);
                Ok(CrossEntropyLossConfig::new().init(device).forward(output, labels))
            }
        }
    }
}

fn class_labels(targets: &[f32], rows: &[usize], n_classes: usize) -> Result<Vec<i64>> {
    targets
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            if t.fract() == 0.0 && t >= 0.0 && (t as usize) < n_classes {
                Ok(t as i64)
            } else {
                let row = rows.get(i).copied().unwrap_or(i);
                Err(WideDeepError::decode(
                    row,
                    format!("target {t} is not a class label in 0..{n_classes}"),
                ))
            }
        })
        .collect()
}

/// Reject NaN and infinite losses; warn on very large ones.
pub fn validate_loss(value: f64, iteration: usize) -> Result<()> {
    if !value.is_finite() {
        return Err(WideDeepError::NumericalInstability { iteration, value });
    }
    if value > LARGE_LOSS {
        log::warn!(
            "very large loss ({value:.6}) at iteration {iteration}; consider a smaller learning rate or rescaled inputs"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::ElementConversion;

    type TestBackend = burn_autodiff::Autodiff<burn_ndarray::NdArray<f32>>;

    fn scalar(loss: Tensor<TestBackend, 1>) -> f64 {
        loss.into_scalar().elem::<f64>()
    }

    #[test]
    fn test_regression_loss_value() {
        let device = Default::default();
        let output = Tensor::<TestBackend, 2>::from_floats([[1.0], [3.0]], &device);
        let loss = Objective::Regression
            .loss(output, &[0.0, 1.0], &[0, 1], &device)
            .unwrap();
        // ((1-0)^2 + (3-1)^2) / 2
        assert!((scalar(loss) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_binary_loss_is_positive_and_finite() {
        let device = Default::default();
        let output = Tensor::<TestBackend, 2>::from_floats([[2.0], [-1.0], [0.0]], &device);
        let value = scalar(
            Objective::Binary
                .loss(output, &[1.0, 0.0, 1.0], &[0, 1, 2], &device)
                .unwrap(),
        );
        assert!(value.is_finite() && value > 0.0);
    }

    #[test]
    fn test_multiclass_rejects_bad_labels() {
        let device = Default::default();
        let output = Tensor::<TestBackend, 2>::zeros([2, 3], &device);

        let value = scalar(
            Objective::Multiclass { n_classes: 3 }
                .loss(output.clone(), &[0.0, 2.0], &[0, 1], &device)
                .unwrap(),
        );
        assert!((value - 3f64.ln()).abs() < 1e-5, "uniform logits give ln(3)");

        let err = Objective::Multiclass { n_classes: 3 }
            .loss(output, &[0.0, 3.0], &[40, 41], &device)
            .unwrap_err();
        assert!(matches!(err, WideDeepError::Decode { row: 41, .. }));
    }

    #[test]
    fn test_loss_shape_checks() {
        let device = Default::default();
        let output = Tensor::<TestBackend, 2>::zeros([2, 2], &device);
        assert!(Objective::Regression.loss(output.clone(), &[0.0, 1.0], &[0, 1], &device).is_err());
        assert!(
            Objective::Multiclass { n_classes: 2 }
                .loss(output, &[0.0], &[0], &device)
                .is_err()
        );
    }

    #[test]
    fn test_validate_loss() {
        assert!(validate_loss(0.5, 0).is_ok());
        assert!(validate_loss(500.0, 1).is_ok());
        assert!(matches!(
            validate_loss(f64::NAN, 7),
            Err(WideDeepError::NumericalInstability { iteration: 7, .. })
        ));
        assert!(validate_loss(f64::INFINITY, 0).is_err());
    }
}

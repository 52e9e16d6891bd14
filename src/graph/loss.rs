//! Loss attached to the forward graph

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::error::{NetError, Result};

/// Mean squared error over time steps `loss_tap..seq_len`.
///
/// Steps before `loss_tap` still run through the recurrence but do not
/// contribute, which excludes a warm-up prefix from the objective.
pub fn mse_from<C: Backend>(
    output: Tensor<C, 3>,
    target: Tensor<C, 3>,
    loss_tap: usize,
) -> Result<Tensor<C, 1>> {
    if output.dims() != target.dims() {
        return Err(NetError::InputShape(format!(
            "target {:?} does not match output {:?}",
            target.dims(),
            output.dims()
        )));
    }
    let seq_len = output.dims()[0];
    if loss_tap >= seq_len {
        return Err(NetError::TapOutOfRange {
            tap: loss_tap,
            len: seq_len,
        });
    }
    let span = seq_len - loss_tap;
    let diff = output.narrow(0, loss_tap, span) - target.narrow(0, loss_tap, span);
    Ok(diff.powf_scalar(2.0).mean())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_mse_full_sequence() {
        let device = Default::default();
        let output = Tensor::<TestBackend, 3>::ones([4, 2, 1], &device);
        let target = Tensor::<TestBackend, 3>::zeros([4, 2, 1], &device);

        let loss = mse_from(output, target, 0).unwrap().into_scalar();
        assert!((loss - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mse_skips_warm_up() {
        let device = Default::default();
        // large error only in the first two steps
        let output = Tensor::<TestBackend, 3>::cat(
            vec![
                Tensor::full([2, 1, 1], 10.0, &device),
                Tensor::full([2, 1, 1], 2.0, &device),
            ],
            0,
        );
        let target = Tensor::<TestBackend, 3>::zeros([4, 1, 1], &device);

        let loss = mse_from(output, target, 2).unwrap().into_scalar();
        assert!((loss - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_mse_loss_tap_out_of_range() {
        let device = Default::default();
        let output = Tensor::<TestBackend, 3>::ones([3, 1, 1], &device);
        let target = Tensor::<TestBackend, 3>::ones([3, 1, 1], &device);
        assert!(matches!(
            mse_from(output, target, 3),
            Err(NetError::TapOutOfRange { tap: 3, len: 3 })
        ));
    }

    #[test]
    fn test_mse_shape_mismatch() {
        let device = Default::default();
        let output = Tensor::<TestBackend, 3>::ones([3, 2, 1], &device);
        let target = Tensor::<TestBackend, 3>::ones([3, 1, 1], &device);
        assert!(matches!(mse_from(output, target, 0), Err(NetError::InputShape(_))));
    }
}

//! Gradient extraction for the training graph

use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};

/// Rescale `grad` so its L2 norm does not exceed `max_norm`
pub fn clip_norm<C: Backend>(grad: Tensor<C, 2>, max_norm: f32) -> Tensor<C, 2> {
    let norm = grad
        .clone()
        .powf_scalar(2.0)
        .sum()
        .sqrt()
        .into_scalar()
        .elem::<f32>();
    if norm > max_norm {
        grad.mul_scalar(max_norm / norm)
    } else {
        grad
    }
}

/// Gradient of every tracked leaf in `wrt`, optionally norm-clipped.
///
/// Leaves the loss does not depend on get a zero gradient of their own shape.
pub fn collect<B: AutodiffBackend>(
    wrt: &[Tensor<B, 2>],
    gradients: &B::Gradients,
    clip: Option<f32>,
) -> Vec<Tensor<B::InnerBackend, 2>> {
    wrt.iter()
        .map(|leaf| {
            let grad = leaf
                .grad(gradients)
                .unwrap_or_else(|| leaf.clone().inner().zeros_like());
            match clip {
                Some(max_norm) => clip_norm(grad, max_norm),
                None => grad,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type Inner = NdArray<f32>;
    type TestBackend = Autodiff<Inner>;

    #[test]
    fn test_clip_norm_rescales_large_gradients() {
        let device = Default::default();
        let grad = Tensor::<Inner, 2>::from_floats([[3.0, 4.0]], &device);

        let clipped = clip_norm(grad.clone(), 1.0);
        let values = clipped.to_data().to_vec::<f32>().unwrap();
        assert!((values[0] - 0.6).abs() < 1e-6);
        assert!((values[1] - 0.8).abs() < 1e-6);

        let untouched = clip_norm(grad, 10.0).to_data().to_vec::<f32>().unwrap();
        assert_eq!(untouched, vec![3.0, 4.0]);
    }

    #[test]
    fn test_collect_gradients() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_floats([[1.0, -2.0]], &device).require_grad();
        let unused = Tensor::<TestBackend, 2>::ones([2, 2], &device).require_grad();

        let loss = (x.clone() * x.clone()).sum();
        let gradients = loss.backward();
        let grads = collect(&[x, unused], &gradients, None);

        assert_eq!(grads[0].to_data().to_vec::<f32>().unwrap(), vec![2.0, -4.0]);
        assert_eq!(grads[1].dims(), [2, 2]);
        assert_eq!(grads[1].clone().abs().sum().into_scalar(), 0.0);
    }

    #[test]
    fn test_collect_applies_clip() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_floats([[30.0, 40.0]], &device).require_grad();

        let loss = (x.clone() * x.clone()).sum();
        let gradients = loss.backward();
        let grads = collect(&[x], &gradients, Some(5.0));

        let norm = grads[0].clone().powf_scalar(2.0).sum().sqrt().into_scalar();
        assert!((norm - 5.0).abs() < 1e-4);
    }
}

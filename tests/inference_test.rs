#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::{Distribution, Tensor};
    use seqnet::prelude::*;
    use tempfile::{tempdir, TempDir};

    type Inner = NdArray<f32>;
    type Backend = Autodiff<Inner>;

    /// Persist an untrained run so inference instances have something to load
    fn run_dir(options: NetOptions) -> TempDir {
        let dir = tempdir().unwrap();
        let net = NetBuilder::new()
            .with_options(options)
            .save_to(dir.path())
            .build::<Backend>(&Default::default())
            .unwrap();
        net.save_v_params_to_workspace(None).unwrap();
        dir
    }

    fn inference_net(dir: &TempDir, batch_size: usize) -> Net<Backend> {
        NetBuilder::new()
            .load_from(dir.path())
            .with_batch_size(batch_size)
            .build::<Backend>(&Default::default())
            .unwrap()
    }

    fn max_abs_diff(a: Tensor<Inner, 3>, b: Tensor<Inner, 3>) -> f32 {
        (a - b).abs().max().into_scalar()
    }

    #[test]
    fn test_instances_have_distinct_prefixes_and_state() {
        let dir = run_dir(NetOptions::new(3, 1).with_layers(2, 4).with_unit_type(UnitType::Gru));
        let mut first = inference_net(&dir, 2);
        let second = inference_net(&dir, 2);

        assert_ne!(first.prefix(), second.prefix());

        first.initialize_states().unwrap();
        let device = Default::default();
        let input = Tensor::random([3, 2, 3], Distribution::Uniform(-1.0, 1.0), &device);
        let output = first.fwd_propagate_inference(InferBatch::new(input)).unwrap();

        assert_eq!(output.dims(), [3, 2, 1]);
        assert!(first.prev_states()[0].clone().abs().max().into_scalar() > 0.0);
        for state in second.prev_states() {
            assert_eq!(state.clone().abs().max().into_scalar(), 0.0);
        }
    }

    #[test]
    fn test_chunked_inference_matches_whole_sequence() {
        let dir = run_dir(NetOptions::new(2, 1).with_layers(2, 4).with_unit_type(UnitType::Lstm));
        let mut whole = inference_net(&dir, 1);
        let mut chunked = inference_net(&dir, 1);
        let device = Default::default();
        let input: Tensor<Inner, 3> =
            Tensor::random([6, 1, 2], Distribution::Uniform(-1.0, 1.0), &device);

        whole.initialize_states().unwrap();
        let full = whole
            .fwd_propagate_inference(InferBatch::new(input.clone()))
            .unwrap();

        chunked.initialize_states().unwrap();
        let head = chunked
            .fwd_propagate_inference(InferBatch::new(input.clone().narrow(0, 0, 3)))
            .unwrap();
        let tail = chunked
            .fwd_propagate_inference(InferBatch::new(input.narrow(0, 3, 3)))
            .unwrap();

        assert!(max_abs_diff(full.clone().narrow(0, 0, 3), head) < 1e-5);
        assert!(max_abs_diff(full.narrow(0, 3, 3), tail) < 1e-5);
    }

    #[test]
    fn test_initialize_states_restarts_sequence() {
        let dir = run_dir(NetOptions::new(2, 1).with_layers(1, 4).with_unit_type(UnitType::Gru));
        let mut net = inference_net(&dir, 1);
        let device = Default::default();
        let input: Tensor<Inner, 3> =
            Tensor::random([4, 1, 2], Distribution::Uniform(-1.0, 1.0), &device);

        net.initialize_states().unwrap();
        let first = net.fwd_propagate_inference(InferBatch::new(input.clone())).unwrap();
        let carried = net.fwd_propagate_inference(InferBatch::new(input.clone())).unwrap();
        net.initialize_states().unwrap();
        let restarted = net.fwd_propagate_inference(InferBatch::new(input)).unwrap();

        assert!(max_abs_diff(first.clone(), carried) > 0.0);
        assert_eq!(max_abs_diff(first, restarted), 0.0);
    }

    #[test]
    fn test_resize_batch_rederives_states() {
        let dir = run_dir(NetOptions::new(3, 1).with_layers(2, 4).with_unit_type(UnitType::Lstm));
        let mut net = inference_net(&dir, 2);
        assert_eq!(net.prev_states()[1].dims(), [2, 8]);

        net.resize_batch(5).unwrap();
        assert_eq!(net.options().batch_size, 5);
        for state in net.prev_states() {
            assert_eq!(state.dims(), [5, 8]);
        }

        let device = Default::default();
        let output = net
            .fwd_propagate_inference(InferBatch::new(Tensor::ones([2, 5, 3], &device)))
            .unwrap();
        assert_eq!(output.dims(), [2, 5, 1]);
        assert!(matches!(net.resize_batch(0), Err(NetError::InvalidOption(_))));
    }

    #[test]
    fn test_inference_rejects_wrong_input_width() {
        let dir = run_dir(NetOptions::new(3, 1).with_layers(1, 4));
        let mut net = inference_net(&dir, 1);
        let device = Default::default();

        let err = net
            .fwd_propagate_inference(InferBatch::new(Tensor::ones([2, 1, 4], &device)))
            .unwrap_err();
        assert!(matches!(err, NetError::InputShape(_)));
    }

    #[test]
    fn test_training_entry_points_rejected() {
        let dir = run_dir(NetOptions::new(3, 1).with_layers(1, 4));
        let mut net = inference_net(&dir, 1);
        let device = Default::default();
        let batch = TrainBatch::new(Tensor::ones([2, 1, 3], &device), Tensor::ones([2, 1, 1], &device));

        assert!(matches!(
            net.fwd_propagate(batch.clone()),
            Err(NetError::ModeViolation { op: "fwd_propagate", .. })
        ));
        assert!(matches!(
            net.fwd_bwd_propagate(batch),
            Err(NetError::ModeViolation { op: "fwd_bwd_propagate", .. })
        ));
    }

    #[test]
    fn test_embedding_inference_requires_ids() {
        let dir = run_dir(
            NetOptions::new(3, 1)
                .with_layers(1, 4)
                .with_id_embedding(3, 2)
                .with_batch_size(2),
        );
        let mut net = inference_net(&dir, 2);
        let device = Default::default();
        let input: Tensor<Inner, 3> = Tensor::ones([2, 2, 3], &device);

        assert!(matches!(
            net.fwd_propagate_inference(InferBatch::new(input.clone())),
            Err(NetError::MissingInput("id_idx"))
        ));

        let output = net
            .fwd_propagate_inference(
                InferBatch::new(input).with_id_idx(Tensor::from_ints([2, 0], &device)),
            )
            .unwrap();
        assert_eq!(output.dims(), [2, 2, 1]);
        assert!(net.ports(Function::FwdPropagateInference)
            .iter()
            .any(|p| p.name == "id_idx" && p.consumed));
    }
}

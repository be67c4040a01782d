//! Tests for the convolutional restoration network

#[cfg(test)]
mod tests {
    use carekit::data::axes::Axes;
    use carekit::model::config::{LossKind, ModelConfig};
    use carekit::model::loss::{loss_and_gradient, loss_values};
    use carekit::model::network::{FilterNetwork, NetworkWeights};
    use ndarray::{Array1, Array4};

    fn config(c_in: usize, c_out: usize) -> ModelConfig {
        ModelConfig::new(&Axes::parse("SCYX").unwrap(), c_in, c_out).with_kernel_size(3)
    }

    fn ramp(shape: (usize, usize, usize, usize)) -> Array4<f32> {
        Array4::from_shape_fn(shape, |(n, c, y, x)| {
            ((n * 7 + c * 5 + y * 3 + x * 11) % 13) as f32 / 13.0
        })
    }

    // Tests a fresh residual network reproduces its input
    // Verified by initialising kernels at the centre tap as well
    #[test]
    fn test_residual_starts_as_identity() {
        let network = FilterNetwork::new(&config(1, 1));
        let input = ramp((2, 1, 6, 5));
        let prediction = network.forward(input.view()).unwrap();
        assert_eq!(prediction.mean, input);
        assert!(prediction.scale.is_none());
    }

    // Tests a fresh non-residual network averages its input channels
    // Verified by summing channels instead
    #[test]
    fn test_plain_network_averages_channels() {
        let network = FilterNetwork::new(&config(2, 1));
        let input = ramp((1, 2, 4, 4));
        let prediction = network.forward(input.view()).unwrap();

        for y in 0..4 {
            for x in 0..4 {
                let expected = (input[[0, 0, y, x]] + input[[0, 1, y, x]]) / 2.0;
                assert!((prediction.mean[[0, 0, y, x]] - expected).abs() < 1e-6);
            }
        }
    }

    // Tests a probabilistic network starts with unit scale
    // Verified by storing the raw parameter as the scale
    #[test]
    fn test_probabilistic_unit_scale() {
        let network = FilterNetwork::new(&config(1, 1).with_probabilistic(true));
        let scale = network.scale().unwrap();
        assert!((scale[0] - 1.0).abs() < 1e-5);
    }

    // Tests kernels take their size from the configuration
    // Verified by always allocating the default kernel size
    #[test]
    fn test_kernel_shape_follows_config() {
        let small = FilterNetwork::new(&config(2, 1));
        assert_eq!(small.weights().kernels.dim(), (1, 2, 3, 3));

        let default = ModelConfig::new(&Axes::parse("SCYX").unwrap(), 1, 1);
        let kernel_size = default.kernel_size();
        let network = FilterNetwork::new(&default);
        assert_eq!(
            network.weights().kernels.dim(),
            (1, 1, kernel_size, kernel_size)
        );
        assert_ne!(kernel_size, 3);
    }

    // Tests a shifted kernel tap moves the image with zero padding
    // Verified by wrapping around the border
    #[test]
    fn test_shift_kernel_zero_pads() {
        let config = config(1, 1).with_residual(false);
        let mut kernels = Array4::zeros((1, 1, 3, 3));
        kernels[[0, 0, 1, 2]] = 1.0;
        let weights = NetworkWeights {
            kernels,
            bias: Array1::zeros(1),
            scale: None,
        };
        let network = FilterNetwork::from_weights(weights, &config).unwrap();

        let input = ramp((1, 1, 3, 4));
        let output = network.forward(input.view()).unwrap().mean;
        for y in 0..3 {
            for x in 0..3 {
                assert_eq!(output[[0, 0, y, x]], input[[0, 0, y, x + 1]]);
            }
            assert_eq!(output[[0, 0, y, 3]], 0.0);
        }
    }

    // Tests persisted weights must agree with the configuration
    // Verified by accepting any kernel shape
    #[test]
    fn test_from_weights_checks_shapes() {
        let config = config(1, 1);
        let good = FilterNetwork::new(&config).weights().clone();

        let mut kernels = good.clone();
        kernels.kernels = Array4::zeros((1, 1, 5, 5));
        assert!(FilterNetwork::from_weights(kernels, &config).is_err());

        let mut bias = good.clone();
        bias.bias = Array1::zeros(2);
        assert!(FilterNetwork::from_weights(bias, &config).is_err());

        let mut scale = good.clone();
        scale.scale = Some(Array1::zeros(1));
        assert!(FilterNetwork::from_weights(scale, &config).is_err());

        assert!(FilterNetwork::from_weights(good, &config).is_ok());
    }

    // Tests inputs with the wrong channel count are rejected
    // Verified by convolving only the channels present
    #[test]
    fn test_forward_rejects_channel_mismatch() {
        let network = FilterNetwork::new(&config(2, 2));
        assert!(network.forward(ramp((1, 1, 4, 4)).view()).is_err());
    }

    // Tests analytic kernel and bias gradients against central differences
    // Verified by transposing the kernel offsets in the backward pass
    #[test]
    fn test_backward_matches_finite_differences() {
        let config = config(2, 1).with_train_loss(LossKind::Mse);
        let input = ramp((2, 2, 5, 4));
        let target = ramp((2, 1, 5, 4)).mapv(|v| 1.0 - v);
        let network = FilterNetwork::new(&config);

        let prediction = network.forward(input.view()).unwrap();
        let (_, gradient) = loss_and_gradient(LossKind::Mse, &prediction, target.view()).unwrap();
        let grads = network.backward(input.view(), &gradient).unwrap();

        let loss_with = |weights: NetworkWeights| -> f64 {
            let perturbed = FilterNetwork::from_weights(weights, &config).unwrap();
            let prediction = perturbed.forward(input.view()).unwrap();
            loss_values(LossKind::Mse, &prediction, target.view())
                .unwrap()
                .loss
        };

        let eps = 1e-2_f32;
        for index in [[0, 0, 0, 0], [0, 1, 1, 1], [0, 0, 2, 1], [0, 1, 0, 2]] {
            let mut plus = network.weights().clone();
            plus.kernels[index] += eps;
            let mut minus = network.weights().clone();
            minus.kernels[index] -= eps;

            let numeric = (loss_with(plus) - loss_with(minus)) / (2.0 * f64::from(eps));
            let analytic = f64::from(grads.kernels[index]);
            assert!(
                (numeric - analytic).abs() < 1e-3 + 1e-2 * analytic.abs(),
                "kernel {index:?}: numeric {numeric}, analytic {analytic}"
            );
        }

        let mut plus = network.weights().clone();
        plus.bias[0] += eps;
        let mut minus = network.weights().clone();
        minus.bias[0] -= eps;
        let numeric = (loss_with(plus) - loss_with(minus)) / (2.0 * f64::from(eps));
        assert!((numeric - f64::from(grads.bias[0])).abs() < 1e-3);
    }

    // Tests the backward pass rejects gradients of the wrong shape
    // Verified by slicing past the gradient bounds
    #[test]
    fn test_backward_rejects_gradient_shape() {
        let network = FilterNetwork::new(&config(1, 1));
        let input = ramp((1, 1, 4, 4));
        let prediction = network.forward(input.view()).unwrap();
        let target = Array4::zeros((1, 1, 4, 4));
        let (_, gradient) = loss_and_gradient(LossKind::Mae, &prediction, target.view()).unwrap();

        assert!(network.backward(ramp((2, 1, 4, 4)).view(), &gradient).is_err());
    }
}

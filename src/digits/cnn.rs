use rand::{rngs::StdRng, SeedableRng};

use crate::error::{Error, Result};
use crate::nn::{Activation, Conv2d, Dense, Flatten, Layer, MaxPool2d, Sequential};

use super::mnist::IMAGE_SIDE;

pub const INPUT_SHAPE: [usize; 3] = [IMAGE_SIDE, IMAGE_SIDE, 1];
pub const NUM_CLASSES: usize = 10;

const KERNEL: (usize, usize) = (3, 3);
const POOL: (usize, usize) = (2, 2);
// 28 -> 26 -> 13 -> 11 -> 5 -> 3, times 64 filters
const FLATTENED: usize = 3 * 3 * 64;

/// Three 3x3 ReLU convolutions (32, 64, 64 filters) with 2x2 max pooling
/// after the first two, then Dense(64, ReLU) and Dense(10, softmax).
pub fn build(seed: u64) -> Result<Sequential> {
    let mut rng = StdRng::seed_from_u64(seed);

    let layers: Vec<Box<dyn Layer>> = vec![
        Box::new(Conv2d::new(1, 32, KERNEL, Activation::Relu, &mut rng)),
        Box::new(MaxPool2d::new(POOL)),
        Box::new(Conv2d::new(32, 64, KERNEL, Activation::Relu, &mut rng)),
        Box::new(MaxPool2d::new(POOL)),
        Box::new(Conv2d::new(64, 64, KERNEL, Activation::Relu, &mut rng)),
        Box::new(Flatten::new()),
        Box::new(Dense::new(FLATTENED, 64, Activation::Relu, &mut rng)),
        Box::new(Dense::new(64, NUM_CLASSES, Activation::Softmax, &mut rng)),
    ];

    let model = Sequential::new(&INPUT_SHAPE, layers)?;
    if model.output_width() != NUM_CLASSES {
        return Err(Error::Shape(format!(
            "digit model outputs {} classes, expected {NUM_CLASSES}",
            model.output_width()
        )));
    }

    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digits::preprocess::{add_channel_axis, normalize, to_categorical};
    use crate::nn::argmax;
    use ndarray::Array3;
    use rand::Rng;

    #[test]
    fn architecture_matches_reference_layer_shapes() {
        let model = build(42).unwrap();
        let summary = model.summary();

        let shapes: Vec<_> = summary
            .layers
            .iter()
            .map(|layer| layer.output_shape.clone())
            .collect();
        assert_eq!(
            shapes,
            vec![
                vec![26, 26, 32],
                vec![13, 13, 32],
                vec![11, 11, 64],
                vec![5, 5, 64],
                vec![3, 3, 64],
                vec![576],
                vec![64],
                vec![10],
            ]
        );

        let params: Vec<_> = summary.layers.iter().map(|layer| layer.params).collect();
        assert_eq!(params, vec![320, 0, 18_496, 0, 36_928, 0, 36_928, 650]);
        assert_eq!(summary.total_params(), 93_322);
    }

    #[test]
    fn seeded_model_on_stub_digits_gives_valid_accuracy_and_classes() {
        let mut rng = StdRng::seed_from_u64(7);
        let samples = 12;
        let raw = Array3::from_shape_simple_fn((samples, 28, 28), || rng.gen::<u8>());
        let labels: Vec<u8> = (0..samples).map(|i| (i % 10) as u8).collect();

        let images = add_channel_axis(normalize(&raw));
        let targets = to_categorical(&labels, NUM_CLASSES).unwrap();

        let model = build(42).unwrap();
        let (loss, accuracy) = model.evaluate(&images, &targets).unwrap();
        assert!(loss.is_finite());
        assert!((0.0..=1.0).contains(&accuracy));

        let predictions = model.predict(&images).unwrap();
        assert_eq!(predictions.dim(), (samples, NUM_CLASSES));
        for row in predictions.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-4);
        }
        assert!(argmax(&predictions.view()).iter().all(|&class| class <= 9));

        let again = build(42).unwrap().predict(&images).unwrap();
        assert_eq!(predictions, again);
    }

    #[test]
    fn rejects_images_without_channel_axis() {
        let model = build(0).unwrap();
        let images = Array3::<f32>::zeros((2, 28, 28));
        assert!(model.predict(&images).is_err());
    }
}

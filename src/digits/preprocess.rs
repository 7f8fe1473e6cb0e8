use ndarray::{Array2, Array3, Array4, Axis};

use crate::error::{Error, Result};

/// Scales raw 0-255 pixels into `[0, 1]`.
pub fn normalize(images: &Array3<u8>) -> Array3<f32> {
    images.mapv(|pixel| f32::from(pixel) / 255.0)
}

/// `n x h x w` to `n x h x w x 1`.
pub fn add_channel_axis(images: Array3<f32>) -> Array4<f32> {
    images.insert_axis(Axis(3))
}

pub fn to_categorical(labels: &[u8], num_classes: usize) -> Result<Array2<f32>> {
    let mut encoded = Array2::zeros((labels.len(), num_classes));

    for (mut row, &label) in encoded.rows_mut().into_iter().zip(labels) {
        let class = usize::from(label);
        if class >= num_classes {
            return Err(Error::InvalidLabel(format!(
                "{label} is outside 0..{num_classes}"
            )));
        }
        row[class] = 1.0;
    }

    Ok(encoded)
}

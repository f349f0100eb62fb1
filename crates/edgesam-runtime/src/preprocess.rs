use anyhow::{ensure, Result};
use edgesam_core::{Shape, Tensor};

use crate::{ChannelOrder, Image};

/// Planar `1 x 3 x H x W` tensor with values scaled to `[0, 1]`, channels in `model_order`.
pub fn image_to_tensor(
    image: &Image,
    input_shape: &Shape,
    model_order: ChannelOrder,
) -> Result<Tensor> {
    let dims = input_shape.dims();
    ensure!(dims.len() == 4, "encoder input must have rank 4, got {input_shape}");
    let (channels, height, width) = (dims[1], dims[2], dims[3]);
    let size = image.size();
    ensure!(
        image.channels() == channels
            && size.height as usize == height
            && size.width as usize == width,
        "image {size} with {} channels does not fit encoder input {input_shape}",
        image.channels()
    );

    let strides = input_shape.strides();
    let reverse = image.order() != model_order;
    let mut values = vec![0f32; input_shape.numel()];
    for y in 0..height {
        for x in 0..width {
            let pixel = image.pixel(x as u32, y as u32);
            for c in 0..channels {
                let src = if reverse { channels - 1 - c } else { c };
                let dst = c * strides[1] + y * strides[2] + x * strides[3];
                values[dst] = f32::from(pixel[src]) / 255.0;
            }
        }
    }

    Tensor::from_f32(input_shape.clone(), &values)
}

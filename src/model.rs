//! Tensor side of the pipeline: image → request tensor, response → mask.
//!
//! Tensors are NHWC with a single channel, matching the U-Net the endpoint
//! serves: requests are `[1, H, W, 1]` raw intensities, responses are
//! `[1, H, W, 1]` probabilities.

use std::collections::BTreeMap;

use image::{imageops, imageops::FilterType, GrayImage, ImageResult};
use ndarray::prelude::*;
use nshare::AsNdarray2;
use serde::Deserialize;
use thiserror::Error;

type Nested4<T> = Vec<Vec<Vec<Vec<T>>>>;

#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("response is not valid prediction JSON")]
    Json(#[from] serde_json::Error),

    #[error("prediction array is ragged at depth {depth}")]
    Ragged { depth: usize },

    #[error("prediction shape {actual:?} does not match expected {expected:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        actual: Vec<usize>,
    },
}

#[derive(Deserialize)]
struct PredictionResponse {
    predictions: Nested4<f32>,
}

/// Decodes any supported raster and resizes it (no cropping, no aspect
/// preservation) to `image_size × image_size` single-channel luma.
pub fn decode_and_resize(
    bytes: &[u8],
    image_size: u32,
    filter: FilterType,
) -> ImageResult<GrayImage> {
    let image = image::load_from_memory(bytes)?.into_luma8();
    Ok(imageops::resize(&image, image_size, image_size, filter))
}

/// `H×W` luma → `[1, H, W, 1]`.
///
/// Intensities stay in 0..=255 unless `normalize` is set.
pub fn to_input_tensor(image: &GrayImage, normalize: bool) -> Array4<f32> {
    let scale = if normalize { 255.0 } else { 1.0 };
    image
        .as_ndarray2()
        .mapv(|v| f32::from(v) / scale)
        .insert_axis(Axis(2))
        .insert_axis(Axis(0))
}

/// `{ "<input_key>": [[[[v]]]] }` as JSON bytes.
pub fn encode_request(
    tensor: ArrayView4<f32>,
    input_key: &str,
) -> serde_json::Result<Vec<u8>> {
    let nested: Nested4<f32> = tensor
        .outer_iter()
        .map(|batch| {
            batch
                .outer_iter()
                .map(|row| row.outer_iter().map(|px| px.to_vec()).collect())
                .collect()
        })
        .collect();

    serde_json::to_vec(&BTreeMap::from([(input_key, nested)]))
}

/// Parses `{ "predictions": [[[[p]]]] }` and checks it is exactly `expected`.
pub fn decode_response(
    body: &[u8],
    expected: [usize; 4],
) -> Result<Array4<f32>, ResponseError> {
    let response: PredictionResponse = serde_json::from_slice(body)?;
    let (shape, values) = flatten(response.predictions)?;

    if shape != expected {
        return Err(ResponseError::ShapeMismatch {
            expected,
            actual: shape.to_vec(),
        });
    }

    Array4::from_shape_vec(shape, values).map_err(|_| ResponseError::ShapeMismatch {
        expected,
        actual: shape.to_vec(),
    })
}

fn flatten(nested: Nested4<f32>) -> Result<([usize; 4], Vec<f32>), ResponseError> {
    let n = nested.len();
    let h = nested.first().map_or(0, Vec::len);
    let w = nested.first().and_then(|b| b.first()).map_or(0, Vec::len);
    let c = nested
        .first()
        .and_then(|b| b.first())
        .and_then(|r| r.first())
        .map_or(0, Vec::len);

    let mut values = Vec::with_capacity(n * h * w * c);
    for batch in nested {
        if batch.len() != h {
            return Err(ResponseError::Ragged { depth: 1 });
        }
        for row in batch {
            if row.len() != w {
                return Err(ResponseError::Ragged { depth: 2 });
            }
            for px in row {
                if px.len() != c {
                    return Err(ResponseError::Ragged { depth: 3 });
                }
                values.extend(px);
            }
        }
    }

    Ok(([n, h, w, c], values))
}

/// Element-wise `p >= threshold`, as 0/1 bytes.
pub fn threshold(predictions: ArrayView4<f32>, threshold: f32) -> Array4<u8> {
    predictions.mapv(|p| u8::from(p >= threshold))
}

/// First batch element, only channel.
pub fn select_mask(binary: ArrayView4<u8>) -> Array2<u8> {
    binary.slice(s![0, .., .., 0]).to_owned()
}

//! Shared image-batch normalization.
//!
//! Incoming image tensors may be single images or batches, channel-first or
//! channel-last. Normalization inserts the missing batch dimension, moves
//! channels to the front, and validates the channel count against the
//! configured `n_image_channels`. When a batch is ambiguous (both axes match
//! the channel count) the layout is resolved once and memoized for the rest
//! of the run.

use ndarray::{Array4, ArrayD, Axis, Ix4};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::error::{AnalysisError, Result};

/// Position of the channel axis in a 4-d batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    First,
    Last,
}

pub struct ImageNormalizer {
    n_channels: usize,
    order: OnceCell<ChannelOrder>,
}

impl ImageNormalizer {
    pub fn new(n_channels: usize) -> Self {
        ImageNormalizer {
            n_channels,
            order: OnceCell::new(),
        }
    }

    /// Normalize an arbitrary image tensor into `(N, C, H, W)`.
    pub fn normalize(&self, tensor: ArrayD<f32>) -> Result<Array4<f32>> {
        let shape = tensor.shape().to_vec();
        let n = self.n_channels;

        let four_d: ArrayD<f32> = match shape.len() {
            2 => {
                if n != 1 {
                    return Err(AnalysisError::Shape(format!(
                        "2-d image {:?} cannot carry {} channels",
                        shape, n
                    )));
                }
                tensor.insert_axis(Axis(0)).insert_axis(Axis(0))
            }
            3 => {
                if shape[0] == n {
                    // single image, channel-first
                    tensor.insert_axis(Axis(0))
                } else if shape[2] == n {
                    // single image, channel-last
                    to_channel_first(tensor.insert_axis(Axis(0)))
                } else if n == 1 {
                    // batch of single-channel images
                    tensor.insert_axis(Axis(1))
                } else {
                    return Err(AnalysisError::Shape(format!(
                        "cannot reconcile 3-d image {:?} with {} channels",
                        shape, n
                    )));
                }
            }
            4 => {
                let first = shape[1] == n;
                let last = shape[3] == n;
                let order = match (first, last) {
                    (true, false) => ChannelOrder::First,
                    (false, true) => ChannelOrder::Last,
                    (true, true) => {
                        // Ambiguous: resolve once, reuse for the whole run.
                        *self.order.get_or_init(|| {
                            debug!(
                                "ambiguous channel axis for image batch {:?}; assuming channel-first",
                                shape
                            );
                            ChannelOrder::First
                        })
                    }
                    (false, false) => {
                        return Err(AnalysisError::Shape(format!(
                            "cannot reconcile image batch {:?} with {} channels",
                            shape, n
                        )));
                    }
                };
                let _ = self.order.set(order);
                match order {
                    ChannelOrder::First => tensor,
                    ChannelOrder::Last => to_channel_first(tensor),
                }
            }
            _ => {
                return Err(AnalysisError::Shape(format!(
                    "unsupported image tensor rank {} ({:?})",
                    shape.len(),
                    shape
                )));
            }
        };

        four_d
            .into_dimensionality::<Ix4>()
            .map_err(|e| AnalysisError::Shape(format!("image batch not 4-d after normalization: {e}")))
    }
}

/// `(N, H, W, C)` → `(N, C, H, W)`, materialized in standard layout.
fn to_channel_first(tensor: ArrayD<f32>) -> ArrayD<f32> {
    tensor
        .permuted_axes(vec![0, 3, 1, 2])
        .as_standard_layout()
        .to_owned()
}

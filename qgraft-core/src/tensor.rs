// Copyright 2025 Gibran Rodriguez <brangi000@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Dense tensors and the forward kernels of the convertible layers
//!
//! Only what graph surgery needs lives here:
//!
//! - Row-major `f32` storage with an explicit shape and device tag
//! - Rank edits used when quantizer parameters are broadcast (`unsqueeze`)
//! - `linear` and `conv2d` kernels, so converted layers can be checked
//!   against the originals they replace

use crate::error::{QgraftError, Result};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shape representation for tensors
pub type Shape = Vec<usize>;

/// Compute device a tensor is placed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

impl FromStr for Device {
    type Err = QgraftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(Device::Cuda)
                .ok_or_else(|| QgraftError::Configuration(format!("unknown device '{}'", s))),
        }
    }
}

/// Multi-dimensional `f32` tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    /// Tensor shape (dimensions)
    pub shape: Shape,
    /// Row-major values
    pub data: Vec<f32>,
    /// Placement
    #[serde(default)]
    pub device: Device,
}

impl Tensor {
    /// Create a tensor, checking that the data fills the shape
    pub fn new(shape: Shape, data: Vec<f32>) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(QgraftError::TensorError {
                message: format!(
                    "shape {:?} needs {} elements, got {}",
                    shape,
                    numel,
                    data.len()
                ),
            });
        }

        Ok(Self {
            shape,
            data,
            device: Device::Cpu,
        })
    }

    /// Tensor filled with a single value
    pub fn full(shape: Shape, value: f32) -> Self {
        let numel = shape.iter().product();
        Self {
            shape,
            data: vec![value; numel],
            device: Device::Cpu,
        }
    }

    pub fn zeros(shape: Shape) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn ones(shape: Shape) -> Self {
        Self::full(shape, 1.0)
    }

    /// Zeros with the shape and device of `other`
    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros(other.shape.clone()).on(other.device)
    }

    /// Ones with the shape and device of `other`
    pub fn ones_like(other: &Tensor) -> Self {
        Self::ones(other.shape.clone()).on(other.device)
    }

    /// Uniform samples in `[-bound, bound)`, the default init of the layers
    pub fn uniform(shape: Shape, bound: f32) -> Self {
        let numel: usize = shape.iter().product();
        let mut rng = rand::thread_rng();
        let data = (0..numel)
            .map(|_| {
                if bound > 0.0 {
                    rng.gen_range(-bound..bound)
                } else {
                    0.0
                }
            })
            .collect();
        Self {
            shape,
            data,
            device: Device::Cpu,
        }
    }

    /// Get the total number of elements in the tensor
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Get the number of dimensions
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Move to `device`, returning the tensor
    pub fn on(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Move to `device` in place
    pub fn to_device(&mut self, device: Device) {
        self.device = device;
    }

    /// Overwrite values (and placement) with those of `src`; shapes must match
    pub fn copy_from(&mut self, src: &Tensor) -> Result<()> {
        if self.shape != src.shape {
            return Err(QgraftError::TensorError {
                message: format!("cannot copy {:?} into {:?}", src.shape, self.shape),
            });
        }
        self.data.copy_from_slice(&src.data);
        self.device = src.device;
        Ok(())
    }

    /// Insert a singleton dimension at `dim` (in place)
    pub fn unsqueeze(&mut self, dim: usize) -> Result<()> {
        if dim > self.rank() {
            return Err(QgraftError::TensorError {
                message: format!(
                    "cannot unsqueeze dim {} of a rank-{} tensor",
                    dim,
                    self.rank()
                ),
            });
        }
        self.shape.insert(dim, 1);
        Ok(())
    }
}

/// Forward kernels for the convertible layers
pub struct TensorOps;

impl TensorOps {
    /// Affine transform over the last axis: `y = x W^T + b`
    /// input: [..., in], weight: [out, in], bias: [out]
    pub fn linear(input: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
        if weight.rank() != 2 {
            return Err(QgraftError::TensorError {
                message: "Linear weight must be 2D".to_string(),
            });
        }
        let out_features = weight.shape[0];
        let in_features = weight.shape[1];
        if out_features == 0 || in_features == 0 {
            return Err(QgraftError::TensorError {
                message: format!("Linear weight {:?} has a zero-width dimension", weight.shape),
            });
        }

        if input.shape.last().copied() != Some(in_features) {
            return Err(QgraftError::TensorError {
                message: format!(
                    "Linear input {:?} does not end in {} features",
                    input.shape, in_features
                ),
            });
        }
        if let Some(b) = bias {
            if b.numel() != out_features {
                return Err(QgraftError::TensorError {
                    message: format!("Linear bias has {} values, expected {}", b.numel(), out_features),
                });
            }
        }

        let rows = input.numel() / in_features;
        let x = input.as_slice();
        let w = weight.as_slice();
        let mut out = vec![0.0; rows * out_features];

        out.par_chunks_mut(out_features)
            .enumerate()
            .for_each(|(row, out_row)| {
                let x_row = &x[row * in_features..(row + 1) * in_features];
                for (o, slot) in out_row.iter_mut().enumerate() {
                    let w_row = &w[o * in_features..(o + 1) * in_features];
                    let mut sum = 0.0;
                    for (a, b) in x_row.iter().zip(w_row) {
                        sum += a * b;
                    }
                    if let Some(b) = bias {
                        sum += b.data[o];
                    }
                    *slot = sum;
                }
            });

        let mut shape = input.shape.clone();
        if let Some(last) = shape.last_mut() {
            *last = out_features;
        }
        Ok(Tensor {
            shape,
            data: out,
            device: input.device,
        })
    }

    /// 2D Convolution with stride, padding, dilation and groups
    /// input: [N, C_in, H_in, W_in]
    /// weight: [C_out, C_in / groups, K_h, K_w]
    /// bias: [C_out] (optional)
    /// output: [N, C_out, H_out, W_out]
    #[allow(clippy::too_many_arguments)]
    pub fn conv2d(
        input: &Tensor,
        weight: &Tensor,
        bias: Option<&Tensor>,
        stride: (usize, usize),
        padding: (usize, usize),
        dilation: (usize, usize),
        groups: usize,
    ) -> Result<Tensor> {
        if input.rank() != 4 || weight.rank() != 4 {
            return Err(QgraftError::TensorError {
                message: "Conv2d requires 4D input and weight tensors".to_string(),
            });
        }
        if weight.shape.contains(&0) {
            return Err(QgraftError::TensorError {
                message: format!("Conv2d weight {:?} has a zero-width dimension", weight.shape),
            });
        }
        if groups == 0 || stride.0 == 0 || stride.1 == 0 {
            return Err(QgraftError::TensorError {
                message: "Conv2d stride and groups must be non-zero".to_string(),
            });
        }

        let (n, c_in, h_in, w_in) = (input.shape[0], input.shape[1], input.shape[2], input.shape[3]);
        let (c_out, c_in_group, k_h, k_w) =
            (weight.shape[0], weight.shape[1], weight.shape[2], weight.shape[3]);

        if c_in % groups != 0 || c_out % groups != 0 || c_in / groups != c_in_group {
            return Err(QgraftError::TensorError {
                message: format!(
                    "Conv2d channel mismatch: input {} channels, weight {:?}, groups {}",
                    c_in, weight.shape, groups
                ),
            });
        }

        let span_h = dilation.0 * (k_h - 1) + 1;
        let span_w = dilation.1 * (k_w - 1) + 1;
        if h_in + 2 * padding.0 < span_h || w_in + 2 * padding.1 < span_w {
            return Err(QgraftError::TensorError {
                message: "Conv2d kernel larger than padded input".to_string(),
            });
        }

        let h_out = (h_in + 2 * padding.0 - span_h) / stride.0 + 1;
        let w_out = (w_in + 2 * padding.1 - span_w) / stride.1 + 1;
        let c_out_group = c_out / groups;

        let x = input.as_slice();
        let w = weight.as_slice();
        let mut output = vec![0.0; n * c_out * h_out * w_out];

        // Parallel over (batch, output channel) planes
        output
            .par_chunks_mut(h_out * w_out)
            .enumerate()
            .for_each(|(flat_idx, plane)| {
                let batch = flat_idx / c_out;
                let out_channel = flat_idx % c_out;
                let group = out_channel / c_out_group;

                for oh in 0..h_out {
                    for ow in 0..w_out {
                        let mut sum = 0.0;

                        for ic in 0..c_in_group {
                            let in_channel = group * c_in_group + ic;
                            for kh in 0..k_h {
                                let h_pad = oh * stride.0 + kh * dilation.0;
                                if h_pad < padding.0 || h_pad - padding.0 >= h_in {
                                    continue;
                                }
                                let ih = h_pad - padding.0;

                                for kw in 0..k_w {
                                    let w_pad = ow * stride.1 + kw * dilation.1;
                                    if w_pad < padding.1 || w_pad - padding.1 >= w_in {
                                        continue;
                                    }
                                    let iw = w_pad - padding.1;

                                    let input_idx = ((batch * c_in + in_channel) * h_in + ih) * w_in + iw;
                                    let weight_idx = ((out_channel * c_in_group + ic) * k_h + kh) * k_w + kw;
                                    sum += x[input_idx] * w[weight_idx];
                                }
                            }
                        }

                        if let Some(b) = bias {
                            sum += b.data[out_channel];
                        }
                        plane[oh * w_out + ow] = sum;
                    }
                }
            });

        Ok(Tensor {
            shape: vec![n, c_out, h_out, w_out],
            data: output,
            device: input.device,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_creation() {
        let tensor = Tensor::zeros(vec![2, 3, 4]);
        assert_eq!(tensor.shape, vec![2, 3, 4]);
        assert_eq!(tensor.numel(), 24);
        assert_eq!(tensor.rank(), 3);

        assert!(Tensor::new(vec![2, 2], vec![1.0; 3]).is_err());
    }

    #[test]
    fn test_unsqueeze_trailing() {
        let mut scale = Tensor::ones(vec![64, 1]);
        scale.unsqueeze(2).unwrap();
        scale.unsqueeze(3).unwrap();
        assert_eq!(scale.shape, vec![64, 1, 1, 1]);

        assert!(Tensor::ones(vec![4]).unsqueeze(2).is_err());
    }

    #[test]
    fn test_like_constructors_keep_device() {
        let base = Tensor::uniform(vec![3, 5], 0.5).on(Device::Cuda(1));
        let ones = Tensor::ones_like(&base);
        assert_eq!(ones.shape, vec![3, 5]);
        assert_eq!(ones.device, Device::Cuda(1));
        assert!(Tensor::zeros_like(&base).data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_copy_from() {
        let src = Tensor::uniform(vec![4, 2], 1.0).on(Device::Cuda(0));
        let mut dst = Tensor::zeros(vec![4, 2]);
        dst.copy_from(&src).unwrap();
        assert_eq!(dst, src);

        let mut wrong = Tensor::zeros(vec![2, 4]);
        assert!(wrong.copy_from(&src).is_err());
    }

    #[test]
    fn test_device_parse() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("cuda".parse::<Device>().unwrap(), Device::Cuda(0));
        assert_eq!("cuda:2".parse::<Device>().unwrap(), Device::Cuda(2));
        assert!("tpu".parse::<Device>().is_err());
        assert_eq!(Device::Cuda(3).to_string(), "cuda:3");
    }

    #[test]
    fn test_linear() {
        let x = Tensor::new(vec![1, 3], vec![1.0, 2.0, 3.0]).unwrap();
        let w = Tensor::new(vec![2, 3], vec![1.0, 0.0, 0.0, 0.0, 1.0, 1.0]).unwrap();
        let b = Tensor::new(vec![2], vec![0.5, -1.0]).unwrap();

        let y = TensorOps::linear(&x, &w, Some(&b)).unwrap();
        assert_eq!(y.shape, vec![1, 2]);
        assert_eq!(y.data, vec![1.5, 4.0]);
    }

    #[test]
    fn test_linear_token_batch() {
        let x = Tensor::ones(vec![2, 4, 3]);
        let w = Tensor::ones(vec![5, 3]);
        let y = TensorOps::linear(&x, &w, None).unwrap();
        assert_eq!(y.shape, vec![2, 4, 5]);
        assert!(y.data.iter().all(|&v| v == 3.0));
    }

    #[test]
    fn test_zero_width_layers_rejected() {
        let no_outputs = Tensor::zeros(vec![0, 3]);
        assert!(TensorOps::linear(&Tensor::ones(vec![2, 3]), &no_outputs, None).is_err());

        let no_inputs = Tensor::zeros(vec![4, 0]);
        assert!(TensorOps::linear(&Tensor::zeros(vec![2, 0]), &no_inputs, None).is_err());

        let empty_kernel = Tensor::zeros(vec![2, 1, 0, 3]);
        let input = Tensor::ones(vec![1, 1, 4, 4]);
        assert!(TensorOps::conv2d(&input, &empty_kernel, None, (1, 1), (0, 0), (1, 1), 1).is_err());
    }

    #[test]
    fn test_conv2d() {
        let input = Tensor::new(
            vec![1, 1, 3, 3],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        )
        .unwrap();
        let weight = Tensor::new(vec![1, 1, 2, 2], vec![1.0, 0.0, 0.0, 1.0]).unwrap();

        let result = TensorOps::conv2d(&input, &weight, None, (1, 1), (0, 0), (1, 1), 1).unwrap();
        assert_eq!(result.shape, vec![1, 1, 2, 2]);
        assert_eq!(result.data, vec![6.0, 8.0, 12.0, 14.0]);
    }

    #[test]
    fn test_conv2d_padding_dilation_groups() {
        let input = Tensor::ones(vec![1, 4, 5, 5]);
        let weight = Tensor::ones(vec![4, 2, 3, 3]);

        let result =
            TensorOps::conv2d(&input, &weight, None, (1, 1), (2, 2), (2, 2), 2).unwrap();
        assert_eq!(result.shape, vec![1, 4, 5, 5]);
        // Centre pixel sees the full dilated kernel over 2 channels
        assert_eq!(result.data[12], 18.0);

        let bad = Tensor::ones(vec![4, 3, 3, 3]);
        assert!(TensorOps::conv2d(&input, &bad, None, (1, 1), (0, 0), (1, 1), 2).is_err());
    }
}

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

//! Range observers embedded in every quantizer

use crate::tensor::{Device, Shape, Tensor};
use serde::{Deserialize, Serialize};

/// How an observer reduces a tensor into a range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reduction {
    /// One range for the whole tensor
    PerTensor,
    /// One range per output channel of a weight (axis 0)
    PerChannelWeight,
    /// One range per input channel of an activation
    PerChannelActivation,
    /// One range per sequence position
    PerToken,
}

impl Reduction {
    /// Per-channel reductions are the ones broadcast across conv spatial dims
    pub fn is_channel_wise(&self) -> bool {
        matches!(self, Reduction::PerChannelWeight | Reduction::PerChannelActivation)
    }

    /// Parameter shape for `num_channels`, laid out to broadcast against a
    /// 2D linear weight `[out, in]` or activation `[tokens, in]`.
    pub fn base_shape(&self, num_channels: usize) -> Shape {
        match self {
            Reduction::PerTensor => vec![1],
            Reduction::PerChannelWeight => vec![num_channels, 1],
            Reduction::PerChannelActivation => vec![1, num_channels],
            Reduction::PerToken => vec![num_channels],
        }
    }
}

/// Stores the lower/upper bound a quantizer derives its scale from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    pub reduction: Reduction,
    pub num_channels: usize,
    pub lb: Tensor,
    pub ub: Tensor,
}

impl Observer {
    pub fn new(reduction: Reduction) -> Self {
        let mut observer = Self {
            reduction,
            num_channels: 1,
            lb: Tensor::zeros(vec![1]),
            ub: Tensor::zeros(vec![1]),
        };
        observer.register_range();
        observer
    }

    /// Reallocate `lb`/`ub` for the current channel count.
    ///
    /// Must be called after `num_channels` changes; previous bounds are lost.
    pub fn register_range(&mut self) {
        let shape = self.reduction.base_shape(self.num_channels);
        let device = self.lb.device;
        self.lb = Tensor::zeros(shape.clone()).on(device);
        self.ub = Tensor::zeros(shape).on(device);
    }

    pub fn to_device(&mut self, device: Device) {
        self.lb.to_device(device);
        self.ub.to_device(device);
    }
}

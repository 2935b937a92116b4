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

//! Quantizer state: precision, scale/zero-point and the embedded observer

use super::observer::{Observer, Reduction};
use super::reference::ReferenceParams;
use crate::error::{QgraftError, Result};
use crate::tensor::{Device, Tensor};
use serde::{Deserialize, Serialize};

/// Bit widths a quantizer can be built with
pub const SUPPORTED_BITS: std::ops::RangeInclusive<u8> = 2..=16;

/// Fail unless `nbit` is in [`SUPPORTED_BITS`]
pub(crate) fn check_nbit(name: &str, nbit: u8) -> Result<()> {
    if SUPPORTED_BITS.contains(&nbit) {
        return Ok(());
    }
    Err(QgraftError::Configuration(format!(
        "{} must be between {} and {}, got {}",
        name,
        SUPPORTED_BITS.start(),
        SUPPORTED_BITS.end(),
        nbit
    )))
}

/// Whether scale/zero-point have been broadcast for a conv layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamLayout {
    /// Shape from [`Reduction::base_shape`]
    Base,
    /// Two trailing singleton dims appended (rank 4)
    ConvBroadcast,
}

/// A weight or activation quantizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantizer {
    /// Registry identifier this quantizer was built from
    pub kind: String,
    pub nbit: u8,
    pub train_flag: bool,
    pub unsigned: bool,
    pub num_channels: usize,
    pub scale: Tensor,
    pub zero_point: Tensor,
    pub observer: Observer,
    /// Scale is a trained parameter (LSQ family)
    pub learnable_scale: bool,
    /// Passes values through unchanged
    pub passthrough: bool,
    /// Soft-rounding variable, shaped like the weight (AdaRound)
    pub soft_rounding: Option<Tensor>,
    pub device: Device,
    layout: ParamLayout,
}

impl Quantizer {
    pub fn new(kind: &str, reduction: Reduction, nbit: u8, train_flag: bool, unsigned: bool) -> Self {
        let mut quantizer = Self {
            kind: kind.to_string(),
            nbit,
            train_flag,
            unsigned,
            num_channels: 1,
            scale: Tensor::ones(vec![1]),
            zero_point: Tensor::zeros(vec![1]),
            observer: Observer::new(reduction),
            learnable_scale: false,
            passthrough: false,
            soft_rounding: None,
            device: Device::Cpu,
            layout: ParamLayout::Base,
        };
        quantizer.register_qparams();
        quantizer
    }

    pub fn reduction(&self) -> Reduction {
        self.observer.reduction
    }

    pub fn layout(&self) -> ParamLayout {
        self.layout
    }

    /// Reallocate scale (ones) and zero-point (zeros) for `num_channels`.
    pub fn register_qparams(&mut self) {
        let shape = self.reduction().base_shape(self.num_channels);
        self.scale = Tensor::ones(shape.clone()).on(self.device);
        self.zero_point = Tensor::zeros(shape).on(self.device);
        self.layout = ParamLayout::Base;
    }

    /// Set the channel count on the quantizer and its observer, then
    /// re-register both parameter sets.
    pub fn rechannel(&mut self, num_channels: usize) {
        self.num_channels = num_channels;
        self.register_qparams();

        self.observer.num_channels = num_channels;
        self.observer.register_range();
    }

    /// Append two trailing singleton dims to channel-wise scale/zero-point so
    /// they broadcast over conv spatial dims. No-op for other reductions.
    pub fn expand_for_conv(&mut self, path: &str) -> Result<()> {
        if !self.reduction().is_channel_wise() {
            return Ok(());
        }
        if self.layout == ParamLayout::ConvBroadcast {
            return Err(QgraftError::ReshapeGuardViolation {
                path: path.to_string(),
            });
        }

        for tensor in [&mut self.scale, &mut self.zero_point] {
            tensor.unsqueeze(2)?;
            tensor.unsqueeze(3)?;
        }
        self.layout = ParamLayout::ConvBroadcast;
        Ok(())
    }

    /// Take parameter shapes from `{path}.scale`, `{path}.zero_point`,
    /// `{path}.observer.lb` and `{path}.observer.ub`, resetting the values to
    /// scale = 1, zero-point = 0, bounds = 0.
    pub fn init_from_reference(&mut self, reference: &ReferenceParams, path: &str) -> Result<()> {
        let scale = reference.get(&format!("{}.scale", path))?;
        let zero_point = reference.get(&format!("{}.zero_point", path))?;
        let lb = reference.get(&format!("{}.observer.lb", path))?;
        let ub = reference.get(&format!("{}.observer.ub", path))?;

        let channels = channels_of(scale);

        self.scale = Tensor::ones_like(scale).on(self.device);
        self.zero_point = Tensor::zeros_like(zero_point).on(self.device);
        self.observer.lb = Tensor::zeros_like(lb).on(self.device);
        self.observer.ub = Tensor::zeros_like(ub).on(self.device);

        self.num_channels = channels;
        self.observer.num_channels = channels;
        self.layout = if scale.rank() == 4 {
            ParamLayout::ConvBroadcast
        } else {
            ParamLayout::Base
        };
        Ok(())
    }

    /// Move every tensor this quantizer owns to `device`
    pub fn to_device(&mut self, device: Device) {
        self.device = device;
        self.scale.to_device(device);
        self.zero_point.to_device(device);
        self.observer.to_device(device);
        if let Some(alpha) = self.soft_rounding.as_mut() {
            alpha.to_device(device);
        }
    }

    /// Integer range `[qmin, qmax]` for the bit width and signedness
    pub fn qrange(&self) -> (f32, f32) {
        let nbit = i32::from(self.nbit);
        if self.unsigned {
            (0.0, ((1i64 << nbit) - 1) as f32)
        } else {
            (-((1i64 << (nbit - 1)) as f32), ((1i64 << (nbit - 1)) - 1) as f32)
        }
    }

    /// Axis of an input of rank `rank` that the parameters index
    fn channel_axis(&self, rank: usize) -> usize {
        match self.reduction() {
            Reduction::PerTensor | Reduction::PerChannelWeight => 0,
            Reduction::PerChannelActivation if rank == 4 => 1,
            Reduction::PerChannelActivation => rank.saturating_sub(1),
            Reduction::PerToken => rank.saturating_sub(2),
        }
    }

    /// Quantize-dequantize `input` with the current scale and zero-point
    pub fn fake_quantize(&self, input: &Tensor) -> Result<Tensor> {
        if self.passthrough {
            return Ok(input.clone());
        }

        let groups = self.scale.numel();
        let (qmin, qmax) = self.qrange();

        let (axis_len, inner) = if groups == 1 {
            (1, input.numel().max(1))
        } else {
            let axis = self.channel_axis(input.rank());
            let axis_len = input.shape.get(axis).copied().unwrap_or(0);
            if axis_len != groups {
                return Err(QgraftError::TensorError {
                    message: format!(
                        "{} quantizer has {} channels, input {:?} has {} along axis {}",
                        self.kind, groups, input.shape, axis_len, axis
                    ),
                });
            }
            (axis_len, input.shape[axis + 1..].iter().product::<usize>().max(1))
        };

        let data = input
            .data
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let channel = (i / inner) % axis_len;
                let scale = self.scale.data[channel];
                let zero_point = self.zero_point.data[channel];
                let q = ((x / scale).round() + zero_point).clamp(qmin, qmax);
                (q - zero_point) * scale
            })
            .collect();

        Ok(Tensor {
            shape: input.shape.clone(),
            data,
            device: input.device,
        })
    }
}

/// Channel count encoded in a parameter shape: `[C, ..]` or `[1, C, ..]`
fn channels_of(param: &Tensor) -> usize {
    match param.shape.as_slice() {
        [1, c, ..] => *c,
        [c, ..] => *c,
        [] => 1,
    }
}

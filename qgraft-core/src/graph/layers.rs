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

//! Convolution and affine layers, plain and quantized

use crate::error::{QgraftError, Result};
use crate::quant::Quantizer;
use crate::tensor::{Device, Tensor, TensorOps};

/// Shape and forward contract shared by the convertible layers
pub trait LayerShape {
    /// Input channels (conv) or input features (linear)
    fn in_channels(&self) -> usize;
    /// Output channels (conv) or output features (linear)
    fn out_channels(&self) -> usize;
    fn weight(&self) -> &Tensor;
    fn bias(&self) -> Option<&Tensor>;
    /// Conv layers get rank-4 broadcasting for channel-wise quantizers
    fn is_conv(&self) -> bool;

    /// Forward pass with `weight` standing in for the stored weight
    fn forward_with(&self, input: &Tensor, weight: &Tensor) -> Result<Tensor>;

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.forward_with(input, self.weight())
    }

    fn device(&self) -> Device {
        self.weight().device
    }
}

/// Hyperparameters of a 2D convolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: (usize, usize),
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub dilation: (usize, usize),
    pub groups: usize,
    pub bias: bool,
}

impl Conv2dConfig {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: (usize, usize)) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride: (1, 1),
            padding: (0, 0),
            dilation: (1, 1),
            groups: 1,
            bias: true,
        }
    }

    pub fn stride(mut self, stride: (usize, usize)) -> Self {
        self.stride = stride;
        self
    }

    pub fn padding(mut self, padding: (usize, usize)) -> Self {
        self.padding = padding;
        self
    }

    pub fn dilation(mut self, dilation: (usize, usize)) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Allocate a convolution with uniform `1/sqrt(fan_in)` initialisation
    pub fn build(self) -> Result<Conv2d> {
        if self.groups == 0
            || self.in_channels % self.groups != 0
            || self.out_channels % self.groups != 0
        {
            return Err(QgraftError::Configuration(format!(
                "groups {} must divide in_channels {} and out_channels {}",
                self.groups, self.in_channels, self.out_channels
            )));
        }

        let (k_h, k_w) = self.kernel_size;
        let fan_in = (self.in_channels / self.groups) * k_h * k_w;
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();

        Ok(Conv2d {
            weight: Tensor::uniform(
                vec![self.out_channels, self.in_channels / self.groups, k_h, k_w],
                bound,
            ),
            bias: self
                .bias
                .then(|| Tensor::uniform(vec![self.out_channels], bound)),
            config: self,
        })
    }
}

/// 2D convolution layer
#[derive(Debug, Clone, PartialEq)]
pub struct Conv2d {
    pub config: Conv2dConfig,
    pub weight: Tensor,
    pub bias: Option<Tensor>,
}

impl LayerShape for Conv2d {
    fn in_channels(&self) -> usize {
        self.config.in_channels
    }

    fn out_channels(&self) -> usize {
        self.config.out_channels
    }

    fn weight(&self) -> &Tensor {
        &self.weight
    }

    fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    fn is_conv(&self) -> bool {
        true
    }

    fn forward_with(&self, input: &Tensor, weight: &Tensor) -> Result<Tensor> {
        TensorOps::conv2d(
            input,
            weight,
            self.bias.as_ref(),
            self.config.stride,
            self.config.padding,
            self.config.dilation,
            self.config.groups,
        )
    }
}

/// Affine layer `y = x W^T + b`
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    pub in_features: usize,
    pub out_features: usize,
    pub weight: Tensor,
    pub bias: Option<Tensor>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, bias: bool) -> Self {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        Self {
            in_features,
            out_features,
            weight: Tensor::uniform(vec![out_features, in_features], bound),
            bias: bias.then(|| Tensor::uniform(vec![out_features], bound)),
        }
    }
}

impl LayerShape for Linear {
    fn in_channels(&self) -> usize {
        self.in_features
    }

    fn out_channels(&self) -> usize {
        self.out_features
    }

    fn weight(&self) -> &Tensor {
        &self.weight
    }

    fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    fn is_conv(&self) -> bool {
        false
    }

    fn forward_with(&self, input: &Tensor, weight: &Tensor) -> Result<Tensor> {
        TensorOps::linear(input, weight, self.bias.as_ref())
    }
}

/// A layer with attachable weight and activation quantizer slots
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedLayer<L> {
    pub layer: L,
    pub weight_quantizer: Option<Quantizer>,
    pub activation_quantizer: Option<Quantizer>,
}

pub type QConv2d = QuantizedLayer<Conv2d>;
pub type QLinear = QuantizedLayer<Linear>;

impl<L: LayerShape> QuantizedLayer<L> {
    /// Wrap `layer` with both quantizer slots empty
    pub fn new(layer: L) -> Self {
        Self {
            layer,
            weight_quantizer: None,
            activation_quantizer: None,
        }
    }

    pub fn with_weight_quantizer(mut self, quantizer: Quantizer) -> Self {
        self.weight_quantizer = Some(quantizer);
        self
    }

    pub fn with_activation_quantizer(mut self, quantizer: Quantizer) -> Self {
        self.activation_quantizer = Some(quantizer);
        self
    }

    /// A weight quantizer has been attached
    pub fn is_bound(&self) -> bool {
        self.weight_quantizer.is_some()
    }

    /// Forward pass; absent quantizers leave the original numerics untouched
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let input = match &self.activation_quantizer {
            Some(aq) => aq.fake_quantize(input)?,
            None => input.clone(),
        };

        match &self.weight_quantizer {
            Some(wq) => {
                let weight = wq.fake_quantize(self.layer.weight())?;
                self.layer.forward_with(&input, &weight)
            }
            None => self.layer.forward(&input),
        }
    }
}

impl<L: LayerShape> LayerShape for QuantizedLayer<L> {
    fn in_channels(&self) -> usize {
        self.layer.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.layer.out_channels()
    }

    fn weight(&self) -> &Tensor {
        self.layer.weight()
    }

    fn bias(&self) -> Option<&Tensor> {
        self.layer.bias()
    }

    fn is_conv(&self) -> bool {
        self.layer.is_conv()
    }

    fn forward_with(&self, input: &Tensor, weight: &Tensor) -> Result<Tensor> {
        self.layer.forward_with(input, weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::{QuantizerArgs, QuantizerRegistry};

    #[test]
    fn test_conv_config_builder() {
        let conv = Conv2dConfig::new(32, 64, (3, 3))
            .stride((2, 2))
            .padding((1, 1))
            .groups(4)
            .bias(false)
            .build()
            .unwrap();
        assert_eq!(conv.weight.shape, vec![64, 8, 3, 3]);
        assert!(conv.bias.is_none());
        assert_eq!(conv.in_channels(), 32);
        assert_eq!(conv.out_channels(), 64);

        assert!(Conv2dConfig::new(3, 64, (3, 3)).groups(2).build().is_err());
    }

    #[test]
    fn test_linear_shapes() {
        let linear = Linear::new(768, 2304, true);
        assert_eq!(linear.weight.shape, vec![2304, 768]);
        assert_eq!(linear.bias.as_ref().unwrap().shape, vec![2304]);
        assert!(!linear.is_conv());
    }

    #[test]
    fn test_unbound_forward_matches_layer() {
        let linear = Linear::new(16, 8, true);
        let qlinear = QLinear::new(linear.clone());
        let x = Tensor::uniform(vec![4, 16], 2.0);

        assert!(!qlinear.is_bound());
        assert_eq!(qlinear.forward(&x).unwrap(), linear.forward(&x).unwrap());
    }

    #[test]
    fn test_identity_quantizers_keep_numerics() {
        let conv = Conv2dConfig::new(4, 8, (3, 3)).padding((1, 1)).build().unwrap();
        let registry = QuantizerRegistry::activations();
        let args = QuantizerArgs::new(8, false, true);
        let qconv = QConv2d::new(conv.clone())
            .with_activation_quantizer(registry.build("identity", &args).unwrap())
            .with_weight_quantizer(registry.build("identity", &args).unwrap());

        let x = Tensor::uniform(vec![1, 4, 6, 6], 1.0);
        assert_eq!(qconv.forward(&x).unwrap(), conv.forward(&x).unwrap());
    }
}

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

//! Configuration management for Qgraft

use crate::adapters::Architecture;
use crate::quant::quantizer::check_nbit;
use crate::quant::QuantizerRegistry;
use crate::tensor::Device;
use crate::{QgraftError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Global configuration for a rewrite-then-bind run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub quantization: QuantizationConfig,
    #[serde(default)]
    pub placement: PlacementConfig,
}

/// Quantizer selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Weight bit width
    pub wbit: u8,
    /// Activation bit width
    pub abit: u8,
    /// Weight quantizer kind
    pub weight_kind: String,
    /// Activation quantizer kind
    pub act_kind: String,
    /// Architecture adapter to use
    pub architecture: Architecture,
    /// Signedness of plain-layer activation quantizers; `None` keeps the
    /// adapter default (unsigned)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plain_activation_unsigned: Option<bool>,
}

/// Device placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// `cpu`, `cuda` or `cuda:<index>`
    pub device: String,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            wbit: 8,
            abit: 8,
            weight_kind: "minmax".to_string(),
            act_kind: "minmax".to_string(),
            architecture: Architecture::Generic,
            plain_activation_unsigned: None,
        }
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            device: "cpu".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| QgraftError::Configuration(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| QgraftError::Configuration(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parsed placement device
    pub fn device(&self) -> Result<Device> {
        self.placement.device.parse()
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> Result<()> {
        let q = &self.quantization;
        check_nbit("wbit", q.wbit)?;
        check_nbit("abit", q.abit)?;

        QuantizerRegistry::weights().check(&q.weight_kind)?;
        QuantizerRegistry::activations().check(&q.act_kind)?;
        self.device()?;

        Ok(())
    }

    /// Architecture presets
    pub fn preset(name: &str) -> Result<Self> {
        let mut config = Self::default();

        match name.to_lowercase().as_str() {
            "generic" => {
                config.quantization.weight_kind = "minmax_channel".to_string();
                config.quantization.act_kind = "minmax".to_string();
            }
            "vit" => {
                config.quantization.architecture = Architecture::Vit;
                config.quantization.weight_kind = "minmax_channel".to_string();
                config.quantization.act_kind = "lsq_token".to_string();
            }
            "bert" => {
                config.quantization.architecture = Architecture::Bert;
                config.quantization.weight_kind = "adaround".to_string();
                config.quantization.act_kind = "lsq".to_string();
            }
            _ => {
                return Err(QgraftError::Configuration(format!(
                    "unknown preset '{}'",
                    name
                )));
            }
        }

        Ok(config)
    }
}

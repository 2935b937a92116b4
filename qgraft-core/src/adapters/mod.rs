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

//! Architecture adapters
//!
//! An adapter decides which nodes the rewriter and the binder act on. It maps
//! a node payload to a [`StructuralRole`]; everything downstream dispatches on
//! that closed set.

pub mod bert;
pub mod generic;
pub mod vit;

pub use bert::BertAdapter;
pub use generic::GenericAdapter;
pub use vit::VitAdapter;

use crate::error::{QgraftError, Result};
use crate::graph::{BertConfig, Module, ModuleGraph};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Structural roles a node can play during rewriting or binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructuralRole {
    /// Plain convolution, or its quantized form when binding
    Conv,
    /// Plain affine layer, or its quantized form when binding
    Linear,
    /// Attention block with fused `qkv` and `proj`
    Attention,
    /// Windowed attention block with position buffers
    WindowAttention,
    /// Feed-forward block with `fc1` and `fc2`
    FeedForward,
    /// BERT self-attention with `query`, `key`, `value`
    SelfAttention,
    /// BERT self-attention output with `dense`
    SelfOutput,
}

/// Supported architecture families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    #[default]
    Generic,
    Vit,
    Bert,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Generic => write!(f, "generic"),
            Architecture::Vit => write!(f, "vit"),
            Architecture::Bert => write!(f, "bert"),
        }
    }
}

impl FromStr for Architecture {
    type Err = QgraftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "generic" => Ok(Architecture::Generic),
            "vit" | "swin" => Ok(Architecture::Vit),
            "bert" => Ok(Architecture::Bert),
            other => Err(QgraftError::Configuration(format!(
                "unknown architecture '{}'",
                other
            ))),
        }
    }
}

/// Role recognition and per-architecture binding defaults
pub trait ArchitectureAdapter: fmt::Debug {
    /// Adapter name
    fn name(&self) -> &str;

    /// Role of a full-precision node, if this adapter converts it
    fn rewrite_role(&self, module: &Module) -> Option<StructuralRole>;

    /// Role of a converted node, if this adapter binds it
    fn bind_role(&self, module: &Module) -> Option<StructuralRole>;

    /// Signedness of activation quantizers attached to plain layers
    fn plain_activation_unsigned(&self) -> bool;

    /// Architecture configuration used to rebuild block shells
    fn config(&self) -> Option<&BertConfig> {
        None
    }
}

/// Quantized conv/linear payloads, recognised by every adapter when binding
pub(crate) fn layer_bind_role(module: &Module) -> Option<StructuralRole> {
    match module {
        Module::QConv2d(_) => Some(StructuralRole::Conv),
        Module::QLinear(_) => Some(StructuralRole::Linear),
        _ => None,
    }
}

/// Build the adapter for `architecture`. The BERT adapter reads its
/// configuration from `model` and fails if there is none.
pub fn adapter_for(
    architecture: Architecture,
    model: &ModuleGraph,
) -> Result<Box<dyn ArchitectureAdapter>> {
    Ok(match architecture {
        Architecture::Generic => Box::new(GenericAdapter::new()),
        Architecture::Vit => Box::new(VitAdapter::new()),
        Architecture::Bert => Box::new(BertAdapter::from_model(model)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_parse() {
        assert_eq!("ViT".parse::<Architecture>().unwrap(), Architecture::Vit);
        assert_eq!("swin".parse::<Architecture>().unwrap(), Architecture::Vit);
        assert_eq!("bert".parse::<Architecture>().unwrap(), Architecture::Bert);
        assert!("resnet".parse::<Architecture>().is_err());
        assert_eq!(Architecture::Bert.to_string(), "bert");
    }

    #[test]
    fn test_adapter_for() {
        let model = ModuleGraph::new(Module::container("Net"));
        assert_eq!(adapter_for(Architecture::Generic, &model).unwrap().name(), "generic");
        assert_eq!(adapter_for(Architecture::Vit, &model).unwrap().name(), "vit");

        let err = adapter_for(Architecture::Bert, &model).unwrap_err();
        assert!(matches!(err, QgraftError::MissingConfiguration { .. }));

        let model = model.with_config(BertConfig::new(64, 4));
        let adapter = adapter_for(Architecture::Bert, &model).unwrap();
        assert_eq!(adapter.config().unwrap().hidden_size, 64);
    }
}

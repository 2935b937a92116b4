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

//! BERT adapter
//!
//! Self-attention blocks are rebuilt from the model configuration, so the
//! adapter cannot be created for a model that does not carry one. Weight
//! quantizers of `query`, `key` and `value` are created in training mode.

use super::{layer_bind_role, ArchitectureAdapter, StructuralRole};
use crate::error::{QgraftError, Result};
use crate::graph::{BertConfig, Module, ModuleGraph};

/// Adapter for Hugging Face style BERT encoders
#[derive(Debug, Clone)]
pub struct BertAdapter {
    config: BertConfig,
    plain_activation_unsigned: bool,
}

impl BertAdapter {
    pub fn new(config: BertConfig) -> Self {
        Self {
            config,
            plain_activation_unsigned: true,
        }
    }

    /// Take the configuration exposed by `model`
    pub fn from_model(model: &ModuleGraph) -> Result<Self> {
        let config = model
            .config
            .clone()
            .ok_or_else(|| QgraftError::MissingConfiguration {
                adapter: "bert".to_string(),
            })?;
        Ok(Self::new(config))
    }

    pub fn with_plain_activation_unsigned(mut self, unsigned: bool) -> Self {
        self.plain_activation_unsigned = unsigned;
        self
    }
}

impl ArchitectureAdapter for BertAdapter {
    fn name(&self) -> &str {
        "bert"
    }

    fn rewrite_role(&self, module: &Module) -> Option<StructuralRole> {
        match module {
            Module::BertSelfAttention(_) => Some(StructuralRole::SelfAttention),
            Module::BertSelfOutput(_) => Some(StructuralRole::SelfOutput),
            _ => None,
        }
    }

    fn bind_role(&self, module: &Module) -> Option<StructuralRole> {
        match module {
            Module::QBertSelfAttention(_) => Some(StructuralRole::SelfAttention),
            Module::BertSelfOutput(_) => Some(StructuralRole::SelfOutput),
            other => layer_bind_role(other),
        }
    }

    fn plain_activation_unsigned(&self) -> bool {
        self.plain_activation_unsigned
    }

    fn config(&self) -> Option<&BertConfig> {
        Some(&self.config)
    }
}

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

//! Vision Transformer and Swin Transformer adapter
//!
//! Convolutions (the patch embedding), attention, windowed attention and
//! feed-forward blocks are converted. A standalone affine layer outside those
//! blocks, such as the classifier head, stays full precision.

use super::{layer_bind_role, ArchitectureAdapter, StructuralRole};
use crate::graph::Module;

/// Adapter for ViT-style models
#[derive(Debug, Clone)]
pub struct VitAdapter {
    plain_activation_unsigned: bool,
}

impl VitAdapter {
    pub fn new() -> Self {
        Self {
            plain_activation_unsigned: true,
        }
    }

    pub fn with_plain_activation_unsigned(mut self, unsigned: bool) -> Self {
        self.plain_activation_unsigned = unsigned;
        self
    }
}

impl ArchitectureAdapter for VitAdapter {
    fn name(&self) -> &str {
        "vit"
    }

    fn rewrite_role(&self, module: &Module) -> Option<StructuralRole> {
        match module {
            Module::Conv2d(_) => Some(StructuralRole::Conv),
            Module::Attention(_) => Some(StructuralRole::Attention),
            Module::WindowAttention(_) => Some(StructuralRole::WindowAttention),
            Module::Mlp(_) => Some(StructuralRole::FeedForward),
            _ => None,
        }
    }

    fn bind_role(&self, module: &Module) -> Option<StructuralRole> {
        match module {
            Module::QAttention(_) => Some(StructuralRole::Attention),
            Module::QWindowAttention(_) => Some(StructuralRole::WindowAttention),
            Module::Mlp(_) => Some(StructuralRole::FeedForward),
            other => layer_bind_role(other),
        }
    }

    fn plain_activation_unsigned(&self) -> bool {
        self.plain_activation_unsigned
    }
}

impl Default for VitAdapter {
    fn default() -> Self {
        Self::new()
    }
}

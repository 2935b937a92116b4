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

//! Convolution and affine layers only

use super::{layer_bind_role, ArchitectureAdapter, StructuralRole};
use crate::graph::Module;

/// Adapter for plain CNNs and MLPs
#[derive(Debug, Clone)]
pub struct GenericAdapter {
    plain_activation_unsigned: bool,
}

impl GenericAdapter {
    pub fn new() -> Self {
        Self {
            plain_activation_unsigned: true,
        }
    }

    /// Override the signedness of plain-layer activation quantizers
    pub fn with_plain_activation_unsigned(mut self, unsigned: bool) -> Self {
        self.plain_activation_unsigned = unsigned;
        self
    }
}

impl ArchitectureAdapter for GenericAdapter {
    fn name(&self) -> &str {
        "generic"
    }

    fn rewrite_role(&self, module: &Module) -> Option<StructuralRole> {
        match module {
            Module::Conv2d(_) => Some(StructuralRole::Conv),
            Module::Linear(_) => Some(StructuralRole::Linear),
            _ => None,
        }
    }

    fn bind_role(&self, module: &Module) -> Option<StructuralRole> {
        layer_bind_role(module)
    }

    fn plain_activation_unsigned(&self) -> bool {
        self.plain_activation_unsigned
    }
}

impl Default for GenericAdapter {
    fn default() -> Self {
        Self::new()
    }
}

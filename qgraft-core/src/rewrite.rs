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

//! Graph rewriter
//!
//! Works on a deep copy of the input. The node list is snapshotted before the
//! first substitution; each recognised node is converted and spliced back
//! under its parent with the same attribute name.

use crate::adapters::{ArchitectureAdapter, StructuralRole};
use crate::convert::LayerConverter;
use crate::error::{QgraftError, Result};
use crate::graph::{get_parent_name, Module, ModuleGraph, NodeId};
use log::{debug, info};

/// Replaces recognised nodes with their quantized counterparts
#[derive(Debug)]
pub struct GraphRewriter<'a> {
    adapter: &'a dyn ArchitectureAdapter,
    converter: LayerConverter,
}

impl<'a> GraphRewriter<'a> {
    pub fn new(adapter: &'a dyn ArchitectureAdapter) -> Self {
        Self {
            adapter,
            converter: LayerConverter::new(),
        }
    }

    /// Return a rewritten copy of `model`; `model` itself is never touched
    pub fn rewrite(&self, model: &ModuleGraph) -> Result<ModuleGraph> {
        let mut graph = model.deep_copy();
        let snapshot = graph.named_modules();
        info!(
            "Rewriting {} modules with the {} adapter",
            snapshot.len(),
            self.adapter.name()
        );

        let mut replaced = 0;
        for (path, id) in snapshot {
            // The root has no parent to splice into
            if path.is_empty() {
                continue;
            }
            let Some(role) = self.adapter.rewrite_role(graph.module(id)) else {
                continue;
            };

            let new_id = self.convert(&mut graph, id, &path, role)?;
            let (parent_path, name) = get_parent_name(&path);
            let parent = graph.resolve(parent_path).ok_or_else(|| {
                QgraftError::mismatch(&path, format!("parent '{}' in the graph", parent_path))
            })?;
            graph.set_child(parent, name, new_id);

            debug!("{}: {:?} -> {}", path, role, graph.module(new_id).type_name());
            replaced += 1;
        }

        info!("Rewrite complete: {} modules replaced", replaced);
        Ok(graph)
    }

    fn convert(
        &self,
        graph: &mut ModuleGraph,
        id: NodeId,
        path: &str,
        role: StructuralRole,
    ) -> Result<NodeId> {
        let converter = &self.converter;
        match role {
            StructuralRole::Conv => {
                let layer = match graph.module(id) {
                    Module::Conv2d(conv) => converter.conv(conv)?,
                    other => return Err(QgraftError::mismatch(path, found("Conv2d", other))),
                };
                Ok(graph.add_node(Module::QConv2d(layer)))
            }
            StructuralRole::Linear => {
                let layer = match graph.module(id) {
                    Module::Linear(linear) => converter.linear(linear)?,
                    other => return Err(QgraftError::mismatch(path, found("Linear", other))),
                };
                Ok(graph.add_node(Module::QLinear(layer)))
            }
            StructuralRole::Attention => converter.attention(graph, id, path),
            StructuralRole::WindowAttention => converter.window_attention(graph, id, path),
            StructuralRole::FeedForward => converter.mlp(graph, id, path),
            StructuralRole::SelfAttention => {
                let config = self.adapter.config().ok_or_else(|| {
                    QgraftError::MissingConfiguration {
                        adapter: self.adapter.name().to_string(),
                    }
                })?;
                converter.bert_self_attention(graph, id, path, config)
            }
            StructuralRole::SelfOutput => converter.bert_self_output(graph, id, path),
        }
    }
}

fn found(expected: &str, module: &Module) -> String {
    format!("{}, found {}", expected, module.type_name())
}

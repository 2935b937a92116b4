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

//! Layer converter
//!
//! Builds the quantized replacement of one layer or composite block. Learned
//! parameters are copied value for value into freshly allocated layers, so a
//! converted layer with empty quantizer slots computes exactly what the
//! original did.

use crate::error::{QgraftError, Result};
use crate::graph::{
    Attention, BertConfig, Conv2d, Linear, Module, ModuleGraph, NodeId, QAttention,
    QBertSelfAttention, QConv2d, QLinear, QWindowAttention, WindowAttention,
};
use std::sync::Arc;

/// Converts layers and blocks into their quantized counterparts
#[derive(Debug, Clone, Copy, Default)]
pub struct LayerConverter;

impl LayerConverter {
    pub fn new() -> Self {
        Self
    }

    /// Same hyperparameters and bias presence, weight and bias copied
    pub fn conv(&self, conv: &Conv2d) -> Result<QConv2d> {
        let mut fresh = conv.config.bias(conv.bias.is_some()).build()?;
        fresh.weight.copy_from(&conv.weight)?;
        if let (Some(dst), Some(src)) = (fresh.bias.as_mut(), conv.bias.as_ref()) {
            dst.copy_from(src)?;
        }
        Ok(QConv2d::new(fresh))
    }

    /// Same feature counts and bias presence, weight and bias copied
    pub fn linear(&self, linear: &Linear) -> Result<QLinear> {
        let mut fresh = Linear::new(linear.in_features, linear.out_features, linear.bias.is_some());
        fresh.weight.copy_from(&linear.weight)?;
        if let (Some(dst), Some(src)) = (fresh.bias.as_mut(), linear.bias.as_ref()) {
            dst.copy_from(src)?;
        }
        Ok(QLinear::new(fresh))
    }

    /// Convert the `fc1`/`fc2` children of a feed-forward block in place.
    /// Activation and dropout children are untouched.
    pub fn mlp(&self, graph: &mut ModuleGraph, node: NodeId, path: &str) -> Result<NodeId> {
        for name in ["fc1", "fc2"] {
            let converted = self.linear_child(graph, node, path, name)?;
            let id = graph.add_node(Module::QLinear(converted));
            graph.set_child(node, name, id);
        }
        Ok(node)
    }

    /// New [`QAttention`] shell with converted `qkv`/`proj`
    pub fn attention(&self, graph: &mut ModuleGraph, node: NodeId, path: &str) -> Result<NodeId> {
        let attn = match graph.module(node) {
            Module::Attention(attn) => attn.clone(),
            other => return Err(QgraftError::mismatch(path, expected_block("Attention", other))),
        };

        let qkv = self.linear_child(graph, node, path, "qkv")?;
        let mut shell = QAttention::new(
            qkv.layer.in_features,
            attn.num_heads,
            qkv.layer.bias.is_some(),
            attn.attn_drop,
            attn.proj_drop,
        );
        shell.attn.qk_norm = attn.qk_norm;

        self.install_shell(graph, node, path, Module::QAttention(shell), ("qkv", qkv), &["proj"])
    }

    /// New [`QWindowAttention`] shell; position buffers are shared, not copied
    pub fn window_attention(
        &self,
        graph: &mut ModuleGraph,
        node: NodeId,
        path: &str,
    ) -> Result<NodeId> {
        let window = match graph.module(node) {
            Module::WindowAttention(window) => window,
            other => {
                return Err(QgraftError::mismatch(path, expected_block("WindowAttention", other)))
            }
        };
        let num_heads = window.attn.num_heads;
        let (attn_drop, proj_drop) = (window.attn.attn_drop, window.attn.proj_drop);
        let window_size = window.window_size;
        let bias_table = Arc::clone(&window.relative_position_bias_table);
        let index = Arc::clone(&window.relative_position_index);

        let qkv = self.linear_child(graph, node, path, "qkv")?;
        let shell = QWindowAttention {
            window: WindowAttention {
                attn: Attention {
                    dim: qkv.layer.in_features,
                    num_heads,
                    qkv_bias: qkv.layer.bias.is_some(),
                    qk_norm: false,
                    attn_drop,
                    proj_drop,
                },
                window_size,
                relative_position_bias_table: bias_table,
                relative_position_index: index,
            },
            quantizers: Default::default(),
        };

        self.install_shell(graph, node, path, Module::QWindowAttention(shell), ("qkv", qkv), &["proj"])
    }

    /// New [`QBertSelfAttention`] shell built from the model configuration,
    /// with converted `query`/`key`/`value`
    pub fn bert_self_attention(
        &self,
        graph: &mut ModuleGraph,
        node: NodeId,
        path: &str,
        config: &BertConfig,
    ) -> Result<NodeId> {
        if !matches!(graph.module(node), Module::BertSelfAttention(_)) {
            return Err(QgraftError::mismatch(
                path,
                expected_block("BertSelfAttention", graph.module(node)),
            ));
        }

        let query = self.linear_child(graph, node, path, "query")?;
        let shell = Module::QBertSelfAttention(QBertSelfAttention::new(config));
        self.install_shell(graph, node, path, shell, ("query", query), &["key", "value"])
    }

    /// Convert the `dense` child of a BERT self-output block in place
    pub fn bert_self_output(
        &self,
        graph: &mut ModuleGraph,
        node: NodeId,
        path: &str,
    ) -> Result<NodeId> {
        if !matches!(graph.module(node), Module::BertSelfOutput(_)) {
            return Err(QgraftError::mismatch(
                path,
                expected_block("BertSelfOutput", graph.module(node)),
            ));
        }

        let dense = self.linear_child(graph, node, path, "dense")?;
        let id = graph.add_node(Module::QLinear(dense));
        graph.set_child(node, "dense", id);
        Ok(node)
    }

    /// Add `shell` as a new node carrying every child of `node`, with
    /// `first` and the `rest` children replaced by converted linears.
    fn install_shell(
        &self,
        graph: &mut ModuleGraph,
        node: NodeId,
        path: &str,
        shell: Module,
        first: (&str, QLinear),
        rest: &[&str],
    ) -> Result<NodeId> {
        let mut converted = vec![first];
        for &name in rest {
            converted.push((name, self.linear_child(graph, node, path, name)?));
        }

        let carried: Vec<(String, NodeId)> = graph.children(node).to_vec();
        let shell_id = graph.add_node(shell);
        for (name, child) in carried {
            graph.set_child(shell_id, &name, child);
        }
        for (name, layer) in converted {
            let id = graph.add_node(Module::QLinear(layer));
            graph.set_child(shell_id, name, id);
        }
        Ok(shell_id)
    }

    /// Convert the linear child `name` of the block at `path`
    fn linear_child(
        &self,
        graph: &ModuleGraph,
        node: NodeId,
        path: &str,
        name: &str,
    ) -> Result<QLinear> {
        let child_path = format!("{}.{}", path, name);
        let child = graph
            .child(node, name)
            .ok_or_else(|| QgraftError::mismatch(&child_path, format!("'{}' sub-layer", name)))?;

        match graph.module(child) {
            Module::Linear(linear) => self.linear(linear),
            other => Err(QgraftError::mismatch(
                &child_path,
                format!("Linear, found {}", other.type_name()),
            )),
        }
    }
}

fn expected_block(expected: &str, found: &Module) -> String {
    format!("{}, found {}", expected, found.type_name())
}

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

//! Module graph representation
//!
//! A model is an arena of nodes. Each node holds a [`Module`] payload and an
//! ordered list of named children; edges mirror attribute containment, so a
//! node's dotted path (`blocks.0.attn.qkv`) is the chain of child names from
//! the root. The same node may hang under several parents (a shared
//! submodule); traversal reports it once.

pub mod blocks;
pub mod layers;
pub mod summary;

pub use blocks::{
    Activation, Attention, AttentionQuantizers, BertAttentionQuantizers, BertConfig,
    BertSelfAttention, BertSelfOutput, Dropout, LayerNorm, Mlp, QAttention, QBertSelfAttention,
    QWindowAttention, WindowAttention,
};
pub use layers::{Conv2d, Conv2dConfig, LayerShape, Linear, QConv2d, QLinear, QuantizedLayer};
pub use summary::{GraphSummary, QuantizedLayerRef, QuantizerSite};

use crate::error::{QgraftError, Result};
use crate::tensor::{Device, Tensor};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Payload of a graph node
#[derive(Debug, Clone, PartialEq)]
pub enum Module {
    /// Grouping node with no parameters of its own (Sequential, Block, ...)
    Container { type_name: String },
    Conv2d(Conv2d),
    Linear(Linear),
    QConv2d(QConv2d),
    QLinear(QLinear),
    Attention(Attention),
    WindowAttention(WindowAttention),
    Mlp(Mlp),
    BertSelfAttention(BertSelfAttention),
    BertSelfOutput(BertSelfOutput),
    QAttention(QAttention),
    QWindowAttention(QWindowAttention),
    QBertSelfAttention(QBertSelfAttention),
    Activation(Activation),
    Dropout(Dropout),
    LayerNorm(LayerNorm),
}

impl Module {
    pub fn container(type_name: &str) -> Self {
        Module::Container {
            type_name: type_name.to_string(),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Module::Container { type_name } => type_name,
            Module::Conv2d(_) => "Conv2d",
            Module::Linear(_) => "Linear",
            Module::QConv2d(_) => "QConv2d",
            Module::QLinear(_) => "QLinear",
            Module::Attention(_) => "Attention",
            Module::WindowAttention(_) => "WindowAttention",
            Module::Mlp(_) => "Mlp",
            Module::BertSelfAttention(_) => "BertSelfAttention",
            Module::BertSelfOutput(_) => "BertSelfOutput",
            Module::QAttention(_) => "QAttention",
            Module::QWindowAttention(_) => "QWindowAttention",
            Module::QBertSelfAttention(_) => "QBertSelfAttention",
            Module::Activation(_) => "Activation",
            Module::Dropout(_) => "Dropout",
            Module::LayerNorm(_) => "LayerNorm",
        }
    }

    /// Every tensor owned by this payload, quantizer parameters included
    pub fn tensors(&self) -> Vec<&Tensor> {
        fn layer<'a>(out: &mut Vec<&'a Tensor>, weight: &'a Tensor, bias: Option<&'a Tensor>) {
            out.push(weight);
            out.extend(bias);
        }
        fn quantizer<'a>(out: &mut Vec<&'a Tensor>, q: &'a crate::quant::Quantizer) {
            out.extend([&q.scale, &q.zero_point, &q.observer.lb, &q.observer.ub]);
            out.extend(q.soft_rounding.as_ref());
        }

        let mut out = Vec::new();
        match self {
            Module::Conv2d(conv) => layer(&mut out, &conv.weight, conv.bias.as_ref()),
            Module::Linear(linear) => layer(&mut out, &linear.weight, linear.bias.as_ref()),
            Module::QConv2d(q) => {
                layer(&mut out, &q.layer.weight, q.layer.bias.as_ref());
                q.weight_quantizer.iter().for_each(|wq| quantizer(&mut out, wq));
                q.activation_quantizer.iter().for_each(|aq| quantizer(&mut out, aq));
            }
            Module::QLinear(q) => {
                layer(&mut out, &q.layer.weight, q.layer.bias.as_ref());
                q.weight_quantizer.iter().for_each(|wq| quantizer(&mut out, wq));
                q.activation_quantizer.iter().for_each(|aq| quantizer(&mut out, aq));
            }
            Module::WindowAttention(w) => {
                out.push(&w.relative_position_bias_table);
                out.push(&w.relative_position_index);
            }
            Module::QAttention(q) => q.quantizers.iter().for_each(|(_, aq)| quantizer(&mut out, aq)),
            Module::QWindowAttention(q) => {
                out.push(&q.window.relative_position_bias_table);
                out.push(&q.window.relative_position_index);
                q.quantizers.iter().for_each(|(_, aq)| quantizer(&mut out, aq));
            }
            Module::QBertSelfAttention(q) => {
                q.quantizers.iter().for_each(|(_, aq)| quantizer(&mut out, aq))
            }
            _ => {}
        }
        out
    }
}

impl Module {
    /// Move every tensor owned by this payload to `device`. Shared position
    /// buffers are cloned on write if another owner still holds them.
    pub fn to_device(&mut self, device: Device) {
        fn layer(weight: &mut Tensor, bias: Option<&mut Tensor>, device: Device) {
            weight.to_device(device);
            if let Some(bias) = bias {
                bias.to_device(device);
            }
        }
        fn buffers(window: &mut WindowAttention, device: Device) {
            for buffer in [
                &mut window.relative_position_bias_table,
                &mut window.relative_position_index,
            ] {
                if buffer.device != device {
                    Arc::make_mut(buffer).to_device(device);
                }
            }
        }

        match self {
            Module::Conv2d(conv) => layer(&mut conv.weight, conv.bias.as_mut(), device),
            Module::Linear(linear) => layer(&mut linear.weight, linear.bias.as_mut(), device),
            Module::QConv2d(q) => {
                layer(&mut q.layer.weight, q.layer.bias.as_mut(), device);
                q.weight_quantizer.iter_mut().for_each(|wq| wq.to_device(device));
                q.activation_quantizer.iter_mut().for_each(|aq| aq.to_device(device));
            }
            Module::QLinear(q) => {
                layer(&mut q.layer.weight, q.layer.bias.as_mut(), device);
                q.weight_quantizer.iter_mut().for_each(|wq| wq.to_device(device));
                q.activation_quantizer.iter_mut().for_each(|aq| aq.to_device(device));
            }
            Module::WindowAttention(w) => buffers(w, device),
            Module::QAttention(q) => q.quantizers.for_each_mut(|aq| aq.to_device(device)),
            Module::QWindowAttention(q) => {
                buffers(&mut q.window, device);
                q.quantizers.for_each_mut(|aq| aq.to_device(device));
            }
            Module::QBertSelfAttention(q) => q.quantizers.for_each_mut(|aq| aq.to_device(device)),
            _ => {}
        }
    }
}

/// Index of a node inside one [`ModuleGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// A graph node: payload plus ordered, named children
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub module: Module,
    children: Vec<(String, NodeId)>,
}

impl Node {
    pub fn children(&self) -> &[(String, NodeId)] {
        &self.children
    }
}

/// A model as a tree/DAG of named modules
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleGraph {
    nodes: Vec<Node>,
    root: NodeId,
    /// Device the model's tensors live on
    pub device: Device,
    /// Architecture configuration exposed by the source model, if any
    pub config: Option<BertConfig>,
}

/// Split a dotted path into `(parent_path, child_name)`
pub fn get_parent_name(target: &str) -> (&str, &str) {
    match target.rsplit_once('.') {
        Some((parent, name)) => (parent, name),
        None => ("", target),
    }
}

impl ModuleGraph {
    pub fn new(root: Module) -> Self {
        Self {
            nodes: vec![Node {
                module: root,
                children: Vec::new(),
            }],
            root: NodeId(0),
            device: Device::Cpu,
            config: None,
        }
    }

    pub fn with_config(mut self, config: BertConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn module(&self, id: NodeId) -> &Module {
        &self.nodes[id.0].module
    }

    pub fn module_mut(&mut self, id: NodeId) -> &mut Module {
        &mut self.nodes[id.0].module
    }

    /// Add a detached node
    pub fn add_node(&mut self, module: Module) -> NodeId {
        self.nodes.push(Node {
            module,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    /// Attach `child` under `parent` as a new attribute `name`
    pub fn add_child(&mut self, parent: NodeId, name: &str, child: NodeId) -> Result<()> {
        if self.child(parent, name).is_some() {
            return Err(QgraftError::mismatch(
                name,
                format!("no existing child '{}' under {}", name, self.module(parent).type_name()),
            ));
        }
        self.nodes[parent.0].children.push((name.to_string(), child));
        Ok(())
    }

    /// Add `module` as a new child of `parent`, returning its id
    pub fn insert(&mut self, parent: NodeId, name: &str, module: Module) -> Result<NodeId> {
        let id = self.add_node(module);
        self.add_child(parent, name, id)?;
        Ok(id)
    }

    /// Point attribute `name` of `parent` at `child`, keeping its position
    /// among the siblings. Appends if the attribute does not exist yet.
    pub fn set_child(&mut self, parent: NodeId, name: &str, child: NodeId) {
        let children = &mut self.nodes[parent.0].children;
        match children.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = child,
            None => children.push((name.to_string(), child)),
        }
    }

    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[parent.0]
            .children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    pub fn children(&self, id: NodeId) -> &[(String, NodeId)] {
        &self.nodes[id.0].children
    }

    /// Follow a dotted path from the root; `""` is the root itself
    pub fn resolve(&self, path: &str) -> Option<NodeId> {
        if path.is_empty() {
            return Some(self.root);
        }
        path.split('.')
            .try_fold(self.root, |node, name| self.child(node, name))
    }

    /// Pre-order walk of all reachable nodes, root first with the empty
    /// path. A node reachable by several paths is reported once, under the
    /// first path found.
    pub fn named_modules(&self) -> Vec<(String, NodeId)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![(String::new(), self.root)];

        while let Some((path, id)) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            for (name, child) in self.nodes[id.0].children.iter().rev() {
                let child_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{}.{}", path, name)
                };
                stack.push((child_path, *child));
            }
            out.push((path, id));
        }
        out
    }

    /// Number of reachable nodes
    pub fn len(&self) -> usize {
        self.named_modules().len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Independent copy holding only reachable nodes. Shared submodules stay
    /// shared in the copy.
    pub fn deep_copy(&self) -> ModuleGraph {
        let mut copy = ModuleGraph {
            nodes: Vec::new(),
            root: NodeId(0),
            device: self.device,
            config: self.config.clone(),
        };

        let mut memo: HashMap<NodeId, NodeId> = HashMap::new();
        for (_, id) in self.named_modules() {
            let new_id = copy.add_node(self.nodes[id.0].module.clone());
            memo.insert(id, new_id);
        }
        for (old, new) in &memo {
            copy.nodes[new.0].children = self.nodes[old.0]
                .children
                .iter()
                .map(|(name, child)| (name.clone(), memo[child]))
                .collect();
        }
        copy.root = memo[&self.root];
        copy
    }

    /// Move every reachable tensor, quantizer parameters included, to `device`
    pub fn to_device(&mut self, device: Device) {
        for (_, id) in self.named_modules() {
            self.nodes[id.0].module.to_device(device);
        }
        self.device = device;
    }

    /// Devices of every reachable tensor
    pub fn devices(&self) -> HashSet<Device> {
        self.named_modules()
            .into_iter()
            .flat_map(|(_, id)| {
                self.module(id)
                    .tensors()
                    .into_iter()
                    .map(|t| t.device)
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

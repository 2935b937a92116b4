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

//! Quantizer binder
//!
//! Second pass over an already rewritten graph. Every quantized layer gets a
//! weight quantizer sized to its output channels and an activation quantizer
//! sized to its input channels; composite blocks additionally get signed
//! quantizers for the tensors flowing between their sub-layers.
//!
//! Channel-wise parameters of conv layers are broadcast to rank 4 exactly
//! once. Binding a graph that already carries quantizers is rejected with
//! [`QgraftError::ReshapeGuardViolation`].
//!
//! When a [`ReferenceParams`] set is attached, block-level quantizers take
//! their parameter shapes from it instead of from the layer geometry, with
//! values reset to scale 1, zero-point 0 and empty bounds.

use crate::adapters::{ArchitectureAdapter, StructuralRole};
use crate::error::{QgraftError, Result};
use crate::graph::{
    AttentionQuantizers, BertAttentionQuantizers, LayerShape, Module, ModuleGraph, NodeId,
    QuantizedLayer,
};
use crate::quant::quantizer::check_nbit;
use crate::quant::{Quantizer, QuantizerArgs, QuantizerRegistry, ReferenceParams};
use crate::tensor::{Device, Tensor};
use log::{debug, info};
use std::collections::HashSet;

/// Kind identifier of the pass-through activation quantizer
const PASSTHROUGH_KIND: &str = "identity";

/// Attaches quantizers of the configured kinds to a rewritten graph
#[derive(Debug)]
pub struct QuantizerBinder<'a> {
    adapter: &'a dyn ArchitectureAdapter,
    weights: QuantizerRegistry,
    activations: QuantizerRegistry,
    wbit: u8,
    abit: u8,
    weight_kind: String,
    act_kind: String,
    reference: Option<&'a ReferenceParams>,
}

/// How the input of a block sub-layer is quantized
#[derive(Debug, Clone, Copy)]
enum Input {
    /// Covered by a block-level quantizer; the layer keeps a pass-through
    Passthrough,
    /// Signed activation quantizer of the configured kind
    Signed { train_flag: bool },
}

/// Binding plan for one affine sub-layer of a composite block
#[derive(Debug, Clone, Copy)]
struct SubLayer {
    name: &'static str,
    weight_train: bool,
    /// Weight quantizer shape comes from the reference set when one is attached
    weight_from_reference: bool,
    input: Input,
}

impl SubLayer {
    const fn frozen(name: &'static str, input: Input) -> Self {
        Self {
            name,
            weight_train: false,
            weight_from_reference: false,
            input,
        }
    }
}

impl<'a> QuantizerBinder<'a> {
    /// Create a binder; unknown kinds are rejected here, before any traversal
    pub fn new(
        adapter: &'a dyn ArchitectureAdapter,
        wbit: u8,
        abit: u8,
        weight_kind: &str,
        act_kind: &str,
    ) -> Result<Self> {
        Self {
            adapter,
            weights: QuantizerRegistry::weights(),
            activations: QuantizerRegistry::activations(),
            wbit,
            abit,
            weight_kind: weight_kind.to_string(),
            act_kind: act_kind.to_string(),
            reference: None,
        }
        .validated()
    }

    /// Initialise block-level quantizers from an external parameter set
    pub fn with_reference(mut self, reference: &'a ReferenceParams) -> Self {
        self.reference = Some(reference);
        self
    }

    fn validated(self) -> Result<Self> {
        check_nbit("wbit", self.wbit)?;
        check_nbit("abit", self.abit)?;
        self.weights.check(&self.weight_kind)?;
        self.activations.check(&self.act_kind)?;
        self.activations.check(PASSTHROUGH_KIND)?;
        Ok(self)
    }

    /// Return a bound copy of `model`; `model` itself is never touched
    pub fn bind(&self, model: &ModuleGraph) -> Result<ModuleGraph> {
        let mut graph = model.deep_copy();
        let snapshot = graph.named_modules();
        info!(
            "Binding {} weight / {} activation quantizers ({}-bit / {}-bit) with the {} adapter",
            self.weight_kind,
            self.act_kind,
            self.wbit,
            self.abit,
            self.adapter.name()
        );

        let mut pass = BindPass {
            binder: self,
            device: graph.device,
            handled: HashSet::new(),
            attached: 0,
        };

        for (path, id) in snapshot {
            // Sub-layers already bound through their enclosing block
            if pass.handled.contains(&id) {
                continue;
            }
            let Some(role) = self.adapter.bind_role(graph.module(id)) else {
                continue;
            };

            match role {
                StructuralRole::Conv | StructuralRole::Linear => {
                    pass.bind_layer_node(&mut graph, id, &path)?
                }
                StructuralRole::Attention | StructuralRole::WindowAttention => {
                    pass.bind_attention(&mut graph, id, &path)?
                }
                StructuralRole::FeedForward => pass.bind_mlp(&mut graph, id, &path)?,
                StructuralRole::SelfAttention => pass.bind_bert_attention(&mut graph, id, &path)?,
                StructuralRole::SelfOutput => pass.bind_bert_output(&mut graph, id, &path)?,
            }
        }

        info!("Bind complete: {} quantizers attached", pass.attached);
        Ok(graph)
    }
}

/// State of one `bind` call
struct BindPass<'b, 'a> {
    binder: &'b QuantizerBinder<'a>,
    device: Device,
    handled: HashSet<NodeId>,
    attached: usize,
}

impl BindPass<'_, '_> {
    fn weight_quantizer(&mut self, weight: &Tensor, train_flag: bool) -> Result<Quantizer> {
        let binder = self.binder;
        let mut args = QuantizerArgs::new(binder.wbit, train_flag, false);
        if binder.weights.needs_weight(&binder.weight_kind)? {
            args = args.with_weight(weight);
        }
        let mut quantizer = binder.weights.build(&binder.weight_kind, &args)?;
        quantizer.to_device(self.device);
        self.attached += 1;
        Ok(quantizer)
    }

    fn activation_quantizer(
        &mut self,
        kind: &str,
        train_flag: bool,
        unsigned: bool,
    ) -> Result<Quantizer> {
        let args = QuantizerArgs::new(self.binder.abit, train_flag, unsigned);
        let mut quantizer = self.binder.activations.build(kind, &args)?;
        quantizer.to_device(self.device);
        self.attached += 1;
        Ok(quantizer)
    }

    /// Size `quantizer` for the tensor it observes: from the reference set if
    /// allowed and present, otherwise to `channels`.
    fn shape(
        &self,
        quantizer: &mut Quantizer,
        path: &str,
        channels: usize,
        from_reference: bool,
    ) -> Result<()> {
        match (from_reference, self.binder.reference) {
            (true, Some(reference)) => quantizer.init_from_reference(reference, path)?,
            _ => quantizer.rechannel(channels),
        }
        debug!(
            "{}: {} {:?} x{}",
            path, quantizer.kind, quantizer.scale.shape, quantizer.num_channels
        );
        Ok(())
    }

    fn bind_layer_node(&mut self, graph: &mut ModuleGraph, id: NodeId, path: &str) -> Result<()> {
        let unsigned = self.binder.adapter.plain_activation_unsigned();
        match graph.module_mut(id) {
            Module::QConv2d(layer) => self.bind_layer(layer, path, unsigned),
            Module::QLinear(layer) => self.bind_layer(layer, path, unsigned),
            other => Err(QgraftError::mismatch(
                path,
                format!("a quantized layer, found {}", other.type_name()),
            )),
        }
    }

    /// Plain layer rule. A conv reading 3 channels is the RGB stem and keeps
    /// its input in full precision.
    fn bind_layer<L: LayerShape>(
        &mut self,
        layer: &mut QuantizedLayer<L>,
        path: &str,
        unsigned: bool,
    ) -> Result<()> {
        let wq_path = format!("{}.wq", path);
        if layer.is_bound() {
            return Err(QgraftError::ReshapeGuardViolation { path: wq_path });
        }

        let mut wq = self.weight_quantizer(layer.weight(), false)?;
        self.shape(&mut wq, &wq_path, layer.out_channels(), false)?;
        if layer.is_conv() {
            wq.expand_for_conv(&wq_path)?;
        }

        let rgb_stem = layer.is_conv() && layer.in_channels() == 3;
        let aq = if rgb_stem {
            None
        } else {
            let aq_path = format!("{}.aq", path);
            let binder = self.binder;
            let mut aq = self.activation_quantizer(&binder.act_kind, false, unsigned)?;
            self.shape(&mut aq, &aq_path, layer.in_channels(), false)?;
            if layer.is_conv() {
                aq.expand_for_conv(&aq_path)?;
            }
            Some(aq)
        };

        layer.weight_quantizer = Some(wq);
        layer.activation_quantizer = aq;
        Ok(())
    }

    /// Bind the affine child `plan.name` of the block at `block_path`
    fn bind_sublayer(
        &mut self,
        graph: &mut ModuleGraph,
        block: NodeId,
        block_path: &str,
        plan: SubLayer,
    ) -> Result<()> {
        let layer_path = format!("{}.{}", block_path, plan.name);
        let child = graph.child(block, plan.name).ok_or_else(|| {
            QgraftError::mismatch(&layer_path, format!("'{}' sub-layer", plan.name))
        })?;

        let layer = match graph.module_mut(child) {
            Module::QLinear(layer) => layer,
            other => {
                return Err(QgraftError::mismatch(
                    &layer_path,
                    format!("QLinear, found {}", other.type_name()),
                ))
            }
        };

        let wq_path = format!("{}.wq", layer_path);
        if layer.is_bound() {
            return Err(QgraftError::ReshapeGuardViolation { path: wq_path });
        }

        let mut wq = self.weight_quantizer(&layer.layer.weight, plan.weight_train)?;
        self.shape(&mut wq, &wq_path, layer.out_channels(), plan.weight_from_reference)?;

        let aq_path = format!("{}.aq", layer_path);
        let aq = match plan.input {
            Input::Passthrough => {
                let mut aq = self.activation_quantizer(PASSTHROUGH_KIND, false, false)?;
                self.shape(&mut aq, &aq_path, layer.in_channels(), false)?;
                aq
            }
            Input::Signed { train_flag } => {
                let binder = self.binder;
                let mut aq = self.activation_quantizer(&binder.act_kind, train_flag, false)?;
                self.shape(&mut aq, &aq_path, layer.in_channels(), true)?;
                aq
            }
        };

        layer.weight_quantizer = Some(wq);
        layer.activation_quantizer = Some(aq);
        self.handled.insert(child);
        Ok(())
    }

    /// Signed block-level quantizer of the configured activation kind
    fn block_quantizer(&mut self, path: &str, train_flag: bool, channels: usize) -> Result<Quantizer> {
        let binder = self.binder;
        let mut quantizer = self.activation_quantizer(&binder.act_kind, train_flag, false)?;
        self.shape(&mut quantizer, path, channels, true)?;
        Ok(quantizer)
    }

    fn bind_attention(&mut self, graph: &mut ModuleGraph, id: NodeId, path: &str) -> Result<()> {
        let (dim, already_bound) = match graph.module(id) {
            Module::QAttention(q) => (q.attn.dim, !q.quantizers.is_empty()),
            Module::QWindowAttention(q) => (q.window.attn.dim, !q.quantizers.is_empty()),
            other => {
                return Err(QgraftError::mismatch(
                    path,
                    format!("a quantized attention block, found {}", other.type_name()),
                ))
            }
        };
        if already_bound {
            return Err(QgraftError::ReshapeGuardViolation {
                path: format!("{}.xq", path),
            });
        }

        for name in ["qkv", "proj"] {
            self.bind_sublayer(graph, id, path, SubLayer::frozen(name, Input::Passthrough))?;
        }

        let quantizers = AttentionQuantizers {
            xq: Some(self.block_quantizer(&format!("{}.xq", path), false, dim)?),
            qqkv: Some(self.block_quantizer(&format!("{}.qqkv", path), false, dim)?),
            qproj: Some(self.block_quantizer(&format!("{}.qproj", path), false, dim)?),
        };
        match graph.module_mut(id) {
            Module::QAttention(q) => q.quantizers = quantizers,
            Module::QWindowAttention(q) => q.quantizers = quantizers,
            _ => {}
        }
        Ok(())
    }

    fn bind_mlp(&mut self, graph: &mut ModuleGraph, id: NodeId, path: &str) -> Result<()> {
        for name in ["fc1", "fc2"] {
            let plan = SubLayer::frozen(name, Input::Signed { train_flag: false });
            self.bind_sublayer(graph, id, path, plan)?;
        }
        Ok(())
    }

    /// `query`/`key`/`value` weight quantizers stay trainable
    fn bind_bert_attention(&mut self, graph: &mut ModuleGraph, id: NodeId, path: &str) -> Result<()> {
        let (hidden_size, already_bound) = match graph.module(id) {
            Module::QBertSelfAttention(q) => (q.config.hidden_size, !q.quantizers.is_empty()),
            other => {
                return Err(QgraftError::mismatch(
                    path,
                    format!("QBertSelfAttention, found {}", other.type_name()),
                ))
            }
        };
        if already_bound {
            return Err(QgraftError::ReshapeGuardViolation {
                path: format!("{}.xq", path),
            });
        }

        for name in ["query", "key", "value"] {
            let plan = SubLayer {
                name,
                weight_train: true,
                weight_from_reference: true,
                input: Input::Passthrough,
            };
            self.bind_sublayer(graph, id, path, plan)?;
        }

        let quantizers = BertAttentionQuantizers {
            xq: Some(self.block_quantizer(&format!("{}.xq", path), true, hidden_size)?),
            qquery: Some(self.block_quantizer(&format!("{}.qquery", path), true, hidden_size)?),
            qkey: Some(self.block_quantizer(&format!("{}.qkey", path), true, hidden_size)?),
            qvalue: Some(self.block_quantizer(&format!("{}.qvalue", path), true, hidden_size)?),
        };
        if let Module::QBertSelfAttention(q) = graph.module_mut(id) {
            q.quantizers = quantizers;
        }
        Ok(())
    }

    fn bind_bert_output(&mut self, graph: &mut ModuleGraph, id: NodeId, path: &str) -> Result<()> {
        let plan = SubLayer {
            name: "dense",
            weight_train: false,
            weight_from_reference: true,
            input: Input::Signed { train_flag: true },
        };
        self.bind_sublayer(graph, id, path, plan)
    }
}

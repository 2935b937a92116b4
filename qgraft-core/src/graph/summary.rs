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

//! Introspection of a rewritten or bound graph

use super::layers::{LayerShape, QConv2d, QLinear};
use super::{Module, ModuleGraph};
use crate::quant::Quantizer;
use serde::Serialize;
use std::fmt;

/// Borrowed view of a quantized conv or linear layer
#[derive(Debug, Clone, Copy)]
pub enum QuantizedLayerRef<'a> {
    Conv(&'a QConv2d),
    Linear(&'a QLinear),
}

impl<'a> QuantizedLayerRef<'a> {
    pub fn in_channels(&self) -> usize {
        match self {
            Self::Conv(q) => q.in_channels(),
            Self::Linear(q) => q.in_channels(),
        }
    }

    pub fn out_channels(&self) -> usize {
        match self {
            Self::Conv(q) => q.out_channels(),
            Self::Linear(q) => q.out_channels(),
        }
    }

    pub fn is_conv(&self) -> bool {
        matches!(self, Self::Conv(_))
    }

    pub fn weight_quantizer(&self) -> Option<&'a Quantizer> {
        match self {
            Self::Conv(q) => q.weight_quantizer.as_ref(),
            Self::Linear(q) => q.weight_quantizer.as_ref(),
        }
    }

    pub fn activation_quantizer(&self) -> Option<&'a Quantizer> {
        match self {
            Self::Conv(q) => q.activation_quantizer.as_ref(),
            Self::Linear(q) => q.activation_quantizer.as_ref(),
        }
    }
}

/// One attached quantizer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuantizerSite {
    /// Dotted path of the quantizer, e.g. `blocks.0.attn.qkv.wq`
    pub path: String,
    pub kind: String,
    pub num_channels: usize,
    pub shape: Vec<usize>,
    pub unsigned: bool,
    pub train_flag: bool,
}

impl QuantizerSite {
    fn new(path: String, q: &Quantizer) -> Self {
        Self {
            path,
            kind: q.kind.clone(),
            num_channels: q.num_channels,
            shape: q.scale.shape.clone(),
            unsigned: q.unsigned,
            train_flag: q.train_flag,
        }
    }
}

/// Counts and per-site details of a graph's quantization state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphSummary {
    pub total_modules: usize,
    pub converted_layers: usize,
    pub converted_blocks: usize,
    pub weight_quantizers: usize,
    pub activation_quantizers: usize,
    pub block_quantizers: usize,
    pub sites: Vec<QuantizerSite>,
}

impl GraphSummary {
    pub fn site(&self, path: &str) -> Option<&QuantizerSite> {
        self.sites.iter().find(|s| s.path == path)
    }
}

impl fmt::Display for GraphSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph Summary:")?;
        writeln!(f, "  Modules: {}", self.total_modules)?;
        writeln!(f, "  Quantized layers: {}", self.converted_layers)?;
        writeln!(f, "  Quantized blocks: {}", self.converted_blocks)?;
        writeln!(
            f,
            "  Quantizers: {} weight, {} activation, {} block",
            self.weight_quantizers, self.activation_quantizers, self.block_quantizers
        )
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

impl ModuleGraph {
    /// Every reachable quantized conv/linear layer with its path
    pub fn quantized_layers(&self) -> Vec<(String, QuantizedLayerRef<'_>)> {
        self.named_modules()
            .into_iter()
            .filter_map(|(path, id)| match self.module(id) {
                Module::QConv2d(q) => Some((path, QuantizedLayerRef::Conv(q))),
                Module::QLinear(q) => Some((path, QuantizedLayerRef::Linear(q))),
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self) -> GraphSummary {
        let mut summary = GraphSummary::default();

        for (path, id) in self.named_modules() {
            summary.total_modules += 1;
            let block: Vec<(&str, &Quantizer)> = match self.module(id) {
                Module::QConv2d(_) | Module::QLinear(_) => Vec::new(),
                Module::QAttention(q) => q.quantizers.iter().collect(),
                Module::QWindowAttention(q) => q.quantizers.iter().collect(),
                Module::QBertSelfAttention(q) => q.quantizers.iter().collect(),
                _ => continue,
            };

            if let Module::QConv2d(_) | Module::QLinear(_) = self.module(id) {
                summary.converted_layers += 1;
            } else {
                summary.converted_blocks += 1;
            }

            for (name, q) in block {
                summary.block_quantizers += 1;
                summary.sites.push(QuantizerSite::new(join(&path, name), q));
            }
        }

        for (path, layer) in self.quantized_layers() {
            if let Some(wq) = layer.weight_quantizer() {
                summary.weight_quantizers += 1;
                summary.sites.push(QuantizerSite::new(join(&path, "wq"), wq));
            }
            if let Some(aq) = layer.activation_quantizer() {
                summary.activation_quantizers += 1;
                summary.sites.push(QuantizerSite::new(join(&path, "aq"), aq));
            }
        }

        summary.sites.sort_by(|a, b| a.path.cmp(&b.path));
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Conv2dConfig, Linear, QAttention};
    use crate::quant::Reduction;

    #[test]
    fn test_summary_counts() {
        let mut graph = ModuleGraph::new(Module::container("Net"));
        let root = graph.root();
        let conv = Conv2dConfig::new(3, 8, (3, 3)).build().unwrap();
        let mut qconv = QConv2d::new(conv);
        let mut wq = Quantizer::new("minmax", Reduction::PerTensor, 8, false, false);
        wq.rechannel(8);
        qconv.weight_quantizer = Some(wq);
        graph.insert(root, "stem", Module::QConv2d(qconv)).unwrap();
        graph
            .insert(root, "head", Module::QLinear(QLinear::new(Linear::new(8, 4, true))))
            .unwrap();

        let mut attn = QAttention::new(8, 2, true, 0.0, 0.0);
        attn.quantizers.xq = Some(Quantizer::new("lsq", Reduction::PerTensor, 8, false, false));
        graph.insert(root, "attn", Module::QAttention(attn)).unwrap();

        let summary = graph.summary();
        assert_eq!(summary.total_modules, 4);
        assert_eq!(summary.converted_layers, 2);
        assert_eq!(summary.converted_blocks, 1);
        assert_eq!(summary.weight_quantizers, 1);
        assert_eq!(summary.activation_quantizers, 0);
        assert_eq!(summary.block_quantizers, 1);
        assert_eq!(summary.site("stem.wq").unwrap().num_channels, 8);
        assert!(summary.site("attn.xq").is_some());
        assert!(summary.to_string().contains("Quantized layers: 2"));

        let layers = graph.quantized_layers();
        assert_eq!(layers.len(), 2);
        assert!(layers[0].1.is_conv());
        assert_eq!(layers[1].1.out_channels(), 4);
    }
}

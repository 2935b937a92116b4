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

//! Composite blocks: attention, feed-forward and BERT self-attention
//!
//! Block payloads carry hyperparameters and block-level quantizers only. Their
//! learned sub-layers (`qkv`, `proj`, `fc1`, `query`, `dense`, ...) are child
//! nodes in the [`ModuleGraph`](super::ModuleGraph).

use crate::error::Result;
use crate::quant::Quantizer;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Multi-head self-attention with fused `qkv` and `proj` children
#[derive(Debug, Clone, PartialEq)]
pub struct Attention {
    pub dim: usize,
    pub num_heads: usize,
    pub qkv_bias: bool,
    pub qk_norm: bool,
    pub attn_drop: f32,
    pub proj_drop: f32,
}

impl Attention {
    pub fn head_dim(&self) -> usize {
        self.dim / self.num_heads.max(1)
    }
}

/// Windowed attention; the relative position tables are non-learned buffers
#[derive(Debug, Clone, PartialEq)]
pub struct WindowAttention {
    pub attn: Attention,
    pub window_size: (usize, usize),
    pub relative_position_bias_table: Arc<Tensor>,
    pub relative_position_index: Arc<Tensor>,
}

/// Feed-forward block: `fc1 -> act -> drop1 -> fc2 -> drop2`
#[derive(Debug, Clone, PartialEq)]
pub struct Mlp {
    pub in_features: usize,
    pub hidden_features: usize,
    pub out_features: usize,
}

/// Architecture configuration of a BERT-style model.
///
/// Keys this crate does not read are kept in `extra`, so the object passes
/// through unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BertConfig {
    pub hidden_size: usize,
    pub num_attention_heads: usize,
    #[serde(default = "default_dropout")]
    pub attention_probs_dropout_prob: f32,
    #[serde(default = "default_dropout")]
    pub hidden_dropout_prob: f32,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_dropout() -> f32 {
    0.1
}

fn default_layer_norm_eps() -> f32 {
    1e-12
}

impl BertConfig {
    pub fn new(hidden_size: usize, num_attention_heads: usize) -> Self {
        Self {
            hidden_size,
            num_attention_heads,
            attention_probs_dropout_prob: default_dropout(),
            hidden_dropout_prob: default_dropout(),
            layer_norm_eps: default_layer_norm_eps(),
            extra: BTreeMap::new(),
        }
    }

    /// Parse a Hugging Face style `config.json`
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn attention_head_size(&self) -> usize {
        self.hidden_size / self.num_attention_heads.max(1)
    }
}

/// BERT self-attention: separate `query`, `key`, `value` children
#[derive(Debug, Clone, PartialEq)]
pub struct BertSelfAttention {
    pub num_attention_heads: usize,
    pub attention_head_size: usize,
    pub all_head_size: usize,
    pub dropout: f32,
}

impl BertSelfAttention {
    pub fn from_config(config: &BertConfig) -> Self {
        let head = config.attention_head_size();
        Self {
            num_attention_heads: config.num_attention_heads,
            attention_head_size: head,
            all_head_size: head * config.num_attention_heads,
            dropout: config.attention_probs_dropout_prob,
        }
    }
}

/// BERT self-attention output: `dense -> dropout -> LayerNorm(residual)`
#[derive(Debug, Clone, PartialEq)]
pub struct BertSelfOutput {
    pub hidden_size: usize,
}

/// Inter-layer quantizers of an attention block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttentionQuantizers {
    /// Tensor entering the block
    pub xq: Option<Quantizer>,
    /// Projected q/k/v tensors
    pub qqkv: Option<Quantizer>,
    /// Tensor entering `proj`
    pub qproj: Option<Quantizer>,
}

impl AttentionQuantizers {
    pub fn is_empty(&self) -> bool {
        self.xq.is_none() && self.qqkv.is_none() && self.qproj.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Quantizer)> {
        [("xq", &self.xq), ("qqkv", &self.qqkv), ("qproj", &self.qproj)]
            .into_iter()
            .filter_map(|(name, q)| q.as_ref().map(|q| (name, q)))
    }

    pub fn for_each_mut(&mut self, f: impl FnMut(&mut Quantizer)) {
        [&mut self.xq, &mut self.qqkv, &mut self.qproj]
            .into_iter()
            .flatten()
            .for_each(f);
    }
}

/// Quantized attention shell
#[derive(Debug, Clone, PartialEq)]
pub struct QAttention {
    pub attn: Attention,
    pub quantizers: AttentionQuantizers,
}

impl QAttention {
    pub fn new(
        dim: usize,
        num_heads: usize,
        qkv_bias: bool,
        attn_drop: f32,
        proj_drop: f32,
    ) -> Self {
        Self {
            attn: Attention {
                dim,
                num_heads,
                qkv_bias,
                qk_norm: false,
                attn_drop,
                proj_drop,
            },
            quantizers: AttentionQuantizers::default(),
        }
    }
}

/// Quantized windowed-attention shell
#[derive(Debug, Clone, PartialEq)]
pub struct QWindowAttention {
    pub window: WindowAttention,
    pub quantizers: AttentionQuantizers,
}

/// Inter-layer quantizers of a BERT self-attention block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BertAttentionQuantizers {
    pub xq: Option<Quantizer>,
    pub qquery: Option<Quantizer>,
    pub qkey: Option<Quantizer>,
    pub qvalue: Option<Quantizer>,
}

impl BertAttentionQuantizers {
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Quantizer)> {
        [
            ("xq", &self.xq),
            ("qquery", &self.qquery),
            ("qkey", &self.qkey),
            ("qvalue", &self.qvalue),
        ]
        .into_iter()
        .filter_map(|(name, q)| q.as_ref().map(|q| (name, q)))
    }

    pub fn for_each_mut(&mut self, f: impl FnMut(&mut Quantizer)) {
        [&mut self.xq, &mut self.qquery, &mut self.qkey, &mut self.qvalue]
            .into_iter()
            .flatten()
            .for_each(f);
    }
}

/// Quantized BERT self-attention shell, rebuilt from the model configuration
#[derive(Debug, Clone, PartialEq)]
pub struct QBertSelfAttention {
    pub config: BertConfig,
    pub attn: BertSelfAttention,
    pub quantizers: BertAttentionQuantizers,
}

impl QBertSelfAttention {
    pub fn new(config: &BertConfig) -> Self {
        Self {
            attn: BertSelfAttention::from_config(config),
            config: config.clone(),
            quantizers: BertAttentionQuantizers::default(),
        }
    }
}

/// Non-learned activation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Gelu,
    Silu,
    Identity,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    pub p: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerNorm {
    pub normalized_shape: usize,
    pub eps: f32,
}

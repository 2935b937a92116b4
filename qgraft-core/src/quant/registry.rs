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

//! Kind identifier to quantizer constructor maps
//!
//! Two independent registries exist: one for weight quantizers and one for
//! activation quantizers. They are plain values owned by whoever binds, never
//! process-wide state.

use super::observer::Reduction;
use super::quantizer::Quantizer;
use crate::error::{QgraftError, Result};
use crate::tensor::Tensor;
use std::collections::HashMap;

/// Construction contract shared by every quantizer kind
#[derive(Debug, Clone, Copy)]
pub struct QuantizerArgs<'a> {
    pub nbit: u8,
    pub train_flag: bool,
    pub unsigned: bool,
    /// Live weight of the already-converted layer (data-dependent kinds only)
    pub weight: Option<&'a Tensor>,
}

impl<'a> QuantizerArgs<'a> {
    pub fn new(nbit: u8, train_flag: bool, unsigned: bool) -> Self {
        Self {
            nbit,
            train_flag,
            unsigned,
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: &'a Tensor) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Quantizer constructor
pub type QuantizerCtor = fn(&str, &QuantizerArgs<'_>) -> Result<Quantizer>;

#[derive(Clone, Copy)]
struct Entry {
    ctor: QuantizerCtor,
    needs_weight: bool,
}

/// Registry of quantizer kinds
#[derive(Clone)]
pub struct QuantizerRegistry {
    role: &'static str,
    entries: HashMap<String, Entry>,
}

impl QuantizerRegistry {
    fn empty(role: &'static str) -> Self {
        Self {
            role,
            entries: HashMap::new(),
        }
    }

    /// Built-in weight quantizers
    pub fn weights() -> Self {
        let mut registry = Self::empty("weight");
        registry.register("adaround", adaround, true);
        registry.register("minmax", minmax, false);
        registry.register("minmax_channel", minmax_channel_weight, false);
        registry.register("identity", identity, false);
        registry
    }

    /// Built-in activation quantizers
    pub fn activations() -> Self {
        let mut registry = Self::empty("activation");
        registry.register("minmax", minmax, false);
        registry.register("minmax_token", minmax_token, false);
        registry.register("minmax_channel", minmax_channel_act, false);
        registry.register("lsq", lsq, false);
        registry.register("lsq_token", lsq_token, false);
        registry.register("identity", identity, false);
        registry
    }

    pub fn register(&mut self, kind: &str, ctor: QuantizerCtor, needs_weight: bool) {
        self.entries
            .insert(kind.to_string(), Entry { ctor, needs_weight });
    }

    /// "weight" or "activation"
    pub fn role(&self) -> &str {
        self.role
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    fn entry(&self, kind: &str) -> Result<Entry> {
        self.entries
            .get(kind)
            .copied()
            .ok_or_else(|| QgraftError::UnknownQuantizerKind {
                kind: kind.to_string(),
                registry: self.role.to_string(),
            })
    }

    /// Fail unless `kind` is registered
    pub fn check(&self, kind: &str) -> Result<()> {
        self.entry(kind).map(|_| ())
    }

    /// Whether `kind` inspects the live weight when constructed
    pub fn needs_weight(&self, kind: &str) -> Result<bool> {
        Ok(self.entry(kind)?.needs_weight)
    }

    pub fn build(&self, kind: &str, args: &QuantizerArgs<'_>) -> Result<Quantizer> {
        let entry = self.entry(kind)?;
        if entry.needs_weight && args.weight.is_none() {
            return Err(QgraftError::MissingWeight {
                kind: kind.to_string(),
            });
        }
        (entry.ctor)(kind, args)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.entries.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for QuantizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuantizerRegistry")
            .field("role", &self.role)
            .field("kinds", &self.kinds())
            .finish()
    }
}

fn plain(kind: &str, reduction: Reduction, args: &QuantizerArgs<'_>) -> Quantizer {
    Quantizer::new(kind, reduction, args.nbit, args.train_flag, args.unsigned)
}

fn identity(kind: &str, args: &QuantizerArgs<'_>) -> Result<Quantizer> {
    let mut q = plain(kind, Reduction::PerTensor, args);
    q.passthrough = true;
    Ok(q)
}

fn minmax(kind: &str, args: &QuantizerArgs<'_>) -> Result<Quantizer> {
    Ok(plain(kind, Reduction::PerTensor, args))
}

fn minmax_token(kind: &str, args: &QuantizerArgs<'_>) -> Result<Quantizer> {
    Ok(plain(kind, Reduction::PerToken, args))
}

fn minmax_channel_weight(kind: &str, args: &QuantizerArgs<'_>) -> Result<Quantizer> {
    Ok(plain(kind, Reduction::PerChannelWeight, args))
}

fn minmax_channel_act(kind: &str, args: &QuantizerArgs<'_>) -> Result<Quantizer> {
    Ok(plain(kind, Reduction::PerChannelActivation, args))
}

fn lsq(kind: &str, args: &QuantizerArgs<'_>) -> Result<Quantizer> {
    let mut q = plain(kind, Reduction::PerTensor, args);
    q.learnable_scale = true;
    Ok(q)
}

fn lsq_token(kind: &str, args: &QuantizerArgs<'_>) -> Result<Quantizer> {
    let mut q = plain(kind, Reduction::PerToken, args);
    q.learnable_scale = true;
    Ok(q)
}

// Rectified sigmoid stretch used by AdaRound
const ADAROUND_GAMMA: f32 = -0.1;
const ADAROUND_ZETA: f32 = 1.1;

/// Range from the weight, then the soft-rounding variable that reproduces
/// the fractional part of `w / scale` at initialisation.
fn adaround(kind: &str, args: &QuantizerArgs<'_>) -> Result<Quantizer> {
    let weight = args.weight.ok_or_else(|| QgraftError::MissingWeight {
        kind: kind.to_string(),
    })?;
    let mut q = plain(kind, Reduction::PerTensor, args);

    let (lb, ub) = weight
        .data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &w| (lo.min(w), hi.max(w)));
    let (lb, ub) = if weight.data.is_empty() { (0.0, 0.0) } else { (lb, ub) };

    let (_, qmax) = q.qrange();
    let abs_max = lb.abs().max(ub.abs());
    let scale = if abs_max > f32::EPSILON { abs_max / qmax } else { 1.0 };

    let alpha = weight
        .data
        .iter()
        .map(|&w| {
            let ratio = w / scale;
            let rest = ratio - ratio.floor();
            -((ADAROUND_ZETA - ADAROUND_GAMMA) / (rest - ADAROUND_GAMMA) - 1.0).ln()
        })
        .collect();

    q.scale.data[0] = scale;
    q.observer.lb.data[0] = lb;
    q.observer.ub.data[0] = ub;
    q.soft_rounding = Some(Tensor {
        shape: weight.shape.clone(),
        data: alpha,
        device: weight.device,
    });
    Ok(q)
}

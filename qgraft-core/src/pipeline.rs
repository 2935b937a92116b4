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

//! Rewrite-then-bind driver

use crate::adapters::{
    adapter_for, Architecture, ArchitectureAdapter, BertAdapter, GenericAdapter, VitAdapter,
};
use crate::bind::QuantizerBinder;
use crate::graph::{GraphSummary, ModuleGraph};
use crate::quant::ReferenceParams;
use crate::rewrite::GraphRewriter;
use crate::{Config, Result};

/// Output of a pipeline run
#[derive(Debug, Clone)]
pub struct QuantizationResult {
    /// Rewritten and bound copy of the input model
    pub model: ModuleGraph,
    pub summary: GraphSummary,
    pub rewrite_time_ms: u64,
    pub bind_time_ms: u64,
}

/// Runs the graph rewriter and the quantizer binder as configured
pub struct QuantizationPipeline {
    config: Config,
}

impl QuantizationPipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Convert `model` and attach quantizers. `reference`, when given, feeds
    /// the identity initialisation of block-level quantizers.
    pub fn run(
        &self,
        model: &ModuleGraph,
        reference: Option<&ReferenceParams>,
    ) -> Result<QuantizationResult> {
        self.config.validate()?;
        let q = &self.config.quantization;
        let device = self.config.device()?;

        let adapter = self.adapter(model)?;
        log::info!(
            "Quantizing with the {} adapter on {}",
            adapter.name(),
            device
        );

        // Fail on unknown kinds before any graph work
        let mut binder =
            QuantizerBinder::new(adapter.as_ref(), q.wbit, q.abit, &q.weight_kind, &q.act_kind)?;
        if let Some(reference) = reference {
            binder = binder.with_reference(reference);
        }

        let start = std::time::Instant::now();
        let mut rewritten = GraphRewriter::new(adapter.as_ref()).rewrite(model)?;
        let rewrite_time_ms = start.elapsed().as_millis() as u64;

        if rewritten.device != device {
            rewritten.to_device(device);
        }

        let start = std::time::Instant::now();
        let bound = binder.bind(&rewritten)?;
        let bind_time_ms = start.elapsed().as_millis() as u64;

        let summary = bound.summary();
        log::info!("{}", summary);

        Ok(QuantizationResult {
            model: bound,
            summary,
            rewrite_time_ms,
            bind_time_ms,
        })
    }

    fn adapter(&self, model: &ModuleGraph) -> Result<Box<dyn ArchitectureAdapter>> {
        let q = &self.config.quantization;
        let Some(unsigned) = q.plain_activation_unsigned else {
            return adapter_for(q.architecture, model);
        };

        Ok(match q.architecture {
            Architecture::Generic => {
                Box::new(GenericAdapter::new().with_plain_activation_unsigned(unsigned))
            }
            Architecture::Vit => Box::new(VitAdapter::new().with_plain_activation_unsigned(unsigned)),
            Architecture::Bert => {
                Box::new(BertAdapter::from_model(model)?.with_plain_activation_unsigned(unsigned))
            }
        })
    }
}

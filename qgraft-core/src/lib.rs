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

//! Qgraft Core - post-training quantization graph surgery
//!
//! This crate rewrites trained module graphs into quantized form. It includes:
//!
//! - A module graph with duplicate-suppressing traversal and deep copy
//! - A layer converter that swaps conv, linear and attention blocks for
//!   quantized counterparts while keeping their learned parameters
//! - A quantizer binder that attaches weight, activation and inter-layer
//!   quantizers with shape-correct per-tensor, per-channel and per-token
//!   parameters
//! - Architecture adapters for plain CNNs, Vision Transformers and BERT

pub mod adapters;
pub mod bind;
pub mod config;
pub mod convert;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod quant;
pub mod rewrite;
pub mod tensor;

pub use adapters::{Architecture, ArchitectureAdapter, StructuralRole};
pub use bind::QuantizerBinder;
pub use config::Config;
pub use convert::LayerConverter;
pub use error::{QgraftError, Result};
pub use graph::{get_parent_name, GraphSummary, Module, ModuleGraph, NodeId};
pub use pipeline::{QuantizationPipeline, QuantizationResult};
pub use quant::{Quantizer, QuantizerRegistry, ReferenceParams};
pub use rewrite::GraphRewriter;
pub use tensor::{Device, Tensor};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the Qgraft core library with logging
pub fn init() -> Result<()> {
    // Try to initialize logger, but don't fail if already initialized
    let _ = env_logger::try_init();
    log::info!("Qgraft Core v{} initialized", VERSION);
    Ok(())
}

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

//! Error handling for Qgraft Core

use thiserror::Error;

/// Result type alias for Qgraft operations
pub type Result<T> = std::result::Result<T, QgraftError>;

/// Error types for graph rewriting and quantizer binding.
///
/// Every variant is fatal for the rewrite/bind call that produced it; no
/// partially converted model is ever returned.
#[derive(Error, Debug)]
pub enum QgraftError {
    #[error("Structural mismatch at '{path}': expected {expected}")]
    StructuralMismatch { path: String, expected: String },

    #[error("Missing architecture configuration for the {adapter} adapter")]
    MissingConfiguration { adapter: String },

    #[error("Unknown {registry} quantizer kind: {kind}")]
    UnknownQuantizerKind { kind: String, registry: String },

    #[error("Reference parameter not found: {path}")]
    ReferenceLookupMiss { path: String },

    #[error("Quantizer at '{path}' is already bound; refusing to reshape it twice")]
    ReshapeGuardViolation { path: String },

    #[error("Quantizer kind '{kind}' needs the layer weight at construction time")]
    MissingWeight { kind: String },

    #[error("Tensor operation error: {message}")]
    TensorError { message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QgraftError {
    pub(crate) fn mismatch(path: &str, expected: impl Into<String>) -> Self {
        QgraftError::StructuralMismatch {
            path: path.to_string(),
            expected: expected.into(),
        }
    }
}

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

//! Flat dotted-path parameter sets used as shape references

use crate::error::{QgraftError, Result};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tensors keyed by dotted path, e.g. `blocks.0.attn.xq.scale`.
///
/// Only shapes are consulted; lookups are exact matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceParams {
    tensors: HashMap<String, Tensor>,
}

impl ReferenceParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(path.into(), tensor);
    }

    pub fn get(&self, path: &str) -> Result<&Tensor> {
        self.tensors
            .get(path)
            .ok_or_else(|| QgraftError::ReferenceLookupMiss {
                path: path.to_string(),
            })
    }

    pub fn contains(&self, path: &str) -> bool {
        self.tensors.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Parse a JSON object of `{ "path": { "shape": [..], "data": [..] } }`
    pub fn from_json_str(json: &str) -> Result<Self> {
        let tensors: HashMap<String, Tensor> = serde_json::from_str(json)?;
        Ok(Self { tensors })
    }
}

impl FromIterator<(String, Tensor)> for ReferenceParams {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_lookup() {
        let mut reference = ReferenceParams::new();
        reference.insert("encoder.layer.0.attention.self.xq.scale", Tensor::ones(vec![1]));

        assert!(reference.get("encoder.layer.0.attention.self.xq.scale").is_ok());
        assert!(matches!(
            reference.get("encoder.layer.0.attention.self.xq"),
            Err(QgraftError::ReferenceLookupMiss { .. })
        ));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "fc1.aq.scale": { "shape": [1, 4], "data": [0.1, 0.2, 0.3, 0.4] },
            "fc1.aq.zero_point": { "shape": [1, 4], "data": [0, 0, 0, 0] }
        }"#;
        let reference = ReferenceParams::from_json_str(json).unwrap();
        assert_eq!(reference.len(), 2);
        assert_eq!(reference.get("fc1.aq.scale").unwrap().shape, vec![1, 4]);

        assert!(ReferenceParams::from_json_str("[1, 2]").is_err());
    }
}

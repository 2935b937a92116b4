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

//! Quantizers, their range observers and the kind registries
//!
//! The numeric strategies (min-max, LSQ, AdaRound) are opaque here: each kind
//! only decides the observer reduction and what it needs at construction time.
//! Shapes are what matter to the binder.

pub mod observer;
pub mod quantizer;
pub mod reference;
pub mod registry;

pub use observer::{Observer, Reduction};
pub use quantizer::{ParamLayout, Quantizer};
pub use reference::ReferenceParams;
pub use registry::{QuantizerArgs, QuantizerCtor, QuantizerRegistry};

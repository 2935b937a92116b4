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

//! Properties every rewrite and bind must preserve

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use qgraft_core::adapters::{GenericAdapter, VitAdapter};
    use qgraft_core::graph::{Attention, Conv2dConfig, LayerShape, Linear, Mlp};
    use qgraft_core::quant::ParamLayout;
    use qgraft_core::{
        Device, GraphRewriter, Module, ModuleGraph, QgraftError, QuantizerBinder,
        QuantizerRegistry, Tensor,
    };

    const WEIGHT_KINDS: [&str; 4] = ["minmax", "minmax_channel", "identity", "adaround"];
    const ACT_KINDS: [&str; 6] = [
        "minmax",
        "minmax_channel",
        "minmax_token",
        "lsq",
        "lsq_token",
        "identity",
    ];

    fn cnn(in_channels: usize, mid: usize, classes: usize) -> ModuleGraph {
        let mut graph = ModuleGraph::new(Module::container("Net"));
        let root = graph.root();
        let features = graph.insert(root, "features", Module::container("Sequential")).unwrap();
        let stem = Conv2dConfig::new(in_channels, mid, (3, 3))
            .padding((1, 1))
            .build()
            .unwrap();
        let body = Conv2dConfig::new(mid, mid, (1, 1)).bias(false).build().unwrap();
        graph.insert(features, "0", Module::Conv2d(stem)).unwrap();
        graph.insert(features, "1", Module::Conv2d(body)).unwrap();
        graph
            .insert(root, "classifier", Module::Linear(Linear::new(mid, classes, true)))
            .unwrap();
        graph
    }

    fn vit_block(dim: usize) -> ModuleGraph {
        let mut graph = ModuleGraph::new(Module::container("Block"));
        let root = graph.root();
        let attn = graph
            .insert(
                root,
                "attn",
                Module::Attention(Attention {
                    dim,
                    num_heads: 2,
                    qkv_bias: true,
                    qk_norm: false,
                    attn_drop: 0.0,
                    proj_drop: 0.0,
                }),
            )
            .unwrap();
        graph.insert(attn, "qkv", Module::Linear(Linear::new(dim, dim * 3, true))).unwrap();
        graph.insert(attn, "proj", Module::Linear(Linear::new(dim, dim, true))).unwrap();
        let mlp = graph
            .insert(
                root,
                "mlp",
                Module::Mlp(Mlp {
                    in_features: dim,
                    hidden_features: dim * 2,
                    out_features: dim,
                }),
            )
            .unwrap();
        graph.insert(mlp, "fc1", Module::Linear(Linear::new(dim, dim * 2, true))).unwrap();
        graph.insert(mlp, "fc2", Module::Linear(Linear::new(dim * 2, dim, true))).unwrap();
        graph
    }

    #[test]
    fn test_input_model_is_never_mutated() {
        let model = vit_block(16);
        let before = model.clone();

        let adapter = VitAdapter::new();
        let rewritten = GraphRewriter::new(&adapter).rewrite(&model).unwrap();
        let binder = QuantizerBinder::new(&adapter, 8, 8, "adaround", "lsq").unwrap();
        let bound = binder.bind(&rewritten).unwrap();

        assert_eq!(model, before);
        // The rewritten graph is itself an input to bind
        let rewritten_again = GraphRewriter::new(&adapter).rewrite(&model).unwrap();
        assert_eq!(rewritten, rewritten_again);
        assert_ne!(bound, rewritten);
    }

    #[test]
    fn test_converted_layers_match_original_outputs() {
        let model = cnn(4, 6, 5);
        let adapter = GenericAdapter::new();
        let rewritten = GraphRewriter::new(&adapter).rewrite(&model).unwrap();

        let image = Tensor::uniform(vec![1, 4, 5, 5], 1.0);
        let features = Tensor::uniform(vec![2, 6], 1.0);

        for (path, id) in model.named_modules() {
            let new_id = rewritten.resolve(&path).unwrap();
            let (expected, actual) = match (model.module(id), rewritten.module(new_id)) {
                (Module::Conv2d(conv), Module::QConv2d(q)) => {
                    assert!(!q.is_bound());
                    let input = if conv.in_channels() == 4 {
                        image.clone()
                    } else {
                        Tensor::uniform(vec![1, 6, 5, 5], 1.0)
                    };
                    (conv.forward(&input).unwrap(), q.forward(&input).unwrap())
                }
                (Module::Linear(linear), Module::QLinear(q)) => {
                    (linear.forward(&features).unwrap(), q.forward(&features).unwrap())
                }
                _ => continue,
            };

            assert_eq!(expected, actual, "{}", path);
        }
    }

    #[test]
    fn test_every_registered_kind_binds() {
        let weights = QuantizerRegistry::weights();
        let activations = QuantizerRegistry::activations();
        for kind in WEIGHT_KINDS {
            assert!(weights.contains(kind), "missing weight kind {}", kind);
        }
        for kind in ACT_KINDS {
            assert!(activations.contains(kind), "missing activation kind {}", kind);
        }

        let model = cnn(8, 4, 3);
        let adapter = GenericAdapter::new();
        let rewritten = GraphRewriter::new(&adapter).rewrite(&model).unwrap();
        for wk in weights.kinds() {
            for ak in activations.kinds() {
                let binder = QuantizerBinder::new(&adapter, 4, 8, wk, ak).unwrap();
                let summary = binder.bind(&rewritten).unwrap().summary();
                assert_eq!(summary.weight_quantizers, 3, "{}/{}", wk, ak);
                assert_eq!(summary.activation_quantizers, 3, "{}/{}", wk, ak);
            }
        }
    }

    #[test]
    fn test_weight_only_kinds_rejected_as_activations() {
        let adapter = GenericAdapter::new();
        for kind in ["adaround", "lsq_plus", ""] {
            assert!(matches!(
                QuantizerBinder::new(&adapter, 8, 8, "minmax", kind),
                Err(QgraftError::UnknownQuantizerKind { .. })
            ));
        }
    }

    #[test]
    fn test_second_bind_is_rejected() {
        let adapter = GenericAdapter::new();
        let rewritten = GraphRewriter::new(&adapter).rewrite(&cnn(8, 4, 3)).unwrap();
        let binder = QuantizerBinder::new(&adapter, 8, 8, "minmax_channel", "lsq").unwrap();
        let bound = binder.bind(&rewritten).unwrap();

        let err = binder.bind(&bound).unwrap_err();
        assert!(matches!(err, QgraftError::ReshapeGuardViolation { .. }));

        // The failed attempt leaves the bound graph as it was
        let stem = bound.resolve("features.0").unwrap();
        match bound.module(stem) {
            Module::QConv2d(q) => {
                let wq = q.weight_quantizer.as_ref().unwrap();
                assert_eq!(wq.layout(), ParamLayout::ConvBroadcast);
                assert_eq!(wq.scale.rank(), 4);
            }
            other => panic!("unexpected module {}", other.type_name()),
        }

        let vit = VitAdapter::new();
        let rewritten = GraphRewriter::new(&vit).rewrite(&vit_block(8)).unwrap();
        let binder = QuantizerBinder::new(&vit, 8, 8, "minmax", "minmax").unwrap();
        let bound = binder.bind(&rewritten).unwrap();
        match binder.bind(&bound).unwrap_err() {
            QgraftError::ReshapeGuardViolation { path } => assert_eq!(path, "attn.xq"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_quantizers_follow_model_device() {
        let mut model = vit_block(8);
        model.to_device(Device::Cuda(0));

        let adapter = VitAdapter::new();
        let rewritten = GraphRewriter::new(&adapter).rewrite(&model).unwrap();
        assert_eq!(rewritten.device, Device::Cuda(0));

        let binder = QuantizerBinder::new(&adapter, 8, 8, "adaround", "lsq_token").unwrap();
        let bound = binder.bind(&rewritten).unwrap();
        let devices = bound.devices();
        assert_eq!(devices.len(), 1);
        assert!(devices.contains(&Device::Cuda(0)));
    }

    fn bound_cnn(
        conv_in: usize,
        conv_out: usize,
        fc_out: usize,
        weight_kind: &str,
        act_kind: &str,
    ) -> ModuleGraph {
        let mut model = ModuleGraph::new(Module::container("Net"));
        let root = model.root();
        let conv = Conv2dConfig::new(conv_in, conv_out, (1, 1)).build().unwrap();
        model.insert(root, "conv", Module::Conv2d(conv)).unwrap();
        model
            .insert(root, "fc", Module::Linear(Linear::new(conv_out, fc_out, true)))
            .unwrap();

        let adapter = GenericAdapter::new();
        let rewritten = GraphRewriter::new(&adapter).rewrite(&model).unwrap();
        QuantizerBinder::new(&adapter, 8, 8, weight_kind, act_kind)
            .unwrap()
            .bind(&rewritten)
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_quantizer_shapes_match_layers(
            conv_in in 1usize..12,
            conv_out in 1usize..12,
            fc_out in 1usize..12,
            weight_kind in prop::sample::select(WEIGHT_KINDS.to_vec()),
            act_kind in prop::sample::select(ACT_KINDS.to_vec()),
        ) {
            let bound = bound_cnn(conv_in, conv_out, fc_out, weight_kind, act_kind);
            let layers = bound.quantized_layers();
            prop_assert_eq!(layers.len(), 2);

            for (path, layer) in layers {
                let wq = layer.weight_quantizer().unwrap();
                prop_assert_eq!(wq.num_channels, layer.out_channels());
                prop_assert_eq!(wq.observer.num_channels, wq.num_channels);
                prop_assert_eq!(&wq.scale.shape, &wq.zero_point.shape);
                if layer.is_conv() && wq.reduction().is_channel_wise() {
                    prop_assert_eq!(wq.scale.rank(), 4);
                }

                let stem = layer.is_conv() && layer.in_channels() == 3;
                match layer.activation_quantizer() {
                    None => prop_assert!(stem, "{} lost its activation quantizer", path),
                    Some(aq) => {
                        prop_assert!(!stem);
                        prop_assert_eq!(aq.num_channels, layer.in_channels());
                        prop_assert_eq!(aq.observer.num_channels, aq.num_channels);
                        if layer.is_conv() && aq.reduction().is_channel_wise() {
                            prop_assert_eq!(aq.scale.rank(), 4);
                        }
                    }
                }
            }
        }
    }
}

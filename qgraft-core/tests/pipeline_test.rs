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

//! Config-driven pipeline runs

#[cfg(test)]
mod tests {
    use qgraft_core::graph::{
        BertConfig, BertSelfAttention, BertSelfOutput, Conv2dConfig, Dropout, Linear,
    };
    use qgraft_core::{
        Architecture, Config, Device, Module, ModuleGraph, QgraftError, QuantizationPipeline,
        ReferenceParams,
    };
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn resnet_like() -> ModuleGraph {
        let mut graph = ModuleGraph::new(Module::container("ResNet"));
        let root = graph.root();
        let conv1 = Conv2dConfig::new(3, 8, (7, 7))
            .stride((2, 2))
            .padding((3, 3))
            .bias(false)
            .build()
            .unwrap();
        graph.insert(root, "conv1", Module::Conv2d(conv1)).unwrap();

        let layer1 = graph.insert(root, "layer1", Module::container("Sequential")).unwrap();
        let block = graph.insert(layer1, "0", Module::container("BasicBlock")).unwrap();
        for name in ["conv1", "conv2"] {
            let conv = Conv2dConfig::new(8, 8, (3, 3))
                .padding((1, 1))
                .bias(false)
                .build()
                .unwrap();
            graph.insert(block, name, Module::Conv2d(conv)).unwrap();
        }
        graph.insert(root, "fc", Module::Linear(Linear::new(8, 10, true))).unwrap();
        graph
    }

    fn bert_model(hidden: usize) -> ModuleGraph {
        let config = BertConfig::new(hidden, 2);
        let mut graph = ModuleGraph::new(Module::container("BertModel")).with_config(config.clone());
        let root = graph.root();
        let attention = graph.insert(root, "attention", Module::container("BertAttention")).unwrap();
        let self_attn = graph
            .insert(
                attention,
                "self",
                Module::BertSelfAttention(BertSelfAttention::from_config(&config)),
            )
            .unwrap();
        for name in ["query", "key", "value"] {
            graph
                .insert(self_attn, name, Module::Linear(Linear::new(hidden, hidden, true)))
                .unwrap();
        }
        graph
            .insert(self_attn, "dropout", Module::Dropout(Dropout { p: 0.1 }))
            .unwrap();
        let output = graph
            .insert(
                attention,
                "output",
                Module::BertSelfOutput(BertSelfOutput {
                    hidden_size: hidden,
                }),
            )
            .unwrap();
        graph
            .insert(output, "dense", Module::Linear(Linear::new(hidden, hidden, true)))
            .unwrap();
        graph
    }

    #[test]
    fn test_pipeline_from_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[quantization]
wbit = 4
abit = 8
weight_kind = "minmax_channel"
act_kind = "lsq"
architecture = "generic"

[placement]
device = "cuda"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.device().unwrap(), Device::Cuda(0));

        let model = resnet_like();
        let result = QuantizationPipeline::new(config).run(&model, None).unwrap();
        let summary = &result.summary;

        assert_eq!(summary.converted_layers, 4);
        assert_eq!(summary.weight_quantizers, 4);
        assert_eq!(summary.activation_quantizers, 3);
        assert!(summary.site("conv1.aq").is_none());
        assert_eq!(summary.site("layer1.0.conv2.wq").unwrap().shape, vec![8, 1, 1, 1]);
        assert_eq!(summary.site("fc.wq").unwrap().shape, vec![10, 1]);
        assert!(summary.site("fc.aq").unwrap().unsigned);

        assert_eq!(result.model.device, Device::Cuda(0));
        assert!(model.devices().contains(&Device::Cpu));
        assert!(format!("{}", summary).contains("Quantized layers: 4"));
    }

    #[test]
    fn test_saved_config_drives_same_result() {
        let mut config = Config::preset("vit").unwrap();
        config.quantization.wbit = 6;
        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.quantization.architecture, Architecture::Vit);

        let model = resnet_like();
        let a = QuantizationPipeline::new(config).run(&model, None).unwrap();
        let b = QuantizationPipeline::new(loaded).run(&model, None).unwrap();
        assert_eq!(a.model, b.model);
        assert_eq!(a.summary, b.summary);
    }

    #[test]
    fn test_bert_preset_with_reference_json() {
        let hidden = 8;
        let model = bert_model(hidden);

        let mut entries = serde_json::Map::new();
        let mut add = |path: &str, shape: Vec<usize>| {
            let numel: usize = shape.iter().product();
            for suffix in ["scale", "zero_point", "observer.lb", "observer.ub"] {
                entries.insert(
                    format!("{}.{}", path, suffix),
                    serde_json::json!({ "shape": shape, "data": vec![0.5f32; numel] }),
                );
            }
        };
        for name in ["query", "key", "value"] {
            add(&format!("attention.self.{}.wq", name), vec![hidden, 1]);
        }
        for name in ["xq", "qquery", "qkey", "qvalue"] {
            add(&format!("attention.self.{}", name), vec![1]);
        }
        add("attention.output.dense.wq", vec![hidden, 1]);
        add("attention.output.dense.aq", vec![1]);
        let json = serde_json::Value::Object(entries).to_string();
        let reference = ReferenceParams::from_json_str(&json).unwrap();

        let pipeline = QuantizationPipeline::new(Config::preset("bert").unwrap());
        let result = pipeline.run(&model, Some(&reference)).unwrap();
        let summary = &result.summary;

        assert_eq!(summary.block_quantizers, 4);
        assert_eq!(summary.site("attention.output.dense.wq").unwrap().kind, "adaround");
        assert!(!summary.site("attention.output.dense.wq").unwrap().train_flag);
        assert!(summary.site("attention.self.value.wq").unwrap().train_flag);
        assert_eq!(summary.site("attention.self.qvalue").unwrap().shape, vec![1]);
    }

    #[test]
    fn test_invalid_config_fails_before_graph_work() {
        let mut config = Config::default();
        config.quantization.weight_kind = "lsq".to_string();
        let err = QuantizationPipeline::new(config).run(&resnet_like(), None).unwrap_err();
        match err {
            QgraftError::UnknownQuantizerKind { kind, registry } => {
                assert_eq!(kind, "lsq");
                assert_eq!(registry, "weight");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

// Frozen base model (Candle) behind the Backbone seam

use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use candle_transformers::models::qwen2;

use super::common::DevicePolicy;
use super::download::ModelFiles;

/// Frozen causal LM split at the output projection so an adapter can sit on top.
pub trait Backbone {
    /// Final-layer hidden states `[seq, hidden]` (f32) for `input_ids`,
    /// continuing a cached sequence at `seqlen_offset`.
    fn forward_hidden(&mut self, input_ids: &[u32], seqlen_offset: usize) -> Result<Tensor>;

    /// Frozen output projection, `[n, hidden]` → `[n, vocab]` (f32).
    fn base_logits(&self, hidden: &Tensor) -> Result<Tensor>;

    /// Drop any key/value cache from a previous sequence.
    fn clear_cache(&mut self);

    fn hidden_size(&self) -> usize;

    fn vocab_size(&self) -> usize;

    fn device(&self) -> &Device;
}

/// Qwen2-family checkpoint loaded with Candle
pub struct BaseModel {
    model_id: String,
    model: qwen2::Model,
    lm_head: Linear,
    hidden_size: usize,
    vocab_size: usize,
    policy: DevicePolicy,
}

impl std::fmt::Debug for BaseModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseModel")
            .field("model_id", &self.model_id)
            .field("hidden_size", &self.hidden_size)
            .field("vocab_size", &self.vocab_size)
            .field("policy", &self.policy)
            .finish()
    }
}

impl BaseModel {
    /// Build the model from downloaded files with the given precision/device.
    pub fn load(files: &ModelFiles, policy: &DevicePolicy) -> Result<Self> {
        tracing::info!("Loading {} with Candle ({:?})", files.model_id, policy.dtype);

        let config_str = std::fs::read_to_string(&files.config)
            .with_context(|| format!("Failed to read {}", files.config.display()))?;
        let config: qwen2::Config =
            serde_json::from_str(&config_str).context("Failed to parse config.json")?;

        // Safety: weights are memory-mapped read-only and must not change while loaded
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&files.weights, policy.dtype, &policy.device)
                .context("Failed to load model weights")?
        };

        let model =
            qwen2::Model::new(&config, vb.clone()).context("Failed to build Qwen model")?;

        // Small Qwen checkpoints tie the output projection to the embeddings
        let shape = (config.vocab_size, config.hidden_size);
        let lm_head_weight = vb
            .get(shape, "lm_head.weight")
            .or_else(|_| vb.get(shape, "model.embed_tokens.weight"))
            .context("Failed to load output projection")?;

        Ok(Self {
            model_id: files.model_id.clone(),
            model,
            lm_head: Linear::new(lm_head_weight, None),
            hidden_size: config.hidden_size,
            vocab_size: config.vocab_size,
            policy: policy.clone(),
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl Backbone for BaseModel {
    fn forward_hidden(&mut self, input_ids: &[u32], seqlen_offset: usize) -> Result<Tensor> {
        let input = Tensor::new(input_ids, &self.policy.device)?.unsqueeze(0)?;
        let hidden = self
            .model
            .forward(&input, seqlen_offset, None)
            .context("Base model forward pass failed")?;
        Ok(hidden.squeeze(0)?.to_dtype(DType::F32)?)
    }

    fn base_logits(&self, hidden: &Tensor) -> Result<Tensor> {
        let hidden = hidden.to_dtype(self.policy.dtype)?;
        Ok(self.lm_head.forward(&hidden)?.to_dtype(DType::F32)?)
    }

    fn clear_cache(&mut self) {
        self.model.clear_kv_cache();
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn device(&self) -> &Device {
        &self.policy.device
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Context-free toy model: hidden state is a per-token embedding.
    pub struct TinyBackbone {
        embeddings: Tensor,
        lm_head: Linear,
        device: Device,
    }

    impl TinyBackbone {
        pub fn new(vocab_size: usize, hidden_size: usize) -> Result<Self> {
            let device = Device::Cpu;
            let embeddings = Tensor::randn(0f32, 1f32, (vocab_size, hidden_size), &device)?;
            let head = Tensor::randn(0f32, 0.1f32, (vocab_size, hidden_size), &device)?;
            Ok(Self {
                embeddings,
                lm_head: Linear::new(head, None),
                device,
            })
        }
    }

    impl Backbone for TinyBackbone {
        fn forward_hidden(&mut self, input_ids: &[u32], _seqlen_offset: usize) -> Result<Tensor> {
            let ids = Tensor::new(input_ids, &self.device)?;
            Ok(self.embeddings.index_select(&ids, 0)?)
        }

        fn base_logits(&self, hidden: &Tensor) -> Result<Tensor> {
            Ok(self.lm_head.forward(hidden)?)
        }

        fn clear_cache(&mut self) {}

        fn hidden_size(&self) -> usize {
            self.embeddings.dims()[1]
        }

        fn vocab_size(&self) -> usize {
            self.embeddings.dims()[0]
        }

        fn device(&self) -> &Device {
            &self.device
        }
    }

    #[test]
    fn test_tiny_backbone_shapes() -> Result<()> {
        let mut backbone = TinyBackbone::new(16, 4)?;
        let hidden = backbone.forward_hidden(&[1, 2, 3], 0)?;
        assert_eq!(hidden.dims(), &[3, 4]);
        assert_eq!(backbone.base_logits(&hidden)?.dims(), &[3, 16]);
        Ok(())
    }
}

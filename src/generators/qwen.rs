// Qwen + LoRA question generator

use anyhow::{Context, Result};
use candle_transformers::generation::LogitsProcessor;
use std::path::Path;
use tokenizers::Tokenizer;

use crate::config::constants::TOKENIZER_FILE;
use crate::config::Config;
use crate::corpus::Message;
use crate::models::{
    detect_base_model, Backbone, BaseModel, DevicePolicy, LoRAAdapter, ModelDownloader,
};

use super::{with_system_prompt, ChatTemplate, QuestionGenerator, SamplingParams};

/// Tokens that end a generated turn.
const STOP_TOKENS: &[&str] = &["<|im_end|>", "<|endoftext|>"];

/// Base model with a trained adapter, ready to ask follow-up questions
pub struct FollowUpModel<B: Backbone = BaseModel> {
    name: String,
    backbone: B,
    adapter: LoRAAdapter,
    tokenizer: Tokenizer,
    template: ChatTemplate,
    stop_ids: Vec<u32>,
}

impl FollowUpModel<BaseModel> {
    /// Load the adapter in `adapter_dir` on top of the base model it was trained on.
    pub fn open(adapter_dir: &Path, config: &Config, policy: &DevicePolicy) -> Result<Self> {
        if !adapter_dir.is_dir() {
            anyhow::bail!("Adapter directory not found: {}", adapter_dir.display());
        }

        let base_model = detect_base_model(adapter_dir, config.default_base_model());
        tracing::info!("Base model: {}", base_model);

        let files = ModelDownloader::new()?.fetch(&base_model)?;
        let backbone = BaseModel::load(&files, policy)?;
        let adapter = LoRAAdapter::load(adapter_dir, policy.device.clone())?;

        let shape = adapter.config();
        if shape.in_features != backbone.hidden_size() || shape.out_features != backbone.vocab_size() {
            anyhow::bail!(
                "Adapter shape {}x{} does not match {} ({}x{})",
                shape.in_features,
                shape.out_features,
                base_model,
                backbone.hidden_size(),
                backbone.vocab_size()
            );
        }

        // Prefer the tokenizer saved alongside the adapter
        let local_tokenizer = adapter_dir.join(TOKENIZER_FILE);
        let tokenizer_path = if local_tokenizer.exists() {
            local_tokenizer
        } else {
            files.tokenizer.clone()
        };
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer {}: {}", tokenizer_path.display(), e))?;

        Ok(Self::new(base_model, backbone, adapter, tokenizer))
    }
}

impl<B: Backbone> FollowUpModel<B> {
    pub fn new(name: impl Into<String>, backbone: B, adapter: LoRAAdapter, tokenizer: Tokenizer) -> Self {
        let template = ChatTemplate::detect(&tokenizer);
        let stop_ids = STOP_TOKENS
            .iter()
            .filter_map(|t| tokenizer.token_to_id(t))
            .collect();

        Self {
            name: name.into(),
            backbone,
            adapter,
            tokenizer,
            template,
            stop_ids,
        }
    }

    /// Raw continuation of the dialogue as the assistant, special tokens removed.
    pub fn generate_raw(&mut self, history: &[Message], params: &SamplingParams) -> Result<String> {
        let prompt = self.template.render(&with_system_prompt(history), true);
        let encoding = self
            .tokenizer
            .encode(prompt.as_str(), false)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let new_ids = generate_ids(
            &mut self.backbone,
            &self.adapter,
            encoding.get_ids(),
            params,
            &self.stop_ids,
        )?;

        self.tokenizer
            .decode(&new_ids, true)
            .map_err(|e| anyhow::anyhow!("Decoding failed: {}", e))
    }

    pub fn template(&self) -> ChatTemplate {
        self.template
    }
}

impl<B: Backbone> QuestionGenerator for FollowUpModel<B> {
    fn generate(&mut self, history: &[Message], params: &SamplingParams) -> Result<String> {
        self.generate_raw(history, params)
            .with_context(|| format!("Generation with {} failed", self.name))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Sample up to `max_new_tokens` ids after `prompt_ids`, stopping early on
/// any of `stop_ids` (which is not included in the result).
pub fn generate_ids<B: Backbone + ?Sized>(
    backbone: &mut B,
    adapter: &LoRAAdapter,
    prompt_ids: &[u32],
    params: &SamplingParams,
    stop_ids: &[u32],
) -> Result<Vec<u32>> {
    if prompt_ids.is_empty() {
        anyhow::bail!("Empty prompt");
    }

    let mut processor =
        LogitsProcessor::new(params.seed, Some(params.temperature), Some(params.top_p));
    let mut generated = Vec::with_capacity(params.max_new_tokens);
    let mut input = prompt_ids.to_vec();
    let mut offset = 0;

    backbone.clear_cache();
    for _ in 0..params.max_new_tokens {
        let hidden = backbone.forward_hidden(&input, offset)?;
        offset += input.len();

        let last = hidden.narrow(0, hidden.dim(0)? - 1, 1)?;
        let base_logits = backbone.base_logits(&last)?;
        let logits = adapter.apply(&last, &base_logits, false)?.squeeze(0)?;

        let token = processor.sample(&logits)?;
        if stop_ids.contains(&token) {
            break;
        }
        generated.push(token);
        input = vec![token];
    }

    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoraConfig;
    use crate::models::base::testing::TinyBackbone;
    use crate::models::AdapterConfig;
    use candle_core::Device;

    fn greedy(max_new_tokens: usize) -> SamplingParams {
        SamplingParams {
            temperature: 0.0,
            max_new_tokens,
            ..Default::default()
        }
    }

    #[test]
    fn test_generate_respects_token_budget() -> Result<()> {
        let mut backbone = TinyBackbone::new(32, 8)?;
        let adapter = LoRAAdapter::new(AdapterConfig::new(LoraConfig::default(), 8, 32), Device::Cpu)?;

        let ids = generate_ids(&mut backbone, &adapter, &[1, 2, 3], &greedy(5), &[])?;
        assert_eq!(ids.len(), 5);
        assert!(ids.iter().all(|&t| t < 32));

        // Greedy decoding is deterministic
        let again = generate_ids(&mut backbone, &adapter, &[1, 2, 3], &greedy(5), &[])?;
        assert_eq!(ids, again);
        Ok(())
    }

    #[test]
    fn test_generate_stops_on_stop_token() -> Result<()> {
        let mut backbone = TinyBackbone::new(32, 8)?;
        let adapter = LoRAAdapter::new(AdapterConfig::new(LoraConfig::default(), 8, 32), Device::Cpu)?;

        let first = generate_ids(&mut backbone, &adapter, &[4], &greedy(1), &[])?;
        let stopped = generate_ids(&mut backbone, &adapter, &[4], &greedy(8), &first)?;
        assert!(stopped.is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_prompt_is_rejected() -> Result<()> {
        let mut backbone = TinyBackbone::new(8, 4)?;
        let adapter = LoRAAdapter::new(AdapterConfig::new(LoraConfig::default(), 4, 8), Device::Cpu)?;
        assert!(generate_ids(&mut backbone, &adapter, &[], &greedy(4), &[]).is_err());
        Ok(())
    }
}

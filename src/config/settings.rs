// Configuration structs

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::constants::DEFAULT_BASE_MODELS;

/// Where models run. Probed once at startup, see `models::DevicePolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTarget {
    /// Best available accelerator, CPU otherwise
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl ExecutionTarget {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionTarget::Auto => "auto",
            ExecutionTarget::Cpu => "cpu",
            ExecutionTarget::Cuda => "cuda",
            ExecutionTarget::Metal => "metal",
        }
    }
}

/// Corpus construction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Trailing context messages kept per example (0 = keep everything)
    pub max_history_messages: usize,
    /// Stop emitting examples for a conversation after this many (0 = no cap)
    pub max_examples_per_conversation: usize,
    /// Minimum stripped length of a doctor utterance to be a target
    pub min_question_len: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            max_history_messages: 8,
            max_examples_per_conversation: 40,
            min_question_len: 3,
        }
    }
}

/// Trainer hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    /// Examples per micro-batch
    pub batch_size: usize,
    /// Micro-batches per optimizer step
    pub grad_accum: usize,
    pub learning_rate: f64,
    /// Prompt + target token budget per example
    pub max_seq_len: usize,
    /// Optimizer steps between log records
    pub logging_steps: usize,
    pub seed: u64,
    /// Fraction of examples used for training, the rest is eval
    pub train_split: f64,
    /// Raise the sequence and batch budgets when an accelerator is present
    pub auto_tune: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 2,
            batch_size: 1,
            grad_accum: 16,
            learning_rate: 1e-4,
            max_seq_len: 768,
            logging_steps: 50,
            seed: 42,
            train_split: 0.95,
            auto_tune: true,
        }
    }
}

impl TrainingConfig {
    /// Friendlier budgets for GPU runs (still small models).
    pub fn tuned_for_accelerator(mut self) -> Self {
        if self.auto_tune {
            self.max_seq_len = 1024;
            self.batch_size = 2;
            self.grad_accum = 8;
        }
        self
    }

    /// Examples consumed per optimizer step.
    pub fn effective_batch(&self) -> usize {
        self.batch_size.max(1) * self.grad_accum.max(1)
    }
}

/// LoRA adapter shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    pub rank: usize,
    pub alpha: f64,
    pub dropout: f32,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            rank: 8,
            alpha: 16.0,
            dropout: 0.05,
        }
    }
}

impl LoraConfig {
    pub fn scaling(&self) -> f64 {
        self.alpha / self.rank as f64
    }
}

/// Inference and sampling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    /// Used by single-shot generation (smoke test)
    pub temperature: f64,
    pub top_p: f64,
    /// Distinct questions per patient turn
    pub max_questions: usize,
    /// Generation attempts per patient turn
    pub max_attempts: usize,
    /// Jitter range for temperature, `[low, high)`
    pub temperature_range: [f64; 2],
    /// Jitter range for the nucleus threshold, `[low, high)`
    pub top_p_range: [f64; 2],
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 32,
            temperature: 0.8,
            top_p: 0.9,
            max_questions: 2,
            max_attempts: 6,
            temperature_range: [0.7, 0.9],
            top_p_range: [0.85, 0.95],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Candidate base models in priority order
    pub base_models: Vec<String>,

    /// Device selection
    pub device: ExecutionTarget,

    pub corpus: CorpusConfig,
    pub training: TrainingConfig,
    pub lora: LoraConfig,
    pub generation: GenerationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_models: DEFAULT_BASE_MODELS.iter().map(|m| m.to_string()).collect(),
            device: ExecutionTarget::Auto,
            corpus: CorpusConfig::default(),
            training: TrainingConfig::default(),
            lora: LoraConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Config {
    /// First candidate base model, used when adapter metadata is missing.
    pub fn default_base_model(&self) -> &str {
        self.base_models
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_BASE_MODELS[0])
    }

    /// Validate configuration and return helpful errors
    pub fn validate(&self) -> Result<()> {
        if self.base_models.iter().all(|m| m.trim().is_empty()) {
            bail!("base_models must list at least one model id");
        }
        if self.lora.rank == 0 {
            bail!("lora.rank must be greater than zero");
        }
        if !(0.0..1.0).contains(&self.lora.dropout) {
            bail!("lora.dropout must be in [0, 1), got {}", self.lora.dropout);
        }
        if self.training.learning_rate <= 0.0 {
            bail!(
                "training.learning_rate must be positive, got {}",
                self.training.learning_rate
            );
        }
        if !(self.training.train_split > 0.0 && self.training.train_split <= 1.0) {
            bail!(
                "training.train_split must be in (0, 1], got {}",
                self.training.train_split
            );
        }
        if self.training.max_seq_len < 8 {
            bail!("training.max_seq_len is too small: {}", self.training.max_seq_len);
        }

        let gen = &self.generation;
        for (name, [low, high]) in [
            ("temperature_range", gen.temperature_range),
            ("top_p_range", gen.top_p_range),
        ] {
            if !(low > 0.0 && low <= high) {
                bail!("generation.{} must satisfy 0 < low <= high, got [{}, {}]", name, low, high);
            }
        }
        if gen.max_new_tokens == 0 {
            bail!("generation.max_new_tokens must be greater than zero");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.corpus.max_history_messages, 8);
        assert_eq!(config.corpus.max_examples_per_conversation, 40);
        assert_eq!(config.generation.max_attempts, 6);
        assert_eq!(config.default_base_model(), "Qwen/Qwen2.5-0.5B-Instruct");
    }

    #[test]
    fn test_accelerator_tuning() {
        let tuned = TrainingConfig::default().tuned_for_accelerator();
        assert_eq!(tuned.max_seq_len, 1024);
        assert_eq!(tuned.batch_size, 2);
        assert_eq!(tuned.grad_accum, 8);
        assert_eq!(tuned.effective_batch(), 16);

        let fixed = TrainingConfig {
            auto_tune: false,
            ..Default::default()
        }
        .tuned_for_accelerator();
        assert_eq!(fixed.max_seq_len, 768);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.base_models.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.lora.rank = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.training.train_split = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.generation.top_p_range = [0.95, 0.85];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lora_scaling() {
        assert_eq!(LoraConfig::default().scaling(), 2.0);
    }
}

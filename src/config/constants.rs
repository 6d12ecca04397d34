// Project-wide constants
//
// Centralised here so prompt text and other magic values have one
// source of truth. Import via `use crate::config::constants::*;`.

/// System prompt prepended to every training example and inference prompt.
pub const SYSTEM_PROMPT: &str = "You are a clinical assistant. Output ONLY the next, single best \
follow-up question to the patient. Keep it concise (max 20 words). Do not provide diagnoses, \
reassurance, or instructions; ask a question. End the sentence with a question mark.";

/// Hard cap on words in a sanitized question.
pub const MAX_QUESTION_WORDS: usize = 20;

/// Candidate base models in priority order (small models only).
pub const DEFAULT_BASE_MODELS: &[&str] = &["Qwen/Qwen2.5-0.5B-Instruct", "Qwen/Qwen2.5-1.5B-Instruct"];

/// Metadata file written next to the adapter weights.
pub const ADAPTER_META_FILE: &str = "adapter_meta.json";

/// LoRA weights inside the adapter directory.
pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";

/// LoRA hyperparameters inside the adapter directory.
pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";

/// Log history of the training run.
pub const TRAINER_STATE_FILE: &str = "trainer_state.json";

/// Intermediate SFT corpus written by the training runner.
pub const TRAIN_JSONL_FILE: &str = "train.jsonl";

/// Default adapter output directory.
pub const DEFAULT_ADAPTER_DIR: &str = "followup-lora";

/// Patient line used for the post-training sanity generation.
pub const SMOKE_TEST_UTTERANCE: &str = "I've had a dull headache for 3 days and mild fever.";

/// Tokenizer saved next to the adapter (and shipped with base models).
pub const TOKENIZER_FILE: &str = "tokenizer.json";

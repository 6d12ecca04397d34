// Question generation interface
//
// Backends produce raw continuations; callers sanitize them into a single
// question and use the sampler for several distinct candidates.

use anyhow::Result;

use crate::config::GenerationConfig;
use crate::corpus::Message;

pub mod prompt;
pub mod qwen;
pub mod sampling;
pub mod sanitize;

pub use prompt::{with_system_prompt, ChatTemplate};
pub use qwen::FollowUpModel;
pub use sampling::DistinctQuestionSampler;
pub use sanitize::sanitize_question;

/// Decoding parameters for one generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    /// Nucleus threshold
    pub top_p: f64,
    pub max_new_tokens: usize,
    pub seed: u64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.9,
            max_new_tokens: 32,
            seed: 42,
        }
    }
}

impl SamplingParams {
    /// Fixed (unjittered) parameters from the generation settings.
    pub fn from_config(config: &GenerationConfig, seed: u64) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_new_tokens: config.max_new_tokens,
            seed,
        }
    }
}

/// Anything that continues a dialogue with a doctor turn.
pub trait QuestionGenerator {
    /// Generate a raw continuation for `history` (system prompt is added by the backend).
    fn generate(&mut self, history: &[Message], params: &SamplingParams) -> Result<String>;

    /// Get generator name for logging
    fn name(&self) -> &str;
}

/// Generate once and sanitize the result.
pub fn generate_question<G: QuestionGenerator + ?Sized>(
    generator: &mut G,
    history: &[Message],
    params: &SamplingParams,
) -> Result<String> {
    let raw = generator.generate(history, params)?;
    let question = sanitize_question(&raw);
    tracing::debug!(generator = generator.name(), raw = %raw, question = %question, "Generated question");
    Ok(question)
}

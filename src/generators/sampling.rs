// Distinct-question sampler
// Re-samples with jittered temperature / top-p until enough distinct questions appear

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::GenerationConfig;
use crate::corpus::Message;

use super::{generate_question, QuestionGenerator, SamplingParams};

/// Sampler that collects up to `max_questions` distinct sanitized questions
pub struct DistinctQuestionSampler<R: Rng = StdRng> {
    config: GenerationConfig,
    rng: R,
}

impl DistinctQuestionSampler<StdRng> {
    /// Create new sampler seeded from OS entropy
    pub fn new(config: GenerationConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Reproducible sampler
    pub fn seeded(config: GenerationConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> DistinctQuestionSampler<R> {
    pub fn with_rng(config: GenerationConfig, rng: R) -> Self {
        Self { config, rng }
    }

    /// Draw jittered decoding parameters for one attempt.
    pub fn jittered_params(&mut self) -> SamplingParams {
        let [t_low, t_high] = self.config.temperature_range;
        let [p_low, p_high] = self.config.top_p_range;

        SamplingParams {
            temperature: t_low + (t_high - t_low) * self.rng.gen::<f64>(),
            top_p: p_low + (p_high - p_low) * self.rng.gen::<f64>(),
            max_new_tokens: self.config.max_new_tokens,
            seed: self.rng.gen(),
        }
    }

    /// Best effort: returns between 0 and `max_questions` distinct questions,
    /// in first-seen order, after at most `max_attempts` generations.
    pub fn sample<G: QuestionGenerator + ?Sized>(
        &mut self,
        generator: &mut G,
        history: &[Message],
    ) -> Result<Vec<String>> {
        let mut questions: Vec<String> = Vec::with_capacity(self.config.max_questions);
        let mut attempts = 0;

        while questions.len() < self.config.max_questions && attempts < self.config.max_attempts {
            attempts += 1;
            let params = self.jittered_params();
            let question = generate_question(generator, history, &params)?;

            if !questions.contains(&question) {
                questions.push(question);
            }
        }

        tracing::debug!(
            attempts,
            distinct = questions.len(),
            "Sampled follow-up questions"
        );
        Ok(questions)
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }
}

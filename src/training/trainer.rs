// Supervised fine-tuning of a LoRA adapter on follow-up question examples

use anyhow::{Context, Result};
use candle_core::backprop::GradStore;
use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokenizers::Tokenizer;

use crate::config::constants::TRAINER_STATE_FILE;
use crate::config::{LoraConfig, TrainingConfig};
use crate::corpus::{ChatRole, SftExample};
use crate::generators::{with_system_prompt, ChatTemplate};
use crate::models::{AdapterConfig, Backbone, LoRAAdapter};

/// Prompt and completion token ids of one example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedExample {
    pub prompt_ids: Vec<u32>,
    /// Assistant target including the end-of-turn marker
    pub target_ids: Vec<u32>,
}

impl TokenizedExample {
    pub fn len(&self) -> usize {
        self.prompt_ids.len() + self.target_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Model input: everything but the final target token.
    fn input_ids(&self) -> Vec<u32> {
        let mut ids = Vec::with_capacity(self.len());
        ids.extend_from_slice(&self.prompt_ids);
        ids.extend_from_slice(&self.target_ids[..self.target_ids.len() - 1]);
        ids
    }
}

/// Renders and tokenizes examples so they fit in `max_seq_len` tokens.
pub struct ExampleEncoder<'a> {
    tokenizer: &'a Tokenizer,
    template: ChatTemplate,
    max_seq_len: usize,
}

impl<'a> ExampleEncoder<'a> {
    pub fn new(tokenizer: &'a Tokenizer, max_seq_len: usize) -> Self {
        Self {
            tokenizer,
            template: ChatTemplate::detect(tokenizer),
            max_seq_len: max_seq_len.max(2),
        }
    }

    pub fn template(&self) -> ChatTemplate {
        self.template
    }

    /// `None` for records without an assistant target.
    pub fn encode(&self, example: &SftExample) -> Result<Option<TokenizedExample>> {
        let Some(target) = example.target() else {
            return Ok(None);
        };

        let target_text = format!("{}{}", target.content, self.template.end_of_turn());
        let mut target_ids = self.tokenize(&target_text)?;
        if target_ids.is_empty() {
            return Ok(None);
        }
        target_ids.truncate(self.max_seq_len - 1);
        let budget = self.max_seq_len - target_ids.len();

        // Oldest context goes first; the system prompt is re-added on render
        let mut context: Vec<_> = example
            .prompt_messages()
            .iter()
            .filter(|m| m.role.chat_role() != ChatRole::System)
            .cloned()
            .collect();

        loop {
            let prompt = self.template.render(&with_system_prompt(&context), true);
            let prompt_ids = self.tokenize(&prompt)?;

            if prompt_ids.len() <= budget || context.len() <= 1 {
                return Ok(Some(TokenizedExample {
                    prompt_ids: left_truncate(prompt_ids, budget),
                    target_ids,
                }));
            }
            context.remove(0);
        }
    }

    pub fn encode_all(&self, examples: &[SftExample]) -> Result<Vec<TokenizedExample>> {
        let mut encoded = Vec::with_capacity(examples.len());
        for example in examples {
            if let Some(tokens) = self.encode(example)? {
                encoded.push(tokens);
            }
        }
        Ok(encoded)
    }

    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;
        Ok(encoding.get_ids().to_vec())
    }
}

/// Keep the last `max_len` ids.
fn left_truncate(mut ids: Vec<u32>, max_len: usize) -> Vec<u32> {
    if ids.len() > max_len {
        ids.drain(..ids.len() - max_len);
    }
    ids
}

/// Seeded shuffle, then the first `train_split` share goes to training.
pub fn split_train_eval<T>(mut items: Vec<T>, train_split: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);

    let n_train = ((items.len() as f64) * train_split).ceil() as usize;
    let n_train = n_train.clamp(items.len().min(1), items.len());
    let eval = items.split_off(n_train);
    (items, eval)
}

/// Periodic training log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub step: usize,
    pub epoch: usize,
    pub loss: f64,
    pub lr: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub epoch: usize,
    pub eval_loss: f64,
}

/// Summary of a run, persisted as `trainer_state.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub global_step: usize,
    pub train_examples: usize,
    pub eval_examples: usize,
    pub log_history: Vec<LogRecord>,
    pub eval_history: Vec<EvalRecord>,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.log_history.last().map(|r| r.loss)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(TRAINER_STATE_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// LoRA trainer: frozen backbone, AdamW over the adapter only
pub struct SftTrainer {
    training: TrainingConfig,
    lora: LoraConfig,
}

impl SftTrainer {
    pub fn new(training: TrainingConfig, lora: LoraConfig) -> Self {
        Self { training, lora }
    }

    /// Train a fresh adapter on `train`, reporting eval loss on `eval` after each epoch.
    pub fn train<B: Backbone + ?Sized>(
        &self,
        backbone: &mut B,
        train: &[TokenizedExample],
        eval: &[TokenizedExample],
    ) -> Result<(LoRAAdapter, TrainingReport)> {
        if train.is_empty() {
            anyhow::bail!("No training examples");
        }

        let adapter = LoRAAdapter::new(
            AdapterConfig::new(self.lora.clone(), backbone.hidden_size(), backbone.vocab_size()),
            backbone.device().clone(),
        )?;

        let cfg = &self.training;
        let batch_size = cfg.batch_size.max(1);
        let effective = cfg.effective_batch().max(1);
        let steps_per_epoch = train.len().div_ceil(effective);
        let total_steps = steps_per_epoch * cfg.epochs;
        let logging_steps = cfg.logging_steps.max(1);

        tracing::info!(
            "Starting LoRA training: {} examples ({} eval), {} epochs, {} steps, effective batch {}, {} trainable params",
            train.len(),
            eval.len(),
            cfg.epochs,
            total_steps,
            effective,
            adapter.num_parameters()
        );

        let mut opt = AdamW::new(
            adapter.vars(),
            ParamsAdamW {
                lr: cfg.learning_rate,
                ..Default::default()
            },
        )?;

        let pb = ProgressBar::new(total_steps as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut report = TrainingReport {
            train_examples: train.len(),
            eval_examples: eval.len(),
            ..Default::default()
        };
        let mut window_loss = 0.0;
        let mut window_steps = 0;

        for epoch in 1..=cfg.epochs {
            order.shuffle(&mut rng);

            for step_indices in order.chunks(effective) {
                let lr = linear_decay(cfg.learning_rate, report.global_step, total_steps);
                opt.set_learning_rate(lr);

                let step_examples: Vec<&TokenizedExample> =
                    step_indices.iter().map(|&i| &train[i]).collect();
                let loss = self.optimizer_step(backbone, &adapter, &mut opt, &step_examples, batch_size)?;

                report.global_step += 1;
                window_loss += loss;
                window_steps += 1;
                pb.inc(1);
                pb.set_message(format!("loss {:.4}", loss));

                if report.global_step % logging_steps == 0 {
                    let record = LogRecord {
                        step: report.global_step,
                        epoch,
                        loss: window_loss / window_steps as f64,
                        lr,
                        timestamp: Utc::now(),
                    };
                    tracing::info!(
                        "step {} | epoch {} | loss {:.4} | lr {:.2e}",
                        record.step,
                        record.epoch,
                        record.loss,
                        record.lr
                    );
                    report.log_history.push(record);
                    window_loss = 0.0;
                    window_steps = 0;
                }
            }

            if let Some(eval_loss) = mean_loss(backbone, &adapter, eval)? {
                tracing::info!("epoch {} | eval_loss {:.4}", epoch, eval_loss);
                report.eval_history.push(EvalRecord { epoch, eval_loss });
            }
        }

        // Partial window at the end still counts
        if window_steps > 0 {
            report.log_history.push(LogRecord {
                step: report.global_step,
                epoch: cfg.epochs,
                loss: window_loss / window_steps as f64,
                lr: linear_decay(cfg.learning_rate, report.global_step, total_steps),
                timestamp: Utc::now(),
            });
        }

        pb.finish_with_message("Training complete");
        tracing::info!(
            "Training complete. Final loss: {:.4}",
            report.final_loss().unwrap_or(0.0)
        );

        Ok((adapter, report))
    }

    /// One optimizer step over `examples`, in micro-batches of `batch_size`.
    /// Returns the mean loss.
    fn optimizer_step<B: Backbone + ?Sized>(
        &self,
        backbone: &mut B,
        adapter: &LoRAAdapter,
        opt: &mut AdamW,
        examples: &[&TokenizedExample],
        batch_size: usize,
    ) -> Result<f64> {
        let vars = adapter.vars();
        let mut summed: Vec<Option<Tensor>> = vec![None; vars.len()];
        let mut last_grads: Option<GradStore> = None;
        let mut total = 0.0;

        for micro_batch in examples.chunks(batch_size) {
            let mut losses = Vec::with_capacity(micro_batch.len());
            for example in micro_batch {
                losses.push(example_loss(backbone, adapter, example, true)?);
            }
            let loss = (Tensor::stack(&losses, 0)?.sum_all()? / examples.len() as f64)?;
            total += loss.to_scalar::<f32>()? as f64;

            let grads = loss.backward()?;
            for (slot, var) in summed.iter_mut().zip(&vars) {
                if let Some(grad) = grads.get(var.as_tensor()) {
                    let next = match slot.take() {
                        Some(acc) => (acc + grad)?,
                        None => grad.clone(),
                    };
                    *slot = Some(next);
                }
            }
            last_grads = Some(grads);
        }

        let Some(mut grads) = last_grads else {
            return Ok(0.0);
        };
        for (slot, var) in summed.into_iter().zip(&vars) {
            if let Some(grad) = slot {
                grads.insert(var.as_tensor(), grad);
            }
        }
        opt.step(&grads)?;

        Ok(total)
    }
}

fn linear_decay(base_lr: f64, step: usize, total_steps: usize) -> f64 {
    if total_steps == 0 {
        return base_lr;
    }
    base_lr * (1.0 - step as f64 / total_steps as f64).max(0.0)
}

/// Cross-entropy over the target tokens only.
pub fn example_loss<B: Backbone + ?Sized>(
    backbone: &mut B,
    adapter: &LoRAAdapter,
    example: &TokenizedExample,
    train: bool,
) -> Result<Tensor> {
    if example.prompt_ids.is_empty() || example.target_ids.is_empty() {
        anyhow::bail!("Example needs at least one prompt and one target token");
    }

    backbone.clear_cache();
    let hidden = backbone.forward_hidden(&example.input_ids(), 0)?;
    // Position i predicts token i + 1
    let rows = hidden
        .narrow(0, example.prompt_ids.len() - 1, example.target_ids.len())?
        .detach();
    let base_logits = backbone.base_logits(&rows)?.detach();
    let logits = adapter.apply(&rows, &base_logits, train)?;

    let labels = Tensor::new(example.target_ids.as_slice(), backbone.device())?;
    Ok(candle_nn::loss::cross_entropy(&logits, &labels)?)
}

/// Mean loss without dropout; `None` for an empty set.
pub fn mean_loss<B: Backbone + ?Sized>(
    backbone: &mut B,
    adapter: &LoRAAdapter,
    examples: &[TokenizedExample],
) -> Result<Option<f64>> {
    if examples.is_empty() {
        return Ok(None);
    }
    let mut total = 0.0;
    for example in examples {
        total += example_loss(backbone, adapter, example, false)?.to_scalar::<f32>()? as f64;
    }
    Ok(Some(total / examples.len() as f64))
}

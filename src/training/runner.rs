// Training pipeline: corpus → JSONL → base model probe → LoRA fit → adapter dir → smoke test

use anyhow::{Context, Result};
use std::path::Path;
use tokenizers::Tokenizer;

use crate::config::constants::{SMOKE_TEST_UTTERANCE, TOKENIZER_FILE, TRAIN_JSONL_FILE};
use crate::config::Config;
use crate::corpus::{build_corpus, read_jsonl, write_jsonl, Message, SftExample};
use crate::generators::{generate_question, FollowUpModel, SamplingParams};
use crate::models::{write_adapter_meta, BaseModel, DevicePolicy, ModelDownloader, ModelFiles};

use super::trainer::{split_train_eval, ExampleEncoder, SftTrainer, TrainingReport};

/// Build the SFT corpus from `input` and write it to `output` as JSONL.
/// Returns the number of examples written.
pub fn prepare_corpus(input: &Path, output: &Path, config: &Config) -> Result<usize> {
    let (examples, stats) = build_corpus(input, &config.corpus)?;
    write_jsonl(output, &examples)?;
    tracing::info!(
        "Wrote {} SFT examples from {} conversations to {}",
        examples.len(),
        stats.conversations,
        output.display()
    );
    Ok(examples.len())
}

/// Full run: fine-tune an adapter on the corpus at `input` and save it to `output_dir`.
pub fn run_training(
    input: &Path,
    output_dir: &Path,
    config: &Config,
    policy: &DevicePolicy,
) -> Result<TrainingReport> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let examples = load_training_examples(input, output_dir, config)?;
    if examples.is_empty() {
        anyhow::bail!("No training examples could be built from {}", input.display());
    }

    let training = if policy.is_accelerator() {
        config.training.clone().tuned_for_accelerator()
    } else {
        config.training.clone()
    };

    let downloader = ModelDownloader::new()?;
    let (base_model, (files, mut backbone)) =
        first_loadable(&config.base_models, |id| load_base(&downloader, id, policy))?;
    tracing::info!("Using base model {}", base_model);

    let tokenizer = Tokenizer::from_file(&files.tokenizer)
        .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
    let encoder = ExampleEncoder::new(&tokenizer, training.max_seq_len);
    tracing::debug!("Chat template: {:?}", encoder.template());

    let encoded = encoder.encode_all(&examples)?;
    let (train, eval) = split_train_eval(encoded, training.train_split, training.seed);

    let trainer = SftTrainer::new(training, config.lora.clone());
    let (adapter, report) = trainer.train(&mut backbone, &train, &eval)?;

    adapter.save(output_dir)?;
    tokenizer
        .save(output_dir.join(TOKENIZER_FILE), false)
        .map_err(|e| anyhow::anyhow!("Failed to save tokenizer: {}", e))?;
    write_adapter_meta(output_dir, &base_model)?;
    report.save(output_dir)?;
    tracing::info!("Saved adapter to {}", output_dir.display());

    // Only one copy of the base model in memory for the smoke test
    drop(adapter);
    drop(backbone);

    match smoke_test(output_dir, config, policy) {
        Ok(question) => tracing::info!("Smoke test question: {}", question),
        Err(e) => tracing::warn!("Smoke test skipped: {:#}", e),
    }

    Ok(report)
}

/// Training records for `input`. A `.jsonl` file is read as prepared;
/// anything else is converted into `train.jsonl` under `output_dir` first.
fn load_training_examples(
    input: &Path,
    output_dir: &Path,
    config: &Config,
) -> Result<Vec<SftExample>> {
    let jsonl_path = if is_jsonl(input) {
        input.to_path_buf()
    } else {
        let path = output_dir.join(TRAIN_JSONL_FILE);
        let written = prepare_corpus(input, &path, config)?;
        if written == 0 {
            anyhow::bail!("No training examples could be built from {}", input.display());
        }
        path
    };

    let examples = read_jsonl(&jsonl_path)?;
    tracing::info!("Loaded {} SFT examples from {}", examples.len(), jsonl_path.display());
    Ok(examples)
}

fn is_jsonl(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("jsonl"))
}

fn load_base(
    downloader: &ModelDownloader,
    model_id: &str,
    policy: &DevicePolicy,
) -> Result<(ModelFiles, BaseModel)> {
    let files = downloader.fetch(model_id)?;
    let model = BaseModel::load(&files, policy)?;
    Ok((files, model))
}

/// First candidate that loads, in order. Failures are logged and skipped.
fn first_loadable<T, F>(candidates: &[String], mut load: F) -> Result<(String, T)>
where
    F: FnMut(&str) -> Result<T>,
{
    let mut last_error = None;
    for candidate in candidates {
        match load(candidate) {
            Ok(loaded) => return Ok((candidate.clone(), loaded)),
            Err(e) => {
                tracing::warn!("Could not load {}: {:#}", candidate, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(e.context("No base model could be loaded")),
        None => anyhow::bail!("No base model candidates configured"),
    }
}

/// Load the saved adapter through the inference path and ask one question.
fn smoke_test(adapter_dir: &Path, config: &Config, policy: &DevicePolicy) -> Result<String> {
    let mut model = FollowUpModel::open(adapter_dir, config, policy)?;
    let history = [Message::patient(SMOKE_TEST_UTTERANCE)];
    let params = SamplingParams::from_config(&config.generation, config.training.seed);
    generate_question(&mut model, &history, &params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn candidates(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_loadable_skips_failures() -> Result<()> {
        let mut tried = Vec::new();
        let (id, value) = first_loadable(&candidates(&["a", "b", "c"]), |id| {
            tried.push(id.to_string());
            if id == "a" {
                anyhow::bail!("not available")
            }
            Ok(id.len())
        })?;

        assert_eq!(id, "b");
        assert_eq!(value, 1);
        assert_eq!(tried, vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn test_first_loadable_all_fail() {
        let result: Result<(String, ())> =
            first_loadable(&candidates(&["a", "b"]), |id| anyhow::bail!("{} is broken", id));
        let err = match result {
            Ok(_) => panic!("expected an error"),
            Err(e) => format!("{:#}", e),
        };
        assert!(err.contains("No base model could be loaded"));
        assert!(err.contains("b is broken"));

        let none: Result<(String, ())> = first_loadable(&[], |_| Ok(()));
        assert!(none.is_err());
    }

    #[test]
    fn test_prepare_corpus_writes_jsonl() -> Result<()> {
        let dir = TempDir::new()?;
        let input = dir.path().join("dialogs.csv");
        std::fs::write(
            &input,
            "conversation_id,patient,doctor\n\
             c1,I have a cough,How long have you had it?\n\
             c1,Two weeks,Any fever?\n",
        )?;
        let output = dir.path().join("out").join("train.jsonl");

        let written = prepare_corpus(&input, &output, &Config::default())?;
        assert_eq!(written, 2);
        assert_eq!(std::fs::read_to_string(&output)?.lines().count(), 2);
        Ok(())
    }

    #[test]
    fn test_training_examples_come_from_jsonl() -> Result<()> {
        let dir = TempDir::new()?;
        let input = dir.path().join("dialogs.csv");
        std::fs::write(
            &input,
            "conversation_id,patient,doctor\n\
             c1,I have a cough,How long have you had it?\n",
        )?;
        let adapter_dir = dir.path().join("adapter");

        let examples = load_training_examples(&input, &adapter_dir, &Config::default())?;
        let jsonl_path = adapter_dir.join(TRAIN_JSONL_FILE);
        assert_eq!(examples, read_jsonl(&jsonl_path)?);
        assert_eq!(examples.len(), 1);

        // A prepared file is used directly, including edits made after `prepare`
        let prepared = dir.path().join("edited.jsonl");
        let mut edited = examples.clone();
        edited.push(SftExample {
            messages: vec![
                Message::patient("My head hurts"),
                Message::assistant("Since when?"),
            ],
        });
        write_jsonl(&prepared, &edited)?;

        let other_dir = dir.path().join("other");
        let loaded = load_training_examples(&prepared, &other_dir, &Config::default())?;
        assert_eq!(loaded, edited);
        assert!(!other_dir.join(TRAIN_JSONL_FILE).exists());
        Ok(())
    }

    #[test]
    fn test_empty_corpus_is_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let input = dir.path().join("dialogs.csv");
        std::fs::write(
            &input,
            "conversation_id,patient,doctor\nc1,I have a cough,Rest well.\n",
        )?;

        let result = load_training_examples(&input, &dir.path().join("adapter"), &Config::default());
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_run_training_fails_fast_on_missing_corpus() -> Result<()> {
        let dir = TempDir::new()?;
        let result = run_training(
            &dir.path().join("missing.csv"),
            &dir.path().join("adapter"),
            &Config::default(),
            &DevicePolicy::cpu(),
        );
        assert!(result.is_err());
        assert!(!dir.path().join("adapter").join(TRAIN_JSONL_FILE).exists());
        Ok(())
    }
}

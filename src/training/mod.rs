// LoRA fine-tuning: trainer and end-to-end runner

pub mod runner;
pub mod trainer;

pub use runner::{prepare_corpus, run_training};
pub use trainer::{
    split_train_eval, EvalRecord, ExampleEncoder, LogRecord, SftTrainer, TokenizedExample,
    TrainingReport,
};

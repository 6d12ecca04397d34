// Corpus building: delimited conversation logs → SFT chat examples
//
// Rows are grouped by conversation id, each valid doctor question becomes
// a training target preceded by a bounded window of earlier turns.

mod builder;
mod error;
mod jsonl;
mod reader;
mod types;

pub use builder::{build_sft_examples, is_valid_question};
pub use error::CorpusError;
pub use jsonl::{read_jsonl, write_jsonl};
pub use reader::{load_conversations, read_conversations, sniff_dialect, CorpusStats, Dialect};
pub use types::{ChatRole, Conversation, ConversationTurn, Message, Role, SftExample};

use std::path::Path;

use crate::config::CorpusConfig;

/// Load a delimited file and convert it to SFT examples in one step.
pub fn build_corpus(
    path: &Path,
    config: &CorpusConfig,
) -> Result<(Vec<SftExample>, CorpusStats), CorpusError> {
    let (conversations, stats) = load_conversations(path)?;
    let examples = build_sft_examples(&conversations, config);
    Ok((examples, stats))
}

// Conversation → SFT example conversion

use crate::config::constants::SYSTEM_PROMPT;
use crate::config::CorpusConfig;

use super::types::{Conversation, Message, SftExample};

/// Whether a doctor utterance may serve as a training target.
///
/// Precision over recall: statements without a question mark stay context.
pub fn is_valid_question(text: &str, min_len: usize) -> bool {
    let text = text.trim();
    text.chars().count() >= min_len && text.contains('?')
}

/// Convert grouped conversations into SFT examples with a sliding context window.
pub fn build_sft_examples(conversations: &[Conversation], config: &CorpusConfig) -> Vec<SftExample> {
    let mut examples = Vec::new();

    for conversation in conversations {
        let before = examples.len();
        build_conversation(conversation, config, &mut examples);
        tracing::trace!(
            id = %conversation.id,
            turns = conversation.turns.len(),
            emitted = examples.len() - before,
            "Converted conversation"
        );
    }

    tracing::debug!(
        conversations = conversations.len(),
        examples = examples.len(),
        "Built SFT examples"
    );
    examples
}

fn build_conversation(conversation: &Conversation, config: &CorpusConfig, out: &mut Vec<SftExample>) {
    let mut running: Vec<Message> = Vec::new();
    let mut emitted = 0;

    for turn in &conversation.turns {
        if let Some(patient) = &turn.patient {
            running.push(Message::patient(patient.as_str()));
        }

        let Some(doctor) = &turn.doctor else {
            continue;
        };

        if is_valid_question(doctor, config.min_question_len) {
            let window = match config.max_history_messages {
                0 => &running[..],
                n => &running[running.len().saturating_sub(n)..],
            };

            let mut messages = Vec::with_capacity(window.len() + 2);
            messages.push(Message::system(SYSTEM_PROMPT));
            messages.extend_from_slice(window);
            messages.push(Message::assistant(doctor.trim()));
            out.push(SftExample { messages });

            emitted += 1;
            if config.max_examples_per_conversation > 0
                && emitted >= config.max_examples_per_conversation
            {
                break;
            }
        }

        // Every doctor utterance becomes context for later targets
        running.push(Message::doctor(doctor.as_str()));
    }
}

// Chat templates: role-tagged messages → prompt string

use tokenizers::Tokenizer;

use crate::config::constants::SYSTEM_PROMPT;
use crate::corpus::{ChatRole, Message};

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";

/// Prompt layout understood by the base model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    /// `<|im_start|>role\ncontent<|im_end|>` (Qwen2.5 instruct models)
    ChatMl,
    /// `ROLE: content` lines, for tokenizers without chat markers
    Plain,
}

impl ChatTemplate {
    /// ChatML when the tokenizer knows its markers.
    pub fn detect(tokenizer: &Tokenizer) -> Self {
        if tokenizer.token_to_id(IM_START).is_some() && tokenizer.token_to_id(IM_END).is_some() {
            ChatTemplate::ChatMl
        } else {
            ChatTemplate::Plain
        }
    }

    /// Render messages, optionally opening an assistant turn at the end.
    pub fn render(&self, messages: &[Message], add_generation_prompt: bool) -> String {
        let mut out = String::new();
        match self {
            ChatTemplate::ChatMl => {
                for m in messages {
                    out.push_str(IM_START);
                    out.push_str(m.role.chat_role().as_str());
                    out.push('\n');
                    out.push_str(&m.content);
                    out.push_str(IM_END);
                    out.push('\n');
                }
                if add_generation_prompt {
                    out.push_str(IM_START);
                    out.push_str("assistant\n");
                }
            }
            ChatTemplate::Plain => {
                let lines: Vec<String> = messages
                    .iter()
                    .map(|m| {
                        format!(
                            "{}: {}",
                            m.role.chat_role().as_str().to_uppercase(),
                            m.content
                        )
                    })
                    .collect();
                out.push_str(&lines.join("\n"));
                if add_generation_prompt {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str("ASSISTANT: ");
                }
            }
        }
        out
    }

    /// Suffix closing an assistant turn; trained as part of the target.
    pub fn end_of_turn(&self) -> &'static str {
        match self {
            ChatTemplate::ChatMl => IM_END,
            ChatTemplate::Plain => "\n",
        }
    }
}

/// System prompt followed by the dialogue history.
pub fn with_system_prompt(history: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(SYSTEM_PROMPT));
    messages.extend(
        history
            .iter()
            .filter(|m| m.role.chat_role() != ChatRole::System)
            .cloned(),
    );
    messages
}

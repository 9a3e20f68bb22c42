//! Llama 3 instruct prompt format.

use serde::{Deserialize, Serialize};

/// Control token text used by the Llama 3 instruct format.
pub mod special_tokens {
    pub const BOS: &str = "<|begin_of_text|>";
    pub const EOS: &str = "<|end_of_text|>";
    pub const START_HEADER: &str = "<|start_header_id|>";
    pub const END_HEADER: &str = "<|end_header_id|>";
    pub const EOT: &str = "<|eot_id|>";
}

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a translator. Translate the user's English text into French. Output ONLY the French translation, nothing else.";

/// A chat message with role and content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Fixed single-turn template: one system instruction, one user message,
/// and an open assistant header for the model to complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    system_instruction: String,
}

impl PromptTemplate {
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
        }
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    /// Render the prompt for `user_text`. The text is inserted verbatim.
    pub fn format(&self, user_text: &str) -> String {
        apply_chat_template(&[
            ChatMessage::system(self.system_instruction.as_str()),
            ChatMessage::user(user_text),
        ])
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_INSTRUCTION)
    }
}

/// Format `messages` in the Llama 3 chat layout, ending with the assistant header.
pub fn apply_chat_template(messages: &[ChatMessage]) -> String {
    let mut output = String::new();
    output.push_str(special_tokens::BOS);

    for msg in messages {
        push_header(&mut output, &msg.role);
        output.push_str(&msg.content);
        output.push_str(special_tokens::EOT);
    }

    push_header(&mut output, "assistant");
    output
}

fn push_header(output: &mut String, role: &str) {
    output.push_str(special_tokens::START_HEADER);
    output.push_str(role);
    output.push_str(special_tokens::END_HEADER);
    output.push_str("\n\n");
}

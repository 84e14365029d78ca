//! Chat transcript types and ChatML prompt rendering.
//!
//! The rendered string here is exactly what the inference engine consumes,
//! so the token budgeter measures the same bytes the engine will see.

/// The author of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parses a stored role string. Unknown roles are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of a conversation transcript.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Sanitizes text for safe inclusion in LLM prompts.
///
/// Escapes ChatML tokens (`<|...|>`) and common instruction tokens to prevent
/// prompt injection. This is specific to ChatML-format models (Qwen, etc.).
fn sanitize_for_prompt(text: &str) -> String {
    text.replace("<|", "< |")
        .replace("|>", "| >")
        .replace("<s>", "< s >")
        .replace("</s>", "< / s >")
        .replace("[INST]", "[ INST ]")
        .replace("[/INST]", "[ / INST ]")
        .replace("<<SYS>>", "< < SYS > >")
        .replace("<</SYS>>", "< < / SYS > >")
}

/// Renders a transcript into a single ChatML prompt string, ending with an
/// open assistant turn for the model to complete.
pub fn render_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(msg.role.as_str());
        prompt.push('\n');
        prompt.push_str(&sanitize_for_prompt(&msg.content));
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

//! Turns a stored transcript plus a claimed job into the message list
//! handed to the pipeline.

use crate::db::conversation_repo::StoredMessage;
use crate::db::job_repo::JobRow;
use crate::prompt::{ChatMessage, Role};

/// Builds the prompt transcript for one job.
///
/// The stored transcript usually already ends with the job's user turn
/// (the queue records it at enqueue time), so the input is only appended
/// when it is not already the trailing turn. The job's system prompt is
/// pinned to the top unless an identical one is already first.
pub fn assemble(job: &JobRow, transcript: &[StoredMessage]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = transcript
        .iter()
        .map(|m| ChatMessage::new(m.role, m.content.clone()))
        .collect();

    let input = job.input.trim();
    let already_trailing = matches!(
        messages.last(),
        Some(last) if last.role == Role::User && last.content.trim() == input
    );
    if !input.is_empty() && !already_trailing {
        messages.push(ChatMessage::user(input));
    }

    if let Some(prompt) = job.system_prompt.as_deref() {
        let prompt = prompt.trim();
        let already_first = matches!(
            messages.first(),
            Some(first) if first.role == Role::System && first.content.trim() == prompt
        );
        if !prompt.is_empty() && !already_first {
            messages.insert(0, ChatMessage::system(prompt));
        }
    }

    messages
}

//! Chat transcripts stored as plain text with `# role` heading lines.

use llmdocs_ai::{Message, Role};

fn heading_role(line: &str) -> Option<Role> {
    line.strip_prefix("# ").and_then(Role::parse)
}

/// Splits a document body into messages at `# system`, `# user` and
/// `# assistant` lines. Text before the first heading is dropped; a body
/// without any heading becomes a single user message.
pub fn text_to_messages(text: &str) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut current_role: Option<Role> = None;
    let mut current_lines: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if let Some(role) = heading_role(line) {
            if let Some(previous) = current_role {
                messages.push(Message::text(previous, current_lines.join("\n")));
            }
            current_lines.clear();
            current_role = Some(role);
        } else {
            current_lines.push(line);
        }
    }
    if let Some(role) = current_role {
        messages.push(Message::text(role, current_lines.join("\n")));
    }

    if messages.is_empty() {
        messages.push(Message::user(text));
    }
    messages
}

pub fn messages_to_text(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| format!("# {}\n{}", message.role, message.content.as_text()))
        .collect::<Vec<_>>()
        .join("\n")
}

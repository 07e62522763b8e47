use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionKind {
    #[default]
    OpenAI,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::OpenAI => "OpenAI",
        }
    }
}

impl Display for ConnectionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured endpoint plus credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub kind: ConnectionKind,
    #[serde(rename = "baseUrl", alias = "base_url")]
    pub base_url: String,
    #[serde(rename = "apiKey", alias = "api_key", default)]
    pub api_key: String,
}

impl Connection {
    pub fn openai(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            kind: ConnectionKind::OpenAI,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Cache key: kind plus base URL. The key is excluded so rotating it keeps
    /// cached model mappings valid.
    pub fn id(&self) -> String {
        format!("{}{}", self.kind, self.base_url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
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

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Plain-text view; image parts are dropped.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn connection_id_excludes_api_key() {
        let first = Connection::openai("https://a", "key-1");
        let rotated = Connection::openai("https://a", "key-2");
        assert_eq!(first.id(), "OpenAIhttps://a");
        assert_eq!(first.id(), rotated.id());
        assert_ne!(first.id(), Connection::openai("https://A", "key-1").id());
    }

    #[test]
    fn messages_serialize_to_openai_wire_shape() {
        let messages = vec![
            Message::user("hi"),
            Message {
                role: Role::User,
                content: MessageContent::Parts(vec![
                    ContentPart::text("look"),
                    ContentPart::image_url("data:image/png;base64,AAAA"),
                ]),
            },
        ];
        let value = serde_json::to_value(&messages).expect("serialize messages");
        assert_eq!(
            value,
            json!([
                { "role": "user", "content": "hi" },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": "look" },
                        { "type": "image_url", "image_url": { "url": "data:image/png;base64,AAAA" } }
                    ]
                }
            ])
        );
    }

    #[test]
    fn connection_accepts_snake_case_config_keys() {
        let connection: Connection = serde_json::from_value(json!({
            "kind": "OpenAI",
            "base_url": "https://api.openai.com",
            "api_key": "sk-test"
        }))
        .expect("deserialize connection");
        assert_eq!(connection, Connection::openai("https://api.openai.com", "sk-test"));
    }
}

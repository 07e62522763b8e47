use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorCode {
    /// The API rejected the supplied key.
    InvalidApiKey,
    /// The API reported that no key was supplied.
    MissingApiKey,
    /// Any other `{error:{message}}` payload.
    Api,
    /// Non-2xx response whose body is not an API error payload.
    Http,
    /// Connection refused, DNS failure, broken body read and the like.
    Transport,
    /// A response shape we could not decode.
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmError {
    pub code: LlmErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl LlmError {
    pub fn new(code: LlmErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_credentials_error(&self) -> bool {
        matches!(
            self.code,
            LlmErrorCode::InvalidApiKey | LlmErrorCode::MissingApiKey
        )
    }

    /// HTTP status attached by [`LlmError::http_status`] style constructors, if any.
    pub fn status(&self) -> Option<u16> {
        self.details
            .as_ref()
            .and_then(|details| details.get("status"))
            .and_then(Value::as_u64)
            .and_then(|status| u16::try_from(status).ok())
    }

    /// `"{code} {reason}"`, preferring the server's reason phrase over the
    /// canonical one.
    pub(crate) fn http_status(status: reqwest::StatusCode, reason: Option<&str>) -> Self {
        let reason = reason
            .filter(|reason| !reason.trim().is_empty())
            .or_else(|| status.canonical_reason())
            .unwrap_or("");
        Self::new(
            LlmErrorCode::Http,
            format!("{} {}", status.as_u16(), reason.trim())
                .trim_end()
                .to_string(),
        )
        .with_details(serde_json::json!({ "status": status.as_u16() }))
    }

    pub(crate) fn transport(error: impl Display) -> Self {
        Self::new(LlmErrorCode::Transport, error.to_string())
    }
}

impl Display for LlmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for LlmError {}

/// `{error: {code?, message}}` as returned by OpenAI-compatible servers.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

const INVALID_API_KEY_CODE: &str = "invalid_api_key";
const MISSING_API_KEY_PREFIX: &str = "You didn't provide an API key";

impl ApiErrorBody {
    pub(crate) fn classify(self) -> LlmError {
        let message = self.message.unwrap_or_default();
        let code = self.code.as_ref().and_then(Value::as_str);
        if code == Some(INVALID_API_KEY_CODE) {
            return LlmError::new(LlmErrorCode::InvalidApiKey, "Invalid OpenAI API key")
                .with_details(serde_json::json!({ "message": message }));
        }
        if message.starts_with(MISSING_API_KEY_PREFIX) {
            return LlmError::new(
                LlmErrorCode::MissingApiKey,
                "You must provide an OpenAI API key",
            );
        }
        LlmError::new(LlmErrorCode::Api, message)
    }
}

/// Decodes a body as an API error payload. Anything else yields `None`.
pub(crate) fn parse_api_error(body: &[u8]) -> Option<LlmError> {
    serde_json::from_slice::<ApiErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error.classify())
}

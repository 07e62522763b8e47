//! Streaming chat completions and model-to-connection resolution for
//! OpenAI-compatible endpoints.

mod abort;
mod completion;
mod error;
mod event_stream;
mod http;
mod model_cache;
mod models;
mod registry;
mod resolver;
mod sse;
mod types;

pub use completion::{CompletionEvent, CompletionStream, StreamStatus};
pub use error::{LlmError, LlmErrorCode};
pub use http::shared_http_client;
pub use model_cache::{ModelCache, ModelCacheUpdate};
pub use models::{list_models, HttpModelLister, ModelListFuture, ModelLister, ModelListerRef};
pub use registry::{
    cached_connection_models, filter_models, is_excluded_model, sort_for_picker, ConnectionModel,
    PickerPreferences,
};
pub use resolver::ConnectionResolver;
pub use sse::{parse_chunk, SseChunkParser, SseEvent};
pub use types::{Connection, ConnectionKind, ContentPart, ImageUrl, Message, MessageContent, Role};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::abort::AbortController;
use crate::error::LlmError;
use crate::event_stream::{CompletionLog, Settle};
use crate::http::{
    auth_headers, endpoint, error_from_response, shared_http_client, CHAT_COMPLETIONS_PATH,
};
use crate::sse::{SseChunkParser, SseEvent};
use crate::types::{Connection, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Constructed, no request issued yet.
    Pending,
    Running,
    Done,
    Errored,
    Aborted,
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamStatus::Done | StreamStatus::Errored | StreamStatus::Aborted
        )
    }
}

/// Push-side view of a completion: deltas in arrival order, then exactly one
/// terminal event.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    Delta(String),
    Done { text: String },
    Aborted { text: String },
    Error(LlmError),
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

struct StreamInner {
    connection: Connection,
    model: String,
    messages: Vec<Message>,
    client: Client,
    log: CompletionLog,
    abort: AbortController,
    started: AtomicBool,
}

/// One streaming chat-completion request.
///
/// Nothing is sent until [`CompletionStream::start`] or
/// [`CompletionStream::result`] is called. Clones share the same request, so
/// one clone can [`stop`](CompletionStream::stop) while another awaits the
/// result. Dropping the last clone stops the request.
#[derive(Clone)]
pub struct CompletionStream {
    handle: Arc<StreamHandle>,
}

/// Held by [`CompletionStream`] clones only, never by the request task.
struct StreamHandle {
    inner: Arc<StreamInner>,
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if self.inner.log.status() == StreamStatus::Running {
            debug!(model = %self.inner.model, "completion stream dropped while running");
        }
        self.inner.stop();
    }
}

impl CompletionStream {
    pub fn new(connection: Connection, model: impl Into<String>, messages: Vec<Message>) -> Self {
        let client = shared_http_client(&connection.base_url);
        Self::with_client(client, connection, model, messages)
    }

    pub fn with_client(
        client: Client,
        connection: Connection,
        model: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        let inner = Arc::new(StreamInner {
            connection,
            model: model.into(),
            messages,
            client,
            log: CompletionLog::new(),
            abort: AbortController::new(),
            started: AtomicBool::new(false),
        });
        Self {
            handle: Arc::new(StreamHandle { inner }),
        }
    }

    fn inner(&self) -> &Arc<StreamInner> {
        &self.handle.inner
    }

    pub fn connection(&self) -> &Connection {
        &self.inner().connection
    }

    pub fn model(&self) -> &str {
        &self.inner().model
    }

    pub fn status(&self) -> StreamStatus {
        self.inner().log.status()
    }

    /// Text accumulated so far.
    pub fn text(&self) -> String {
        self.inner().log.text()
    }

    /// Issues the request on a background task. Later calls are no-ops.
    pub fn start(&self) {
        if self.inner().started.swap(true, Ordering::SeqCst) {
            return;
        }
        spawn_stream_task(Arc::clone(self.inner()));
    }

    /// Full text on completion or cancellation, classified error on failure.
    /// Starts the request if needed.
    pub async fn result(&self) -> Result<String, LlmError> {
        self.start();
        self.inner().log.outcome().await
    }

    /// Next event in arrival order; `None` once the terminal event has been
    /// consumed.
    pub async fn next_event(&self) -> Option<CompletionEvent> {
        self.inner().log.next().await
    }

    /// Cancels the request. Safe to call repeatedly, before start and after
    /// completion.
    pub fn stop(&self) {
        self.inner().stop();
    }
}

impl StreamInner {
    fn stop(&self) {
        self.abort.abort();
        if self.log.settle(Settle::Aborted).is_some() {
            debug!(model = %self.model, "chat completion aborted");
        }
    }

    async fn run(self: Arc<Self>) {
        if !self.log.begin() {
            return;
        }

        let signal = self.abort.signal();
        let outcome = tokio::select! {
            outcome = self.request() => outcome,
            _ = signal.cancelled() => Ok(()),
        };
        match outcome {
            Ok(()) => {
                if let Some(len) = self.log.settle(Settle::Done) {
                    debug!(model = %self.model, len, "chat completion finished");
                }
            }
            Err(error) => self.fail(error),
        }
    }

    fn fail(&self, error: LlmError) {
        let message = error.to_string();
        if self.log.settle(Settle::Errored(error)).is_some() {
            debug!(model = %self.model, error = %message, "chat completion failed");
        }
    }

    async fn request(&self) -> Result<(), LlmError> {
        let url = endpoint(&self.connection, CHAT_COMPLETIONS_PATH);
        debug!(
            model = %self.model,
            url = %url,
            messages = self.messages.len(),
            "starting chat completion"
        );
        let payload = ChatCompletionRequest {
            model: &self.model,
            messages: &self.messages,
            stream: true,
        };
        let response = self
            .client
            .post(url)
            .headers(auth_headers(&self.connection))
            .json(&payload)
            .send()
            .await
            .map_err(LlmError::transport)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let mut parser = SseChunkParser::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(LlmError::transport)?;
            if self.apply(parser.feed(&chunk)?) {
                return Ok(());
            }
        }
        self.apply(parser.finish());
        Ok(())
    }

    /// Returns `true` once the done sentinel is seen.
    fn apply(&self, events: Vec<SseEvent>) -> bool {
        for event in events {
            match event {
                SseEvent::Delta(delta) => self.log.append(&delta),
                SseEvent::Done => return true,
            }
        }
        false
    }
}

fn spawn_stream_task(inner: Arc<StreamInner>) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(inner.run());
        return;
    }

    std::thread::spawn(move || {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(inner.run()),
            Err(error) => {
                if inner.log.begin() {
                    inner.fail(LlmError::transport(error));
                }
            }
        }
    });
}

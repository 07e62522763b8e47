use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::NaiveDate;
use llmdocs_ai::{
    CompletionEvent, CompletionStream, Connection, ConnectionResolver, Message, StreamStatus,
};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::DocError;
use crate::frontmatter;
use crate::links::preprocess_messages;
use crate::transcript::{messages_to_text, text_to_messages};
use crate::vault::{next_free_doc_path, Vault};

const ASSISTANT_HEADING: &str = "\n# assistant\n";
const USER_HEADING: &str = "\n# user\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocProperties {
    pub model: String,
}

/// Settings applied to documents that do not say otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocDefaults {
    pub model: String,
    pub system_prompt: String,
}

impl Default for DocDefaults {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            system_prompt: String::new(),
        }
    }
}

/// Parsed view of a document file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocContents {
    pub properties: DocProperties,
    pub messages: Vec<Message>,
}

/// How a finished `complete` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocCompletion {
    pub text: String,
    /// `Done`, or `Aborted` when the completion was stopped.
    pub status: StreamStatus,
}

/// A chat transcript document on disk.
///
/// At most one completion runs per file in the process at a time, however
/// many `LlmDoc` values point at it. `stop` cancels the completion started
/// through this value from any task holding a reference.
pub struct LlmDoc {
    path: PathBuf,
    /// Canonical form of `path`, shared by every handle on the same file.
    file_key: PathBuf,
    default_model: String,
    current_stream: Mutex<Option<CompletionStream>>,
    stop_requested: AtomicBool,
}

impl LlmDoc {
    async fn new(path: PathBuf, default_model: String) -> Self {
        let file_key = tokio::fs::canonicalize(&path)
            .await
            .unwrap_or_else(|_| path.clone());
        Self {
            path,
            file_key,
            default_model,
            current_stream: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Opens an existing document. Fails when the file cannot be read or its
    /// frontmatter is invalid.
    pub async fn from_file(
        path: impl Into<PathBuf>,
        defaults: &DocDefaults,
    ) -> Result<Self, DocError> {
        let doc = Self::new(path.into(), defaults.model.clone()).await;
        doc.read_contents().await?;
        Ok(doc)
    }

    /// Writes a new document and fails if `path` already exists.
    pub async fn create(
        path: impl Into<PathBuf>,
        properties: DocProperties,
        messages: &[Message],
    ) -> Result<Self, DocError> {
        let path = path.into();
        let text = frontmatter::set_model(&messages_to_text(messages), &properties.model)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        info!(path = %path.display(), model = %properties.model, "document created");
        Ok(Self::new(path, properties.model).await)
    }

    /// Creates the next free dated document in `docs_dir`, seeded with the
    /// default system prompt (when set) and an empty user message.
    pub async fn create_new_doc(
        docs_dir: &Path,
        defaults: &DocDefaults,
        date: NaiveDate,
    ) -> Result<Self, DocError> {
        tokio::fs::create_dir_all(docs_dir).await?;
        let path = next_free_doc_path(docs_dir, date)
            .ok_or_else(|| DocError::NoFreeDocPath(docs_dir.to_path_buf()))?;
        let mut messages = Vec::new();
        if !defaults.system_prompt.is_empty() {
            messages.push(Message::system(defaults.system_prompt.clone()));
        }
        messages.push(Message::user(""));
        let properties = DocProperties {
            model: defaults.model.clone(),
        };
        Self::create(path, properties, &messages).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether any handle on this file is completing right now.
    pub fn is_processing(&self) -> bool {
        lock_files_in_progress().contains(&self.file_key)
    }

    pub async fn read_contents(&self) -> Result<DocContents, DocError> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        self.parse_contents(&text)
    }

    fn parse_contents(&self, text: &str) -> Result<DocContents, DocError> {
        let model = frontmatter::parse(text)?
            .model
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| self.default_model.clone());
        Ok(DocContents {
            properties: DocProperties { model },
            messages: text_to_messages(frontmatter::split(text).body),
        })
    }

    /// Sends the transcript to the model and streams the reply into the file:
    /// `# assistant` before the first delta, each delta as it arrives, then a
    /// fresh `# user` heading once the stream settles. A stream error is
    /// returned without the trailing user heading.
    pub async fn complete(
        &self,
        resolver: &ConnectionResolver,
        connections: &[Connection],
        vault: &Vault,
    ) -> Result<DocCompletion, DocError> {
        let _processing = ProcessingGuard::acquire(&self.file_key)
            .ok_or_else(|| DocError::AlreadyRunning(self.path.clone()))?;
        self.stop_requested.store(false, Ordering::Release);

        let text = tokio::fs::read_to_string(&self.path).await?;
        let contents = self.parse_contents(&text)?;
        let model = contents.properties.model;

        let connection = resolver
            .resolve_connection_for_model(connections, &model)
            .await
            .ok_or_else(|| DocError::NoConnection {
                model: model.clone(),
            })?;

        let updated = frontmatter::set_model(&text, &model)?;
        if updated != text {
            tokio::fs::write(&self.path, &updated).await?;
        }

        let source_dir = self.path.parent();
        let messages = preprocess_messages(
            &contents.messages,
            &vault.text_resolver(source_dir),
            &vault.image_resolver(source_dir),
        )
        .await;

        debug!(
            path = %self.path.display(),
            model = %model,
            base_url = %connection.base_url,
            messages = messages.len(),
            "document completion started"
        );
        let stream = CompletionStream::new(connection, model, messages);
        let _current = self.install_stream(&stream);
        stream.start();

        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        let mut wrote_heading = false;
        let outcome = loop {
            match stream.next_event().await {
                Some(CompletionEvent::Delta(delta)) => {
                    if !wrote_heading {
                        append(&mut file, ASSISTANT_HEADING).await?;
                        wrote_heading = true;
                    }
                    append(&mut file, &delta).await?;
                }
                Some(CompletionEvent::Done { text }) => break Ok((text, StreamStatus::Done)),
                Some(CompletionEvent::Aborted { text }) => break Ok((text, StreamStatus::Aborted)),
                Some(CompletionEvent::Error(error)) => break Err(error),
                None => break stream.result().await.map(|text| (text, stream.status())),
            }
        };

        let (text, status) = outcome?;
        append(&mut file, USER_HEADING).await?;
        info!(
            path = %self.path.display(),
            status = ?status,
            chars = text.len(),
            "document completion finished"
        );
        Ok(DocCompletion { text, status })
    }

    /// Cancels the running completion, if any. Text received so far stays in
    /// the document.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        let current = self
            .current_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(stream) = current.as_ref() {
            stream.stop();
        }
    }

    fn install_stream(&self, stream: &CompletionStream) -> CurrentStreamGuard<'_> {
        let mut current = self
            .current_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *current = Some(stream.clone());
        if self.stop_requested.load(Ordering::Acquire) {
            stream.stop();
        }
        CurrentStreamGuard { doc: self }
    }
}

async fn append(file: &mut File, text: &str) -> Result<(), DocError> {
    file.write_all(text.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

fn lock_files_in_progress() -> MutexGuard<'static, HashSet<PathBuf>> {
    static FILES_IN_PROGRESS: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    FILES_IN_PROGRESS
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Marks a file as being completed until dropped.
struct ProcessingGuard {
    file_key: PathBuf,
}

impl ProcessingGuard {
    fn acquire(file_key: &Path) -> Option<Self> {
        lock_files_in_progress()
            .insert(file_key.to_path_buf())
            .then(|| Self {
                file_key: file_key.to_path_buf(),
            })
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        lock_files_in_progress().remove(&self.file_key);
    }
}

struct CurrentStreamGuard<'a> {
    doc: &'a LlmDoc,
}

impl Drop for CurrentStreamGuard<'_> {
    fn drop(&mut self) {
        self.doc
            .current_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

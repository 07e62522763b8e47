use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use llmdocs_ai::{
    filter_models, sort_for_picker, ConnectionModel, ConnectionResolver, ModelCache,
    PickerPreferences,
};
use llmdocs_doc::{DocCompletion, DocDefaults, DocError, LlmDoc, Vault};
use tracing::info;

use crate::config::LlmDocsConfig;

/// Overrides for `new`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewDocOptions {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
}

pub async fn new_doc(
    config: &LlmDocsConfig,
    options: NewDocOptions,
    date: NaiveDate,
) -> Result<PathBuf, String> {
    let defaults = DocDefaults {
        model: options.model.unwrap_or_else(|| config.defaults.model.clone()),
        system_prompt: options
            .system_prompt
            .unwrap_or_else(|| config.defaults.system_prompt.clone()),
    };
    let doc = LlmDoc::create_new_doc(&config.docs_dir, &defaults, date)
        .await
        .map_err(|error| error.to_string())?;
    Ok(doc.path().to_path_buf())
}

/// Completes `file` in place. When `interrupt` resolves the running stream is
/// stopped and the partial reply is kept.
pub async fn complete_doc<F>(
    config: &LlmDocsConfig,
    resolver: &ConnectionResolver,
    file: &Path,
    interrupt: F,
) -> Result<DocCompletion, String>
where
    F: Future<Output = ()>,
{
    let doc = LlmDoc::from_file(file, &config.defaults)
        .await
        .map_err(|error| error.to_string())?;
    let vault = Vault::new(&config.vault_dir);

    let completion = doc.complete(resolver, &config.connections, &vault);
    tokio::pin!(completion);
    tokio::pin!(interrupt);
    let result = tokio::select! {
        result = &mut completion => result,
        _ = &mut interrupt => {
            info!(path = %file.display(), "interrupt received, stopping completion");
            doc.stop();
            completion.await
        }
    };
    result.map_err(|error| error.to_string())
}

/// Refreshes every connection and returns the picker listing, optionally
/// narrowed by `query`.
pub async fn list_models(
    config: &LlmDocsConfig,
    resolver: &ConnectionResolver,
    query: Option<&str>,
) -> Vec<ConnectionModel> {
    let mut models = resolver
        .get_all_available_models_and_update_cache(&config.connections)
        .await;
    sort_for_picker(&mut models, &config.connections, &picker_preferences(config));
    match query {
        Some(query) => filter_models(&models, query),
        None => models,
    }
}

pub fn picker_preferences(config: &LlmDocsConfig) -> PickerPreferences {
    PickerPreferences {
        pinned: config.pinned_models.clone(),
        default_model: Some(config.defaults.model.clone()),
    }
}

/// One listing line: `*` marks pinned models, `>` the default model.
pub fn format_model_line(entry: &ConnectionModel, preferences: &PickerPreferences) -> String {
    let marker = if preferences.pinned.contains(&entry.model) {
        '*'
    } else if preferences.default_model.as_deref() == Some(entry.model.as_str()) {
        '>'
    } else {
        ' '
    };
    format!("{marker} {}\t{}", entry.model, entry.connection.base_url)
}

pub async fn resolve_model(
    config: &LlmDocsConfig,
    resolver: &ConnectionResolver,
    model: &str,
) -> Result<String, String> {
    resolver
        .resolve_connection_for_model(&config.connections, model)
        .await
        .map(|connection| connection.base_url)
        .ok_or_else(|| {
            DocError::NoConnection {
                model: model.to_string(),
            }
            .to_string()
        })
}

/// Resolver backed by a fresh in-memory cache.
pub fn new_resolver() -> ConnectionResolver {
    ConnectionResolver::new(ModelCache::new())
}

//! Display-ready projection of the model cache.

use std::collections::BTreeSet;

use crate::model_cache::ModelCache;
use crate::types::Connection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionModel {
    pub connection: Connection,
    pub model: String,
}

/// Image generation, embedding, text-to-speech and speech-to-text families.
/// They stay resolvable but are hidden from pickers.
pub fn is_excluded_model(model: &str) -> bool {
    model.starts_with("dall-e")
        || model.contains("embedding")
        || model.split('-').any(|token| token == "tts")
        || model.starts_with("whisper-")
}

/// Every cached model served by one of `connections`, minus excluded
/// families, ordered by connection list position then model name.
pub fn cached_connection_models(
    cache: &ModelCache,
    connections: &[Connection],
) -> Vec<ConnectionModel> {
    let ids: Vec<String> = connections.iter().map(Connection::id).collect();
    let mut projected: Vec<(usize, ConnectionModel)> = cache
        .entries()
        .into_iter()
        .filter(|(model, _)| !is_excluded_model(model))
        .filter_map(|(model, connection_id)| {
            let index = ids.iter().position(|id| *id == connection_id)?;
            Some((
                index,
                ConnectionModel {
                    connection: connections[index].clone(),
                    model,
                },
            ))
        })
        .collect();
    projected.sort_by(|(left_index, left), (right_index, right)| {
        left_index
            .cmp(right_index)
            .then_with(|| left.model.cmp(&right.model))
    });
    projected.into_iter().map(|(_, model)| model).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PickerPreferences {
    pub pinned: BTreeSet<String>,
    pub default_model: Option<String>,
}

/// Pinned first, then the default model, then connection order, then name.
pub fn sort_for_picker(
    models: &mut [ConnectionModel],
    connections: &[Connection],
    preferences: &PickerPreferences,
) {
    let ids: Vec<String> = connections.iter().map(Connection::id).collect();
    models.sort_by_cached_key(|entry| {
        let connection_id = entry.connection.id();
        let connection_index = ids
            .iter()
            .position(|id| *id == connection_id)
            .unwrap_or(usize::MAX);
        (
            !preferences.pinned.contains(&entry.model),
            preferences.default_model.as_deref() != Some(entry.model.as_str()),
            connection_index,
            entry.model.clone(),
        )
    });
}

/// Case-insensitive substring match on the model name.
pub fn filter_models(models: &[ConnectionModel], query: &str) -> Vec<ConnectionModel> {
    let query = query.to_lowercase();
    models
        .iter()
        .filter(|entry| entry.model.to_lowercase().contains(&query))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_non_chat_families() {
        for model in [
            "dall-e-3",
            "text-embedding-3-small",
            "tts-1",
            "tts-1-hd",
            "gpt-4o-mini-tts",
            "whisper-1",
        ] {
            assert!(is_excluded_model(model), "{model} should be excluded");
        }
        for model in ["gpt-4o", "gpt-4o-mini", "o3", "whisperer", "attsy", "my-ttsx"] {
            assert!(!is_excluded_model(model), "{model} should be kept");
        }
    }

    fn names(models: &[ConnectionModel]) -> Vec<&str> {
        models.iter().map(|entry| entry.model.as_str()).collect()
    }

    #[test]
    fn projection_keeps_known_connections_and_orders_by_connection_then_name() {
        let a = Connection::openai("https://a", "ka");
        let b = Connection::openai("https://b", "kb");
        let cache = ModelCache::new();
        cache.upsert_models(&b.id(), &["zeta", "alpha", "whisper-1"]);
        cache.upsert_models(&a.id(), &["mid"]);
        cache.upsert_models("OpenAIhttps://gone", &["orphan"]);

        let projected = cached_connection_models(&cache, &[a.clone(), b.clone()]);
        assert_eq!(names(&projected), vec!["mid", "alpha", "zeta"]);
        assert_eq!(projected[0].connection, a);
        assert_eq!(projected[1].connection, b);
    }

    #[test]
    fn picker_sort_puts_pinned_then_default_first() {
        let a = Connection::openai("https://a", "ka");
        let b = Connection::openai("https://b", "kb");
        let cache = ModelCache::new();
        cache.upsert_models(&a.id(), &["a1", "a2"]);
        cache.upsert_models(&b.id(), &["b1", "b2"]);
        let connections = vec![a, b];

        let mut models = cached_connection_models(&cache, &connections);
        let preferences = PickerPreferences {
            pinned: BTreeSet::from(["b2".to_string()]),
            default_model: Some("a2".to_string()),
        };
        sort_for_picker(&mut models, &connections, &preferences);
        assert_eq!(names(&models), vec!["b2", "a2", "a1", "b1"]);
    }

    #[test]
    fn filter_is_case_insensitive() {
        let a = Connection::openai("https://a", "ka");
        let models = vec![
            ConnectionModel {
                connection: a.clone(),
                model: "GPT-4o".to_string(),
            },
            ConnectionModel {
                connection: a,
                model: "o3".to_string(),
            },
        ];
        assert_eq!(names(&filter_models(&models, "gpt")), vec!["GPT-4o"]);
        assert_eq!(filter_models(&models, "").len(), 2);
    }
}

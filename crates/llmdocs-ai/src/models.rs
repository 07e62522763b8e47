use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{LlmError, LlmErrorCode};
use crate::http::{auth_headers, endpoint, error_from_response, shared_http_client, MODELS_PATH};
use crate::types::Connection;

pub type ModelListFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<String>, LlmError>> + Send + 'a>>;

/// Lists the model names a connection serves.
pub trait ModelLister: Send + Sync {
    fn list_models<'a>(&'a self, connection: &'a Connection) -> ModelListFuture<'a>;
}

pub type ModelListerRef = Arc<dyn ModelLister>;

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    data: Vec<ModelListEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelListEntry {
    id: String,
}

/// `GET {base}/v1/models` against an OpenAI-compatible server.
#[derive(Debug, Clone, Default)]
pub struct HttpModelLister {
    client: Option<Client>,
}

impl HttpModelLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl ModelLister for HttpModelLister {
    fn list_models<'a>(&'a self, connection: &'a Connection) -> ModelListFuture<'a> {
        Box::pin(async move {
            let client = self
                .client
                .clone()
                .unwrap_or_else(|| shared_http_client(&connection.base_url));
            list_models(&client, connection).await
        })
    }
}

pub async fn list_models(
    client: &Client,
    connection: &Connection,
) -> Result<Vec<String>, LlmError> {
    let url = endpoint(connection, MODELS_PATH);
    debug!(url = %url, "listing models");
    let response = client
        .get(url)
        .headers(auth_headers(connection))
        .send()
        .await
        .map_err(LlmError::transport)?;

    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    let body = response.bytes().await.map_err(LlmError::transport)?;
    let parsed: ModelListResponse = serde_json::from_slice(&body).map_err(|error| {
        LlmError::new(
            LlmErrorCode::Protocol,
            format!("invalid model list response: {error}"),
        )
    })?;
    Ok(parsed.data.into_iter().map(|entry| entry.id).collect())
}

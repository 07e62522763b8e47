use std::sync::OnceLock;

use hyper::ext::ReasonPhrase;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;

use crate::error::{parse_api_error, LlmError};
use crate::types::Connection;

pub(crate) const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";
pub(crate) const MODELS_PATH: &str = "v1/models";

pub(crate) fn endpoint(connection: &Connection, path: &str) -> String {
    join_url(&connection.base_url, path)
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    if base_url.ends_with('/') {
        format!("{base_url}{path}")
    } else {
        format!("{base_url}/{path}")
    }
}

pub(crate) fn auth_headers(connection: &Connection) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", connection.api_key)) {
        headers.insert(AUTHORIZATION, value);
    }
    headers
}

/// Client shared by every request to `base_url`. Loopback hosts bypass any
/// configured proxy.
pub fn shared_http_client(base_url: &str) -> Client {
    static DEFAULT_CLIENT: OnceLock<Client> = OnceLock::new();
    static LOOPBACK_CLIENT: OnceLock<Client> = OnceLock::new();

    if is_loopback_base_url(base_url) {
        LOOPBACK_CLIENT
            .get_or_init(|| {
                Client::builder()
                    .no_proxy()
                    .build()
                    .unwrap_or_else(|_| Client::new())
            })
            .clone()
    } else {
        DEFAULT_CLIENT.get_or_init(Client::new).clone()
    }
}

pub(crate) fn is_loopback_base_url(base_url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(base_url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    host.eq_ignore_ascii_case("localhost")
        || host == "127.0.0.1"
        || host == "[::1]"
        || host == "::1"
}

/// Turns a non-2xx response into a classified error, consuming its body.
pub(crate) async fn error_from_response(response: reqwest::Response) -> LlmError {
    let status = response.status();
    let reason = reason_phrase(&response);
    match response.bytes().await {
        Ok(body) => parse_api_error(&body)
            .unwrap_or_else(|| LlmError::http_status(status, reason.as_deref())),
        Err(_) => LlmError::http_status(status, reason.as_deref()),
    }
}

/// Reason phrase sent by the server when it differs from the canonical one.
fn reason_phrase(response: &reqwest::Response) -> Option<String> {
    response
        .extensions()
        .get::<ReasonPhrase>()
        .map(|reason| String::from_utf8_lossy(reason.as_bytes()).into_owned())
}

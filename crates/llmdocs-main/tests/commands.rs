use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use llmdocs_ai::StreamStatus;
use llmdocs_main::{
    complete_doc, format_model_line, list_models, new_doc, new_resolver, parse_config,
    picker_preferences, resolve_model, LlmDocsConfig, NewDocOptions,
};

const SSE_HEADERS: &str =
    "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";

fn delta_line(content: &str) -> String {
    format!(
        "data: {}\n",
        serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
    )
}

fn read_request(socket: &mut TcpStream) -> String {
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("set read timeout");
    let mut data = Vec::new();
    let mut buffer = [0_u8; 8192];
    loop {
        let Ok(read_len) = socket.read(&mut buffer) else {
            break;
        };
        if read_len == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..read_len]);
        let text = String::from_utf8_lossy(&data);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if data.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).to_string()
}

/// Serves `GET /v1/models` with `models` and `POST /v1/chat/completions` with
/// the scripted SSE parts, for as many connections as arrive.
fn spawn_openai_server(
    models: &'static [&'static str],
    parts: Vec<(Duration, String)>,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind local test server");
    let address = listener.local_addr().expect("server local addr");
    thread::spawn(move || {
        for socket in listener.incoming() {
            let Ok(mut socket) = socket else {
                return;
            };
            let request = read_request(&mut socket);
            if request.starts_with("GET /v1/models ") {
                let data: Vec<_> = models
                    .iter()
                    .map(|id| serde_json::json!({ "id": id, "object": "model" }))
                    .collect();
                let body = serde_json::json!({ "object": "list", "data": data }).to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes());
                let _ = socket.flush();
                continue;
            }
            let parts = parts.clone();
            thread::spawn(move || {
                if socket.write_all(SSE_HEADERS.as_bytes()).is_err() {
                    return;
                }
                for (delay, part) in parts {
                    thread::sleep(delay);
                    if socket.write_all(part.as_bytes()).is_err() {
                        return;
                    }
                    let _ = socket.flush();
                }
            });
        }
    });
    format!("http://{address}")
}

fn config_for(dir: &Path, base_urls: &[&str], extra: &str) -> LlmDocsConfig {
    let mut content = format!("{extra}\n");
    for base_url in base_urls {
        content.push_str(&format!(
            "[[connections]]\nbase_url = \"{base_url}\"\napi_key = \"sk-test\"\n\n"
        ));
    }
    parse_config(&content, &dir.join("conf"), dir).expect("test config parses")
}

#[tokio::test]
async fn new_doc_creates_dated_document_in_docs_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_for(
        dir.path(),
        &[],
        "[defaults]\nmodel = \"gpt-4o-mini\"\nsystem_prompt = \"Be brief.\"",
    );
    let date = NaiveDate::from_ymd_opt(2025, 6, 30).expect("date");

    let path = new_doc(&config, NewDocOptions::default(), date)
        .await
        .expect("new doc");
    assert_eq!(path, dir.path().join("LLM").join("2025-06-30_01_LLM.md"));
    assert_eq!(
        std::fs::read_to_string(&path).expect("read doc"),
        "---\nmodel: gpt-4o-mini\n---\n# system\nBe brief.\n# user\n"
    );

    let overridden = new_doc(
        &config,
        NewDocOptions {
            model: Some("o3".to_string()),
            system_prompt: Some(String::new()),
        },
        date,
    )
    .await
    .expect("second doc");
    assert_eq!(
        std::fs::read_to_string(&overridden).expect("read doc"),
        "---\nmodel: o3\n---\n# user\n"
    );
}

#[tokio::test]
async fn complete_doc_discovers_connection_and_streams_reply() {
    let dir = tempfile::tempdir().expect("tempdir");
    let empty = spawn_openai_server(&["other-model"], Vec::new());
    let serving = spawn_openai_server(
        &["gpt-test"],
        vec![(
            Duration::ZERO,
            format!("{}{}data: [DONE]\n", delta_line("Hi"), delta_line("!")),
        )],
    );
    let config = config_for(dir.path(), &[&empty, &serving], "");
    let file = dir.path().join("chat.md");
    std::fs::write(&file, "---\nmodel: gpt-test\n---\n# user\nhello").expect("write doc");

    let completion = complete_doc(
        &config,
        &new_resolver(),
        &file,
        std::future::pending::<()>(),
    )
    .await
    .expect("completion succeeds");

    assert_eq!(completion.text, "Hi!");
    assert_eq!(completion.status, StreamStatus::Done);
    assert_eq!(
        std::fs::read_to_string(&file).expect("read doc"),
        "---\nmodel: gpt-test\n---\n# user\nhello\n# assistant\nHi!\n# user\n"
    );
}

#[tokio::test]
async fn interrupt_stops_completion_and_keeps_partial_reply() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = spawn_openai_server(
        &["gpt-test"],
        vec![
            (Duration::ZERO, delta_line("partial")),
            (Duration::from_secs(3), delta_line(" never")),
        ],
    );
    let config = config_for(dir.path(), &[&server], "");
    let file = dir.path().join("chat.md");
    std::fs::write(&file, "---\nmodel: gpt-test\n---\n# user\ngo").expect("write doc");

    let watched = file.clone();
    let interrupt = async move {
        for _ in 0..200 {
            let text = tokio::fs::read_to_string(&watched).await.unwrap_or_default();
            if text.ends_with("partial") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    let completion = complete_doc(&config, &new_resolver(), &file, interrupt)
        .await
        .expect("interrupted completion succeeds");

    assert_eq!(completion.status, StreamStatus::Aborted);
    assert_eq!(completion.text, "partial");
    assert_eq!(
        std::fs::read_to_string(&file).expect("read doc"),
        "---\nmodel: gpt-test\n---\n# user\ngo\n# assistant\npartial\n# user\n"
    );
}

#[tokio::test]
async fn complete_doc_reports_unknown_model() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = spawn_openai_server(&["gpt-test"], Vec::new());
    let config = config_for(dir.path(), &[&server], "");
    let file = dir.path().join("chat.md");
    std::fs::write(&file, "---\nmodel: ghost\n---\n# user\nhello").expect("write doc");

    let error = complete_doc(&config, &new_resolver(), &file, std::future::pending::<()>())
        .await
        .expect_err("unknown model must fail");
    assert_eq!(error, "No connection found for model \"ghost\"");
}

#[tokio::test]
async fn models_listing_puts_pinned_and_default_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = spawn_openai_server(
        &["gpt-b", "text-embedding-3-small", "gpt-a", "tts-1"],
        Vec::new(),
    );
    let second = spawn_openai_server(&["zeta", "dall-e-3"], Vec::new());
    let config = config_for(
        dir.path(),
        &[&first, &second],
        "pinned_models = [\"zeta\"]\n[defaults]\nmodel = \"gpt-b\"",
    );

    let models = list_models(&config, &new_resolver(), None).await;
    let names: Vec<&str> = models.iter().map(|entry| entry.model.as_str()).collect();
    assert_eq!(names, vec!["zeta", "gpt-b", "gpt-a"]);

    let preferences = picker_preferences(&config);
    let lines: Vec<String> = models
        .iter()
        .map(|entry| format_model_line(entry, &preferences))
        .collect();
    assert_eq!(
        lines,
        vec![
            format!("* zeta\t{second}"),
            format!("> gpt-b\t{first}"),
            format!("  gpt-a\t{first}"),
        ]
    );

    let filtered = list_models(&config, &new_resolver(), Some("GPT-A")).await;
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].model, "gpt-a");
}

#[tokio::test]
async fn resolve_model_prints_serving_base_url() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = spawn_openai_server(&["gpt-test"], Vec::new());
    let config = config_for(dir.path(), &[&server], "");
    let resolver = new_resolver();

    assert_eq!(
        resolve_model(&config, &resolver, "gpt-test").await,
        Ok(server.clone())
    );
    assert_eq!(
        resolve_model(&config, &resolver, "missing").await,
        Err("No connection found for model \"missing\"".to_string())
    );
}

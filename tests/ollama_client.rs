//! Integration tests for the Ollama request path: retry classification,
//! model-not-found short-circuit, catalog soft failure, and the stale
//! model-id write-through.
//!
//! The server side is a scripted `tokio::net::TcpListener` that plays one
//! canned action per accepted connection. `Reset` reads the request and
//! then closes with SO_LINGER 0, producing an RST — the connection-reset
//! failure the client must classify as transient.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use notizbuch::client::{OllamaClient, RequestTimeouts, FALLBACK_MODEL, STALE_MODEL};
use notizbuch::config::{FileSettings, MemorySettings, ServerSettings, SettingsStore};
use notizbuch::models::ChatErrorKind;
use notizbuch::pipeline::Notebook;

enum Action {
    Respond { status: u16, body: &'static str },
    Reset,
    Stall { delay: Duration },
}

/// Bind a scripted server; each accepted connection consumes one action.
/// Returns the base URL and the raw requests the server saw.
async fn spawn_server(actions: Vec<Action>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    tokio::spawn(async move {
        for action in actions {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let request = read_request(&mut stream).await;
            seen.lock().unwrap().push(request);
            match action {
                Action::Respond { status, body } => {
                    let reason = match status {
                        200 => "OK",
                        404 => "Not Found",
                        500 => "Internal Server Error",
                        _ => "Error",
                    };
                    let response = format!(
                        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        reason,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
                Action::Reset => {
                    let _ = stream.set_linger(Some(Duration::from_secs(0)));
                    drop(stream);
                }
                Action::Stall { delay } => {
                    // Hold the connection open past the client's deadline,
                    // then answer normally.
                    tokio::time::sleep(delay).await;
                    let body = r#"{"response":"zu spät"}"#;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
            }
        }
    });

    (format!("http://{}", addr), requests)
}

/// Read one HTTP request (headers plus content-length body).
async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn settings_for(base_url: &str) -> ServerSettings {
    ServerSettings {
        base_url: base_url.to_string(),
        default_model: FALLBACK_MODEL.to_string(),
        auto_start: false,
    }
}

fn notebook_with(settings: ServerSettings) -> (Notebook, Arc<MemorySettings>) {
    let store = Arc::new(MemorySettings::new(settings));
    let notebook = Notebook::new(store.clone()).unwrap();
    (notebook, store)
}

#[tokio::test]
async fn chat_success_uses_a_single_attempt() {
    let (url, requests) = spawn_server(vec![Action::Respond {
        status: 200,
        body: r#"{"response":"Guten Tag"}"#,
    }])
    .await;
    let (notebook, _) = notebook_with(settings_for(&url));

    let outcome = notebook.send_chat("Hallo", None).await;
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.response.as_deref(), Some("Guten Tag"));
    assert!(outcome.error_kind.is_none());
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn chat_request_carries_payload_and_connection_close() {
    let (url, requests) = spawn_server(vec![Action::Respond {
        status: 200,
        body: r#"{"response":"ok"}"#,
    }])
    .await;
    let (notebook, _) = notebook_with(settings_for(&url));

    notebook.send_chat("Wie spät ist es?", Some("Meeting um 14 Uhr")).await;

    let seen = requests.lock().unwrap();
    let request = &seen[0];
    assert!(request.starts_with("POST /api/generate"));
    assert!(request.to_ascii_lowercase().contains("connection: close"));
    assert!(request.contains(r#""stream":false"#));
    assert!(request.contains("Kontext aus hochgeladener Datei"));
    assert!(request.contains("Benutzer-Frage: Wie spät ist es?"));
    assert!(request.contains(r#""temperature":0.7"#));
}

#[tokio::test]
async fn chat_retries_once_after_connection_reset() {
    let (url, requests) = spawn_server(vec![
        Action::Reset,
        Action::Respond {
            status: 200,
            body: r#"{"response":"Zweiter Versuch"}"#,
        },
    ])
    .await;
    let (notebook, _) = notebook_with(settings_for(&url));

    let outcome = notebook.send_chat("Hallo", None).await;
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.response.as_deref(), Some("Zweiter Versuch"));
    assert_eq!(requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn chat_reports_transient_when_both_attempts_fail() {
    let (url, requests) = spawn_server(vec![Action::Reset, Action::Reset]).await;
    let (notebook, _) = notebook_with(settings_for(&url));

    let outcome = notebook.send_chat("Hallo", None).await;
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ChatErrorKind::TransientConnection));
    assert!(outcome.error.is_some());
    assert_eq!(requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn chat_timeout_is_terminal_without_a_second_attempt() {
    // The script keeps a second response ready: if the client retried
    // after its deadline fired, the server would accept that connection
    // once the stall ends and record a second request.
    let (url, requests) = spawn_server(vec![
        Action::Stall {
            delay: Duration::from_millis(1000),
        },
        Action::Respond {
            status: 200,
            body: r#"{"response":"ok"}"#,
        },
    ])
    .await;
    let store = Arc::new(MemorySettings::new(settings_for(&url)));
    let timeouts = RequestTimeouts {
        chat: Duration::from_millis(200),
        chat_retry: Duration::from_millis(200),
        retry_delay: Duration::from_millis(50),
        ..RequestTimeouts::default()
    };
    let client = OllamaClient::with_timeouts(store, timeouts).unwrap();

    let err = client.generate("Hallo", None).await.unwrap_err();
    assert_eq!(err.kind(), ChatErrorKind::Timeout);

    // Wait out the stall and the would-be retry window before counting.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn model_not_found_short_circuits_without_retry() {
    let (url, requests) = spawn_server(vec![Action::Respond {
        status: 404,
        body: r#"{"error":"model 'phi4-mini:latest' not found, try pulling it first"}"#,
    }])
    .await;
    let (notebook, _) = notebook_with(settings_for(&url));

    let outcome = notebook.send_chat("Hallo", None).await;
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ChatErrorKind::ModelNotFound));
    let error = outcome.error.unwrap();
    assert!(error.contains("Modell \"phi4-mini:latest\" nicht gefunden"));
    assert!(error.contains("phi4-mini:latest, gemma3:latest"));
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn other_http_errors_are_terminal_and_unknown() {
    let (url, requests) = spawn_server(vec![Action::Respond {
        status: 500,
        body: r#"{"error":"loading model"}"#,
    }])
    .await;
    let (notebook, _) = notebook_with(settings_for(&url));

    let outcome = notebook.send_chat("Hallo", None).await;
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ChatErrorKind::Unknown));
    assert!(outcome.error.unwrap().contains("(HTTP 500)"));
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn stale_model_id_is_corrected_and_persists() {
    let (url, requests) = spawn_server(vec![Action::Respond {
        status: 200,
        body: r#"{"response":"ok"}"#,
    }])
    .await;
    let mut settings = settings_for(&url);
    settings.default_model = STALE_MODEL.to_string();
    let (notebook, store) = notebook_with(settings);

    let outcome = notebook.send_chat("Hallo", None).await;
    assert!(outcome.success);

    // Correction was applied before the request and written through.
    assert!(requests.lock().unwrap()[0].contains(FALLBACK_MODEL));
    assert_eq!(store.server().default_model, FALLBACK_MODEL);
}

#[tokio::test]
async fn stale_model_correction_is_written_to_the_settings_file() {
    let (url, _requests) = spawn_server(vec![Action::Respond {
        status: 200,
        body: r#"{"response":"ok"}"#,
    }])
    .await;

    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("notizbuch.toml");
    std::fs::write(
        &path,
        format!(
            "[server]\nbase_url = \"{}\"\ndefault_model = \"{}\"\nauto_start = false\n",
            url, STALE_MODEL
        ),
    )
    .unwrap();

    let store = Arc::new(FileSettings::load_or_init(&path).unwrap());
    let notebook = Notebook::new(store.clone()).unwrap();
    let outcome = notebook.send_chat("Hallo", None).await;
    assert!(outcome.success, "error: {:?}", outcome.error);

    // A fresh load of the file sees the corrected id.
    let reloaded = FileSettings::load_or_init(&path).unwrap();
    assert_eq!(reloaded.server().default_model, FALLBACK_MODEL);
}

#[tokio::test]
async fn list_models_parses_the_catalog() {
    let (url, requests) = spawn_server(vec![Action::Respond {
        status: 200,
        body: r#"{"models":[{"name":"phi4-mini:latest","size":2491874925},{"name":"gemma3:latest","size":3338801804}]}"#,
    }])
    .await;
    let (notebook, _) = notebook_with(settings_for(&url));

    let list = notebook.list_models().await;
    assert!(list.error.is_none());
    assert_eq!(list.models.len(), 2);
    assert_eq!(list.models[0].name, "phi4-mini:latest");
    assert_eq!(list.models[0].size, 2491874925);
    assert!(requests.lock().unwrap()[0].starts_with("GET /api/tags"));
}

#[tokio::test]
async fn list_models_treats_absent_array_as_empty() {
    let (url, _requests) = spawn_server(vec![Action::Respond {
        status: 200,
        body: "{}",
    }])
    .await;
    let (notebook, _) = notebook_with(settings_for(&url));

    let list = notebook.list_models().await;
    assert!(list.error.is_none());
    assert!(list.models.is_empty());
}

#[tokio::test]
async fn list_models_soft_fails_after_retry_exhaustion() {
    let (url, requests) = spawn_server(vec![Action::Reset, Action::Reset]).await;
    let (notebook, _) = notebook_with(settings_for(&url));

    let list = notebook.list_models().await;
    assert!(list.models.is_empty());
    assert!(list.error.is_some());
    assert_eq!(requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn server_probe_reports_reachability() {
    let (url, _requests) = spawn_server(vec![Action::Respond {
        status: 200,
        body: r#"{"models":[]}"#,
    }])
    .await;
    let (notebook, _) = notebook_with(settings_for(&url));
    assert!(notebook.check_server_reachable().await);

    // Nothing is listening on the port any more once the script is spent.
    let (gone, _) = notebook_with(settings_for("http://127.0.0.1:1"));
    assert!(!gone.check_server_reachable().await);
}

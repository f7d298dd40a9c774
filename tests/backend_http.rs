//! HTTP behavior of the remote and local backends against a scripted server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use study_insights::backend::{
    AnalysisBackend, BackendError, BackendRegistry, LocalBackend, RawBody, RemoteBackend,
};
use study_insights::cache::ResultCache;
use study_insights::config::{LocalBackendConfig, RemoteBackendConfig};
use study_insights::extract::Extractor;
use study_insights::models::{AnalysisParams, TextChunk};
use study_insights::orchestrator::{Pipeline, PipelineSettings, Upload};

struct Reply {
    status: u16,
    body: String,
}

fn reply(status: u16, body: serde_json::Value) -> Reply {
    Reply {
        status,
        body: body.to_string(),
    }
}

struct Captured {
    /// Request line and headers, lowercased.
    head: String,
    body: String,
}

struct ScriptedServer {
    url: String,
    requests: Arc<Mutex<Vec<Captured>>>,
}

impl ScriptedServer {
    /// Answer each incoming request with the next reply; 500 once exhausted.
    async fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);

        tokio::spawn(async move {
            let mut replies = replies.into_iter();
            while let Ok((mut socket, _)) = listener.accept().await {
                let (head, body) = read_request(&mut socket).await;
                log.lock().unwrap().push(Captured { head, body });
                let next = replies.next().unwrap_or(Reply {
                    status: 500,
                    body: "script exhausted".into(),
                });
                let response = format!(
                    "HTTP/1.1 {} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    next.status,
                    next.body.len(),
                    next.body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self {
            url: format!("http://{}", addr),
            requests,
        }
    }

    fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, i: usize) -> (String, String) {
        let requests = self.requests.lock().unwrap();
        (requests[i].head.clone(), requests[i].body.clone())
    }
}

async fn read_request(socket: &mut TcpStream) -> (String, String) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return (String::from_utf8_lossy(&buf).to_lowercase(), String::new());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let body_start = pos + 4;
            while buf.len() < body_start + length {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            return (head, String::from_utf8_lossy(&buf[body_start..]).to_string());
        }
    }
}

const ANSWER: &str =
    r#"{"topics":[{"name":"Kinematics","weight":0.6},{"name":"Dynamics","weight":0.4}],"summary":"Motion.","question_formats":["Numerical Problems"]}"#;

fn chat_completion(content: &str) -> serde_json::Value {
    json!({
        "id": "cmpl-1",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
    })
}

fn one_chunk() -> Vec<TextChunk> {
    let text = "Velocity is the rate of change of position.";
    vec![TextChunk {
        index: 0,
        start: 0,
        end: text.len(),
        context_start: 0,
        text: text.to_string(),
    }]
}

fn two_chunks() -> Vec<TextChunk> {
    let first = "a".repeat(30);
    let second = "b".repeat(10);
    vec![
        TextChunk {
            index: 0,
            start: 0,
            end: 30,
            context_start: 0,
            text: first,
        },
        TextChunk {
            index: 1,
            start: 30,
            end: 40,
            context_start: 30,
            text: second,
        },
    ]
}

fn remote(server: &ScriptedServer, max_retries: u32) -> RemoteBackend {
    let config = RemoteBackendConfig {
        url: server.url.clone(),
        model: "deepseek-chat".into(),
        api_key_env: "STUDY_HTTP_TEST_KEY".into(),
    };
    RemoteBackend::new(&config, Some("sk-test".into()), Duration::from_secs(5), max_retries)
        .unwrap()
}

fn local(server: &ScriptedServer, max_retries: u32) -> LocalBackend {
    let config = LocalBackendConfig {
        url: server.url.clone(),
        model: "llama2".into(),
    };
    LocalBackend::new(&config, Duration::from_secs(5), max_retries).unwrap()
}

#[tokio::test]
async fn remote_retries_rate_limit_then_reads_message_content() {
    let server = ScriptedServer::start(vec![
        reply(429, json!({"error": "slow down"})),
        reply(200, chat_completion(ANSWER)),
    ])
    .await;

    let raw = remote(&server, 1)
        .analyze(&one_chunk(), &AnalysisParams::default())
        .await
        .unwrap();

    assert_eq!(server.count(), 2);
    assert_eq!(raw.parts.len(), 1);
    assert_eq!(raw.parts[0].share, 1.0);
    assert_eq!(raw.parts[0].body, RawBody::Text(ANSWER.to_string()));

    let (head, body) = server.request(1);
    assert!(head.starts_with("post /chat/completions"));
    assert!(head.contains("authorization: bearer sk-test"));
    let sent: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(sent["model"], "deepseek-chat");
    assert_eq!(sent["response_format"]["type"], "json_object");
    assert_eq!(sent["messages"][0]["role"], "system");
}

#[tokio::test]
async fn remote_server_errors_exhaust_retries() {
    let server = ScriptedServer::start(vec![
        reply(503, json!({"error": "overloaded"})),
        reply(502, json!({"error": "bad gateway"})),
    ])
    .await;

    let err = remote(&server, 1)
        .analyze(&one_chunk(), &AnalysisParams::default())
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Http { status: 502, .. }), "{:?}", err);
    assert_eq!(server.count(), 2);
}

#[tokio::test]
async fn remote_auth_rejection_is_not_retried() {
    for status in [401, 403] {
        let server =
            ScriptedServer::start(vec![reply(status, json!({"error": "invalid key"}))]).await;

        let err = remote(&server, 3)
            .analyze(&one_chunk(), &AnalysisParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::Auth(s) if s == status), "{:?}", err);
        assert_eq!(server.count(), 1);
        assert!(!err.to_string().contains("sk-test"));
    }
}

#[tokio::test]
async fn remote_client_error_fails_immediately() {
    let long_body = "x".repeat(1000);
    let server = ScriptedServer::start(vec![Reply {
        status: 400,
        body: long_body,
    }])
    .await;

    let err = remote(&server, 3)
        .analyze(&one_chunk(), &AnalysisParams::default())
        .await
        .unwrap_err();

    match err {
        BackendError::Http { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body.len(), 300);
        }
        other => panic!("expected HTTP error, got {:?}", other),
    }
    assert_eq!(server.count(), 1);
}

#[tokio::test]
async fn remote_answer_without_content_is_malformed() {
    let server = ScriptedServer::start(vec![reply(200, json!({"choices": []}))]).await;

    let err = remote(&server, 0)
        .analyze(&one_chunk(), &AnalysisParams::default())
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Malformed(_)), "{:?}", err);
}

#[tokio::test]
async fn local_sends_one_request_per_chunk_with_shares() {
    let server = ScriptedServer::start(vec![
        reply(200, json!({"model": "llama2", "response": ANSWER, "done": true})),
        reply(200, json!({"model": "llama2", "response": "{\"topics\":[]}", "done": true})),
    ])
    .await;

    let raw = local(&server, 0)
        .analyze(&two_chunks(), &AnalysisParams::default())
        .await
        .unwrap();

    assert_eq!(server.count(), 2);
    assert_eq!(raw.parts.len(), 2);
    assert!((raw.parts[0].share - 0.75).abs() < 1e-9);
    assert!((raw.parts[1].share - 0.25).abs() < 1e-9);
    assert_eq!(raw.parts[0].body, RawBody::Text(ANSWER.to_string()));

    let (head, body) = server.request(1);
    assert!(head.starts_with("post /api/generate"));
    let sent: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(sent["format"], "json");
    assert_eq!(sent["stream"], false);
    assert!(sent["prompt"].as_str().unwrap().contains("excerpt 2 of 2"));
}

#[tokio::test]
async fn local_missing_response_field_is_malformed() {
    let server = ScriptedServer::start(vec![reply(200, json!({"done": true}))]).await;

    let err = local(&server, 0)
        .analyze(&one_chunk(), &AnalysisParams::default())
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Malformed(_)), "{:?}", err);
}

#[tokio::test]
async fn local_probe_and_model_listing() {
    let tags = json!({"models": [{"name": "llama2:latest"}, {"name": "mistral:7b"}]});
    let server = ScriptedServer::start(vec![reply(200, tags.clone()), reply(200, tags)]).await;
    let backend = local(&server, 0);

    assert!(backend.is_available().await);
    assert_eq!(
        backend.list_models().await.unwrap(),
        vec!["llama2:latest".to_string(), "mistral:7b".to_string()]
    );
    let (head, _) = server.request(0);
    assert!(head.starts_with("get /api/tags"));
}

#[tokio::test]
async fn pipeline_uses_local_backend_over_http() {
    let server = ScriptedServer::start(vec![
        reply(200, json!({"models": []})),
        reply(200, json!({"response": ANSWER, "done": true})),
    ])
    .await;

    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(local(&server, 0)));
    let pipeline = Pipeline::new(
        Extractor::new(),
        registry,
        ResultCache::in_memory(),
        PipelineSettings::default(),
    );

    let outcome = pipeline
        .process(
            &Upload::new("motion.txt", "txt", b"Velocity and acceleration.".to_vec()),
            "local",
            &AnalysisParams::default(),
        )
        .await;

    let record = outcome.result.unwrap();
    assert_eq!(record.backend_used, "local");
    assert!(!record.fallback_used);
    assert_eq!(record.topics[0].name, "Kinematics");
    assert_eq!(server.count(), 2);
}

use std::sync::{mpsc, Arc, Mutex};

use axum::Router;
use serde_json::Value;

use crate::ai::backend::{CompletionBackend, PromptContext};
use crate::ai::embeddings::EmbeddingBackend;
use crate::ai::AiError;
use crate::app::App;
use crate::config::Config;
use crate::db::Database;

/// Serve `router` on a random local port from a background thread.
/// Returns the base url. The server lives until the test process exits.
pub fn spawn_server(router: Router) -> String {
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build test runtime");

        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("failed to bind test server");
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, router).await.unwrap();
        });
    });

    let addr = rx.recv().expect("test server did not start");
    format!("http://{addr}")
}

/// Base url of a port nothing listens on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Requests seen by a test server, as (path, json body).
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<(String, Value)>>>);

impl Recorder {
    pub fn record(&self, path: &str, body: Value) {
        self.0.lock().unwrap().push((path.to_string(), body));
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.0.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|(path, _)| path).collect()
    }
}

/// Completion backend returning a fixed response and counting calls.
pub struct FakeCompletion {
    response: String,
    calls: Mutex<usize>,
}

impl FakeCompletion {
    pub fn new(response: &str) -> Arc<Self> {
        Arc::new(Self {
            response: response.to_string(),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl CompletionBackend for FakeCompletion {
    fn is_available(&self) -> bool {
        true
    }

    fn model_version(&self) -> String {
        "fake/v1".to_string()
    }

    fn generate_completion(&self, _: &str, _: &PromptContext) -> Result<String, AiError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.response.clone())
    }
}

pub const TEST_DIMENSIONS: usize = 4;

/// Deterministic embeddings: one axis per topic keyword.
pub struct TopicEmbeddings;

impl EmbeddingBackend for TopicEmbeddings {
    fn name(&self) -> &str {
        "topics"
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AiError> {
        Ok(texts
            .iter()
            .map(|text| {
                let text = text.to_lowercase();
                ["rust", "cook", "music"]
                    .iter()
                    .map(|topic| if text.contains(topic) { 1.0 } else { 0.0 })
                    .chain(std::iter::once(0.05))
                    .collect()
            })
            .collect())
    }
}

/// Isolated app in a temp directory with no AI backend configured.
/// Each test gets its own directory so parallel tests never collide.
pub fn create_app() -> (App, tempfile::TempDir) {
    create_app_with(|_| {})
}

pub fn create_app_with<F>(configure: F) -> (App, tempfile::TempDir)
where
    F: FnOnce(&mut Config),
{
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let mut config =
        Config::load_with_env(tmp.path(), |_| None).expect("failed to load config");
    config.embeddings.dimensions = TEST_DIMENSIONS;
    configure(&mut config);

    let db = Arc::new(Database::open(&config.db_path()).expect("failed to open database"));
    let app = App::with_parts(config, db, Box::new(TopicEmbeddings)).expect("failed to build app");
    (app, tmp)
}

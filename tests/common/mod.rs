//! Common test utilities for chan-dl integration tests

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use base64::Engine;
use chan_dl::{Config, Event, ProgressReporter, RetryConfig};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Base64 MD5 as the thread API reports it
pub fn md5_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(md5::compute(data).0)
}

/// Hex MD5 as the ledger stores it
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// A post with an attachment
pub fn post(tim: u64, ext: &str, filename: &str, body: &[u8]) -> Value {
    json!({
        "no": tim,
        "tim": tim,
        "ext": ext,
        "filename": filename,
        "md5": md5_base64(body),
    })
}

/// Config pointing both hosts at `server`, with millisecond retry delays
pub fn config_for(server: &MockServer, output_dir: &Path, retries: i32) -> Config {
    Config {
        output_dir: output_dir.to_path_buf(),
        connections: 4,
        retry: RetryConfig {
            retries,
            delay: Duration::from_millis(10),
            ..RetryConfig::default()
        },
        manifest_retry_delay: Duration::from_millis(10),
        api_base_url: server.uri(),
        media_base_url: server.uri(),
        ..Config::default()
    }
}

/// Serve the manifest for `/<board>/thread/<thread>.json`
pub async fn mount_thread(server: &MockServer, board: &str, thread: u64, posts: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(format!("/{}/thread/{}.json", board, thread)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "posts": posts })))
        .mount(server)
        .await;
}

/// Serve a media file, expecting exactly `expected_requests` requests
pub async fn mount_file(
    server: &MockServer,
    board: &str,
    name: &str,
    body: &[u8],
    expected_requests: u64,
) {
    Mock::given(method("GET"))
        .and(path(format!("/{}/{}", board, name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(expected_requests)
        .mount(server)
        .await;
}

/// Names of `.part` files directly inside `dir`
pub fn part_files(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".part"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Reporter that keeps every event
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<Event>>,
}

#[allow(dead_code)]
impl RecordingReporter {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

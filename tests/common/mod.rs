use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use personachat::ingest::IngestEvent;
use personachat::store::{ChatStore, StoreOptions};
use personachat::transport::fake::FakeTransport;
use personachat::StreamIngestor;
use tempfile::TempDir;
use tokio::sync::mpsc;

#[allow(dead_code)]
pub fn create_temp_store() -> (ChatStore, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let store = ChatStore::open(tmp.path().join("store"), StoreOptions::default())
        .expect("failed to open chat store");
    (store, tmp)
}

#[allow(dead_code)]
pub fn reopen_store(tmp: &TempDir, options: StoreOptions) -> ChatStore {
    ChatStore::open(tmp.path().join("store"), options).expect("failed to reopen chat store")
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// In-memory store, scripted transport and an ingestor wired to both
#[allow(dead_code)]
pub fn fake_ingestor() -> (Arc<ChatStore>, Arc<FakeTransport>, StreamIngestor) {
    let store = Arc::new(ChatStore::in_memory());
    let transport = Arc::new(FakeTransport::new());
    let ingestor = StreamIngestor::new(store.clone(), transport.clone());
    (store, transport, ingestor)
}

/// Waits for the next `Delta` event, skipping everything else
#[allow(dead_code)]
pub async fn next_delta(events: &mut mpsc::UnboundedReceiver<IngestEvent>) -> String {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(IngestEvent::Delta { text, .. }) => return text,
                Some(_) => continue,
                None => panic!("event channel closed before a delta arrived"),
            }
        }
    })
    .await
    .expect("timed out waiting for a delta")
}

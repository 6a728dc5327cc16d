//! Coordinator and organizer against a local registry: reruns, integrity, no-loss moves.

mod common;

use std::path::Path;
use std::sync::Arc;

use common::registry_server::RegistryServer;
use common::CountingTransport;
use phoenix_core::asset::{self, DownloadSummary};
use phoenix_core::coordinator::DownloadCoordinator;
use phoenix_core::fetcher::RetryingFetcher;
use phoenix_core::ledger::AssetLedger;
use phoenix_core::organize::OrganizerPipeline;
use phoenix_core::registry::RegistryClient;
use phoenix_core::retry::RetryPolicy;
use phoenix_core::storage::{model_files, PathClaims, StorageLayout};
use phoenix_core::transport::{AbortFlag, CurlTransport, Transport};
use sha2::{Digest, Sha256};
use tempfile::tempdir;
use walkdir::WalkDir;

fn serve_repo(server: &RegistryServer, body: &[u8], sha: &str) {
    server.json(
        "/api/models/acme/tiny-unet",
        serde_json::json!({
            "id": "acme/tiny-unet",
            "siblings": [
                { "rfilename": "README.md", "size": 12 },
                {
                    "rfilename": "tiny_unet.safetensors",
                    "size": body.len(),
                    "lfs": { "sha256": sha, "size": body.len() }
                }
            ]
        }),
    );
    server.file("/acme/tiny-unet/resolve/main/tiny_unet.safetensors", body.to_vec());
}

async fn download_and_organize(
    layout: &StorageLayout,
    transport: Arc<dyn Transport>,
    base: &str,
) -> DownloadSummary {
    let tuning = common::tuning(&layout.root, base);
    let cfg = common::config(tuning.clone(), &[("HF_REPOS_TO_DOWNLOAD", "acme/tiny-unet")]);
    let claims = Arc::new(PathClaims::new());
    let registry = Arc::new(RegistryClient::new(&tuning.registries, cfg.credentials.clone()));
    let fetcher = Arc::new(RetryingFetcher::new(
        transport,
        registry,
        RetryPolicy::from_config(&tuning.retry),
        &layout.staging,
        0,
        Arc::clone(&claims),
    ));
    let ledger = AssetLedger::open_at(layout.state.join("assets.db"))
        .await
        .unwrap();
    let coordinator = DownloadCoordinator::new(fetcher, Some(ledger), &layout.models, 2, true);
    let summary = coordinator.run(asset::plan(&cfg), AbortFlag::new()).await;

    let pipeline = OrganizerPipeline::new(&layout.models, claims);
    let staging = layout.staging.clone();
    tokio::task::spawn_blocking(move || pipeline.organize(Some(&staging)))
        .await
        .unwrap();
    summary
}

fn files_under(root: &Path) -> Vec<String> {
    if !root.exists() {
        return Vec::new();
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rerun_makes_no_network_calls() {
    let server = RegistryServer::start();
    let body = b"unet weights".repeat(4096);
    serve_repo(&server, &body, &hex::encode(Sha256::digest(&body)));

    let dir = tempdir().unwrap();
    let layout = StorageLayout::at(dir.path().join("root"), dir.path().join("staging"), false);
    layout.ensure_tree().unwrap();

    let curl: Arc<dyn Transport> = Arc::new(CurlTransport::default());
    let first = download_and_organize(&layout, Arc::clone(&curl), server.base()).await;
    assert_eq!(first.succeeded, 1);
    let placed = layout.models.join("unet/tiny_unet.safetensors");
    assert_eq!(std::fs::read(&placed).unwrap(), body);

    let counting = Arc::new(CountingTransport::new(curl));
    let transport: Arc<dyn Transport> = counting.clone();
    let hits_before = server.hits();
    let second = download_and_organize(&layout, transport, server.base()).await;
    assert_eq!(second.skipped, 1);
    assert_eq!(second.succeeded, 0);
    assert_eq!(counting.calls(), 0);
    assert_eq!(server.hits(), hits_before);
    assert_eq!(model_files(&layout.models).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn checksum_mismatch_leaves_staging_and_tree_clean() {
    let server = RegistryServer::start();
    let body = b"tampered weights".repeat(1024);
    serve_repo(&server, &body, &"ab".repeat(32));

    let dir = tempdir().unwrap();
    let layout = StorageLayout::at(dir.path().join("root"), dir.path().join("staging"), false);
    layout.ensure_tree().unwrap();

    let summary =
        download_and_organize(&layout, Arc::new(CurlTransport::default()), server.base()).await;
    assert_eq!(summary.failed, 1);
    assert!(files_under(&layout.staging).is_empty());
    assert!(model_files(&layout.models).is_empty());

    let ledger = AssetLedger::open_at(layout.state.join("assets.db"))
        .await
        .unwrap();
    assert!(ledger.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn organize_without_staging_is_a_no_op() {
    let dir = tempdir().unwrap();
    let models = dir.path().join("models");
    std::fs::create_dir_all(&models).unwrap();
    let pipeline = OrganizerPipeline::new(&models, Arc::new(PathClaims::new()));
    let summary = pipeline.organize(None);
    assert_eq!(summary.successful + summary.failed + summary.already_present, 0);
    let missing = dir.path().join("never-created");
    let summary = pipeline.organize(Some(&missing));
    assert_eq!(summary.successful + summary.failed, 0);
    assert!(!missing.exists());
}

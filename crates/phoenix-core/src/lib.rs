pub mod config;
pub mod context;
pub mod error;
pub mod logging;

// Fetch side: registries, transfers, verification, ledger.
pub mod asset;
pub mod checksum;
pub mod coordinator;
pub mod credentials;
pub mod fetcher;
pub mod ledger;
pub mod registry;
pub mod retry;
pub mod storage;
pub mod transport;

// Organize side: classification and relocation into the target tree.
pub mod classify;
pub mod organize;
pub mod relocate;

// Runtime side: services, background reconciliation, boot sequencing.
pub mod cleanup;
pub mod monitor;
pub mod network;
pub mod orchestrator;
pub mod plugins;
pub mod supervisor;

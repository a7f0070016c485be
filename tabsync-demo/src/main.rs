//! tabsync demo: two simulated tabs keeping a counter in step.
//!
//! Runs the same scenario over the in-memory `BroadcastChannel` and
//! `localStorage` hosts. Set `RUST_LOG=debug` to see transport traffic.

mod store;

use std::time::Duration;

use log::info;
use serde_json::json;
use tabsync_core::host::memory::{MemoryChannelHub, MemoryStorageHub};
use tabsync_core::{Host, Mutation, MutationSharer, Predicate, SharerOptions, SyncError};

use store::CounterStore;

async fn run(label: &str, tab_a: Host, tab_b: Host) -> Result<(), SyncError> {
    let predicate = Predicate::types(["increment", "decrement", "reset"]);

    let a = CounterStore::new("tab A");
    let b = CounterStore::new("tab B");
    let sharer_a = MutationSharer::with_host(SharerOptions::new(predicate.clone()), &tab_a)?;
    let sharer_b = MutationSharer::with_host(SharerOptions::new(predicate), &tab_b)?;
    let sub_a = sharer_a.install(a.clone())?;
    let sub_b = sharer_b.install(b.clone())?;
    info!("{label}: tabs sharing over {}", sharer_a.strategy().kind());

    a.dispatch(Mutation::bare("increment")).await;
    a.dispatch(Mutation::new("increment", json!(5))).await;
    b.dispatch(Mutation::new("decrement", json!(2))).await;

    // Delivery is scheduled on each tab's own task.
    tokio::time::sleep(Duration::from_millis(50)).await;
    info!("{label}: tab A = {}, tab B = {}", a.count(), b.count());

    sub_a.unsubscribe();
    sub_b.unsubscribe();
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let channels = MemoryChannelHub::new();
    if let Err(e) = run("BroadcastChannel", channels.host(), channels.host()).await {
        log::error!("Broadcast demo failed: {e}");
    }

    let storage = MemoryStorageHub::new();
    if let Err(e) = run("localStorage", storage.host(), storage.host()).await {
        log::error!("Storage demo failed: {e}");
    }
}

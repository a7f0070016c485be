//! A counter store standing in for one tab's application state.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::join_all;
use serde_json::{json, Value};
use tabsync_core::{Mutation, MutationHook, Store, Subscription};

pub struct CounterStore {
    name: &'static str,
    count: Mutex<i64>,
    hooks: Mutex<Vec<MutationHook>>,
}

impl CounterStore {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            count: Mutex::new(0),
            hooks: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self) -> i64 {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit a mutation originating in this tab.
    pub async fn dispatch(&self, mutation: Mutation) {
        let state = self.apply(&mutation);
        let hooks = self.hooks();
        let shared = join_all(hooks.iter().map(|hook| hook(&mutation, &state))).await;
        log::info!(
            "[{}] {} -> {state} (shared: {})",
            self.name,
            mutation.mutation_type,
            shared.iter().any(|s| *s)
        );
    }

    fn apply(&self, mutation: &Mutation) -> Value {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let by = mutation.payload.as_i64().unwrap_or(1);
        match mutation.mutation_type.as_str() {
            "increment" => *count += by,
            "decrement" => *count -= by,
            "reset" => *count = 0,
            other => log::warn!("[{}] unknown mutation '{other}'", self.name),
        }
        json!({ "count": *count })
    }

    fn hooks(&self) -> Vec<MutationHook> {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Store for CounterStore {
    fn subscribe(&self, hook: MutationHook) -> Subscription {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
        Subscription::noop()
    }

    fn commit(&self, mutation_type: &str, payload: Value) {
        let mutation = Mutation::new(mutation_type, payload);
        let state = self.apply(&mutation);
        log::info!("[{}] applied remote {mutation_type} -> {state}", self.name);
        for hook in self.hooks() {
            tokio::spawn(hook(&mutation, &state));
        }
    }
}

//! Browser host backed by `web-sys`.
//!
//! ```text
//!  window ──"storage"──► WebWindow ──► Listener<StorageEvent>
//!  window.localStorage ─► WebStorage (StorageArea)
//!  new BroadcastChannel(name) ─► WebChannel ──"message"──► Listener<Value>
//! ```
//!
//! Messages cross the JS boundary as JSON text: outbound values are parsed
//! into JS objects before `postMessage` so the structured clone carries
//! plain data, inbound `event.data` is stringified and read back with
//! `serde_json`.

use std::sync::Arc;

use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::error::{StorageError, SyncError};
use crate::host::{
    BroadcastChannel, BroadcastChannelFactory, Host, Listener, StorageArea, StorageEvent,
    StorageEventSource,
};
use crate::subscription::Subscription;

#[cfg(target_feature = "atomics")]
compile_error!("the web host requires single-threaded wasm32 (no atomics)");

/// Carries a JS handle behind the `Send + Sync` bounds of the host traits.
struct SingleThreaded<T>(T);

// SAFETY: without the atomics target feature a wasm32 module runs on exactly
// one thread, so the wrapped JS value is never touched concurrently.
unsafe impl<T> Send for SingleThreaded<T> {}
unsafe impl<T> Sync for SingleThreaded<T> {}

impl<T> SingleThreaded<T> {
    // Closures must call this rather than destructure, so they capture the
    // wrapper as a whole.
    fn into_inner(self) -> T {
        self.0
    }
}

/// Inspect the browser globals of the current context.
pub fn detect() -> Host {
    let mut host = Host::empty();

    if has_global("BroadcastChannel") {
        host = host.with_broadcast_channel(Arc::new(WebChannelFactory));
    }

    let Some(window) = web_sys::window() else {
        log::debug!("No window in this context");
        return host;
    };

    match window.local_storage() {
        Ok(Some(storage)) => {
            host = host.with_local_storage(Arc::new(WebStorage {
                storage: SingleThreaded(storage),
            }));
        }
        Ok(None) => log::debug!("localStorage is not exposed"),
        Err(e) => log::debug!("localStorage is inaccessible: {}", describe(&e)),
    }

    host.with_window(Arc::new(WebWindow {
        window: SingleThreaded(window),
    }))
}

fn has_global(name: &str) -> bool {
    js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str(name))
        .map(|value| value.is_function())
        .unwrap_or(false)
}

fn describe(value: &JsValue) -> String {
    if let Some(text) = value.as_string() {
        return text;
    }
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return format!("{}: {}", String::from(error.name()), String::from(error.message()));
    }
    format!("{value:?}")
}

fn storage_error(value: JsValue) -> StorageError {
    match value.dyn_ref::<js_sys::Error>().map(|e| String::from(e.name())) {
        Some(name) if name == "SecurityError" => StorageError::Disabled,
        _ => StorageError::Host(describe(&value)),
    }
}

fn channel_error(value: JsValue) -> SyncError {
    SyncError::Channel(describe(&value))
}

/// Attach `callback` to `target` for `event`.
///
/// The callback is owned by the JS heap from here on, so the listener stays
/// registered for the life of the page unless the returned handle is
/// unsubscribed. Dropping the handle only releases the JS references.
fn register(
    target: web_sys::EventTarget,
    event: &'static str,
    callback: JsValue,
) -> Result<Subscription, SyncError> {
    let callback: js_sys::Function = callback.unchecked_into();
    target
        .add_event_listener_with_callback(event, &callback)
        .map_err(channel_error)?;

    let registration = SingleThreaded((target, callback));
    Ok(Subscription::new(move || {
        let (target, callback) = registration.into_inner();
        if let Err(e) = target.remove_event_listener_with_callback(event, &callback) {
            log::warn!("Unable to remove {event} listener: {}", describe(&e));
        }
    }))
}

// ─── localStorage ───────────────────────────────────────────────────

pub struct WebStorage {
    storage: SingleThreaded<web_sys::Storage>,
}

impl StorageArea for WebStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage.0.get_item(key).map_err(storage_error)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.storage.0.set_item(key, value).map_err(storage_error)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.storage.0.remove_item(key).map_err(storage_error)
    }
}

// ─── window ─────────────────────────────────────────────────────────

pub struct WebWindow {
    window: SingleThreaded<web_sys::Window>,
}

impl StorageEventSource for WebWindow {
    fn add_storage_listener(
        &self,
        listener: Listener<StorageEvent>,
    ) -> Result<Subscription, SyncError> {
        let callback = Closure::<dyn FnMut(web_sys::StorageEvent)>::new(
            move |event: web_sys::StorageEvent| {
                listener(StorageEvent {
                    key: event.key(),
                    old_value: event.old_value(),
                    new_value: event.new_value(),
                });
            },
        );
        register(self.window.0.clone().into(), "storage", callback.into_js_value())
    }
}

// ─── BroadcastChannel ───────────────────────────────────────────────

pub struct WebChannelFactory;

impl BroadcastChannelFactory for WebChannelFactory {
    fn open(&self, name: &str) -> Result<Arc<dyn BroadcastChannel>, SyncError> {
        let channel = web_sys::BroadcastChannel::new(name).map_err(channel_error)?;
        Ok(Arc::new(WebChannel {
            channel: SingleThreaded(channel),
        }))
    }
}

pub struct WebChannel {
    channel: SingleThreaded<web_sys::BroadcastChannel>,
}

impl BroadcastChannel for WebChannel {
    fn post_message(&self, message: &Value) -> Result<(), SyncError> {
        let text = serde_json::to_string(message)?;
        let data = js_sys::JSON::parse(&text).map_err(channel_error)?;
        self.channel.0.post_message(&data).map_err(channel_error)
    }

    fn add_message_listener(&self, listener: Listener<Value>) -> Result<Subscription, SyncError> {
        let callback = Closure::<dyn FnMut(web_sys::MessageEvent)>::new(
            move |event: web_sys::MessageEvent| match read_message(&event.data()) {
                Ok(message) => listener(message),
                Err(e) => log::error!("Unable to read broadcast message: {e}"),
            },
        );
        register(self.channel.0.clone().into(), "message", callback.into_js_value())
    }
}

impl Drop for WebChannel {
    fn drop(&mut self) {
        self.channel.0.close();
    }
}

fn read_message(data: &JsValue) -> Result<Value, SyncError> {
    let text = js_sys::JSON::stringify(data).map_err(channel_error)?;
    match text.as_string() {
        Some(text) => Ok(serde_json::from_str(&text)?),
        // `undefined` has no JSON form
        None => Ok(Value::Null),
    }
}

//! Browser host tests. Run with `wasm-pack test --headless --firefox`.
#![cfg(all(target_arch = "wasm32", feature = "web"))]

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tabsync_core::host::web::WebChannelFactory;
use tabsync_core::host::BroadcastChannelFactory;
use wasm_bindgen_futures::JsFuture;
use wasm_bindgen_test::{wasm_bindgen_test, wasm_bindgen_test_configure};

wasm_bindgen_test_configure!(run_in_browser);

async fn sleep(ms: i32) {
    let promise = js_sys::Promise::new(&mut |resolve, _reject| {
        web_sys::window()
            .unwrap()
            .set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, ms)
            .unwrap();
    });
    JsFuture::from(promise).await.unwrap();
}

fn collect() -> (Arc<Mutex<Vec<Value>>>, tabsync_core::Listener<Value>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let listener: tabsync_core::Listener<Value> = Arc::new(move |message: Value| {
        sink.lock().unwrap().push(message);
    });
    (received, listener)
}

#[wasm_bindgen_test]
async fn test_channel_listener_survives_dropped_handle() {
    let a = WebChannelFactory.open("tabsync-web-drop").unwrap();
    let b = WebChannelFactory.open("tabsync-web-drop").unwrap();

    let (received, listener) = collect();
    drop(b.add_message_listener(listener).unwrap());

    a.post_message(&json!({"type": "increment"})).unwrap();
    a.post_message(&json!({"type": "decrement"})).unwrap();
    sleep(100).await;

    assert_eq!(
        *received.lock().unwrap(),
        vec![json!({"type": "increment"}), json!({"type": "decrement"})]
    );
}

#[wasm_bindgen_test]
async fn test_channel_unsubscribe_stops_delivery() {
    let a = WebChannelFactory.open("tabsync-web-unsub").unwrap();
    let b = WebChannelFactory.open("tabsync-web-unsub").unwrap();

    let (received, listener) = collect();
    let subscription = b.add_message_listener(listener).unwrap();

    a.post_message(&json!(1)).unwrap();
    sleep(100).await;
    subscription.unsubscribe();
    a.post_message(&json!(2)).unwrap();
    sleep(100).await;

    assert_eq!(*received.lock().unwrap(), vec![json!(1)]);
}

#[wasm_bindgen_test]
async fn test_channel_never_hears_itself() {
    let a = WebChannelFactory.open("tabsync-web-self").unwrap();
    let (received, listener) = collect();
    let _subscription = a.add_message_listener(listener).unwrap();

    a.post_message(&json!("ping")).unwrap();
    sleep(100).await;

    assert!(received.lock().unwrap().is_empty());
}

//! Scripts evaluated in the webview to answer bridge calls.
//!
//! The preload script installs `window.__ren3d_resolve(id, value, error)` and
//! `window.__ren3d_dispatch(channel, payload)`. JSON text is valid JavaScript
//! expression syntax, so payloads are spliced in as serialized JSON.

use crate::{BridgeError, BridgeResponse, KeyEvent, KEY_EVENT_CHANNEL};

/// Settle pending call `id` with a result value.
pub fn resolve_script(id: u64, response: &BridgeResponse) -> String {
    format!("window.__ren3d_resolve({}, {})", id, response.to_json())
}

/// Reject pending call `id` with an envelope error.
pub fn reject_script(id: u64, error: &BridgeError) -> String {
    let payload = serde_json::json!({
        "code": error.code(),
        "message": error.to_string(),
    });
    format!("window.__ren3d_resolve({}, null, {})", id, payload)
}

/// Deliver a forwarded key press to the renderer's key listener.
pub fn key_event_script(event: &KeyEvent) -> String {
    let payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
    let channel = serde_json::Value::String(KEY_EVENT_CHANNEL.to_string());
    format!("window.__ren3d_dispatch({}, {})", channel, payload)
}

/// Call a global renderer function by name with JSON arguments.
///
/// Used by menu items that drive renderer commands directly.
pub fn invoke_script(function: &str, args: &[serde_json::Value]) -> String {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    format!(
        "if (typeof window.{f} === 'function') {{ window.{f}({a}); }}",
        f = function,
        a = args.join(", ")
    )
}

//! ext_bridge - Capability bridge between the rendering context and the host.
//!
//! The webview is untrusted. Everything it can ask of the host process goes
//! through the fixed set of operations declared by [`BridgeOp`]; messages that
//! name any other operation, or carry arguments of the wrong shape, are
//! rejected before a handler ever sees them.
//!
//! Error codes: 9000-9099

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub mod renderer;

// ============================================================================
// Error Types (9000+ range)
// ============================================================================

/// Error codes for bridge envelope failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BridgeErrorCode {
    /// Message is not a valid `{id, op, args}` envelope
    MalformedEnvelope = 9000,
    /// Operation is not part of the bridge surface
    UnknownOperation = 9001,
    /// Arguments do not match the operation's declared shape
    InvalidArguments = 9002,
    /// Operation disabled by the capability checker
    PermissionDenied = 9003,
}

/// Envelope-level bridge errors.
///
/// Operation failures (a write that failed, a fetch that timed out) are not
/// errors at this level; they travel back as structured result values.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("[{code}] Malformed envelope: {message}")]
    MalformedEnvelope { code: u32, message: String },

    #[error("[{code}] Unknown operation: {op}")]
    UnknownOperation { code: u32, op: String },

    #[error("[{code}] Invalid arguments for {op}: {message}")]
    InvalidArguments {
        code: u32,
        op: BridgeOp,
        message: String,
    },

    #[error("[{code}] Permission denied: {message}")]
    PermissionDenied { code: u32, message: String },
}

impl BridgeError {
    pub fn malformed_envelope(message: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            code: BridgeErrorCode::MalformedEnvelope as u32,
            message: message.into(),
        }
    }

    pub fn unknown_operation(op: impl Into<String>) -> Self {
        Self::UnknownOperation {
            code: BridgeErrorCode::UnknownOperation as u32,
            op: op.into(),
        }
    }

    pub fn invalid_arguments(op: BridgeOp, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            code: BridgeErrorCode::InvalidArguments as u32,
            op,
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            code: BridgeErrorCode::PermissionDenied as u32,
            message: message.into(),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::MalformedEnvelope { code, .. }
            | Self::UnknownOperation { code, .. }
            | Self::InvalidArguments { code, .. }
            | Self::PermissionDenied { code, .. } => *code,
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Operations the rendering context may invoke on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BridgeOp {
    SaveFile,
    OpenFile,
    UpdateDocument,
    ReloadDocument,
    FetchUrl,
    QueryPlatform,
}

impl BridgeOp {
    pub const ALL: [BridgeOp; 6] = [
        BridgeOp::SaveFile,
        BridgeOp::OpenFile,
        BridgeOp::UpdateDocument,
        BridgeOp::ReloadDocument,
        BridgeOp::FetchUrl,
        BridgeOp::QueryPlatform,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeOp::SaveFile => "save-file",
            BridgeOp::OpenFile => "open-file",
            BridgeOp::UpdateDocument => "update-document",
            BridgeOp::ReloadDocument => "reload-document",
            BridgeOp::FetchUrl => "fetch-url",
            BridgeOp::QueryPlatform => "query-platform",
        }
    }
}

impl fmt::Display for BridgeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BridgeOp {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BridgeOp::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| BridgeError::unknown_operation(s))
    }
}

/// Channel name of the single host-to-renderer event.
pub const KEY_EVENT_CHANNEL: &str = "receive-key-event";

// ============================================================================
// Argument Types
// ============================================================================

/// File filter for dialogs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileFilter {
    pub name: String,
    pub extensions: Vec<String>,
}

impl FileFilter {
    pub fn new(name: impl Into<String>, extensions: &[&str]) -> Self {
        Self {
            name: name.into(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SaveFileArgs {
    pub default_name: String,
    pub content: String,
    #[serde(default)]
    pub filters: Option<Vec<FileFilter>>,
    #[serde(default)]
    pub existing_path: Option<String>,
    #[serde(default)]
    pub save_as: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateDocumentArgs {
    pub html_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FetchUrlArgs {
    pub url: String,
}

/// A validated bridge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCall {
    SaveFile(SaveFileArgs),
    OpenFile,
    UpdateDocument(UpdateDocumentArgs),
    ReloadDocument,
    FetchUrl(FetchUrlArgs),
    QueryPlatform,
}

impl BridgeCall {
    pub fn op(&self) -> BridgeOp {
        match self {
            BridgeCall::SaveFile(_) => BridgeOp::SaveFile,
            BridgeCall::OpenFile => BridgeOp::OpenFile,
            BridgeCall::UpdateDocument(_) => BridgeOp::UpdateDocument,
            BridgeCall::ReloadDocument => BridgeOp::ReloadDocument,
            BridgeCall::FetchUrl(_) => BridgeOp::FetchUrl,
            BridgeCall::QueryPlatform => BridgeOp::QueryPlatform,
        }
    }

    /// Build a call from an operation name and its raw arguments.
    pub fn from_parts(op: &str, args: serde_json::Value) -> Result<Self, BridgeError> {
        let op: BridgeOp = op.parse()?;
        match op {
            BridgeOp::SaveFile => parse_args(op, args).map(BridgeCall::SaveFile),
            BridgeOp::UpdateDocument => parse_args(op, args).map(BridgeCall::UpdateDocument),
            BridgeOp::FetchUrl => parse_args(op, args).map(BridgeCall::FetchUrl),
            BridgeOp::OpenFile => expect_no_args(op, args).map(|_| BridgeCall::OpenFile),
            BridgeOp::ReloadDocument => {
                expect_no_args(op, args).map(|_| BridgeCall::ReloadDocument)
            }
            BridgeOp::QueryPlatform => expect_no_args(op, args).map(|_| BridgeCall::QueryPlatform),
        }
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(
    op: BridgeOp,
    args: serde_json::Value,
) -> Result<T, BridgeError> {
    serde_json::from_value(args).map_err(|e| BridgeError::invalid_arguments(op, e.to_string()))
}

fn expect_no_args(op: BridgeOp, args: serde_json::Value) -> Result<(), BridgeError> {
    match args {
        serde_json::Value::Null => Ok(()),
        serde_json::Value::Object(map) if map.is_empty() => Ok(()),
        other => Err(BridgeError::invalid_arguments(
            op,
            format!("operation takes no arguments, got {}", other),
        )),
    }
}

/// Raw message posted by the preload script.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub id: u64,
    pub op: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl Envelope {
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(raw).map_err(|e| BridgeError::malformed_envelope(e.to_string()))
    }

    pub fn into_call(self) -> Result<BridgeCall, BridgeError> {
        BridgeCall::from_parts(&self.op, self.args)
    }
}

/// Numeric `id` of a message that failed envelope parsing, if it has one.
fn recover_id(raw: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()?
        .get("id")?
        .as_u64()
}

// ============================================================================
// Result Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFileResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SaveFileResult {
    pub fn saved(file_path: impl Into<String>) -> Self {
        Self {
            ok: true,
            file_path: Some(file_path.into()),
            error: None,
        }
    }

    /// Dialog dismissed or no target path: failure without detail.
    pub fn cancelled() -> Self {
        Self {
            ok: false,
            file_path: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            file_path: None,
            error: Some(error.into()),
        }
    }
}

/// File picked through the open dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenedFile {
    pub name: String,
    pub path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateResult {
    pub fn applied() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FetchResult {
    pub fn fetched(data: impl Into<String>) -> Self {
        Self {
            ok: true,
            data: Some(data.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Response to a validated call, one variant per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeResponse {
    SaveFile(SaveFileResult),
    OpenFile(Option<OpenedFile>),
    UpdateDocument(UpdateResult),
    ReloadDocument,
    FetchUrl(FetchResult),
    QueryPlatform(String),
}

impl BridgeResponse {
    pub fn to_json(&self) -> serde_json::Value {
        let value = match self {
            BridgeResponse::SaveFile(r) => serde_json::to_value(r),
            BridgeResponse::OpenFile(r) => serde_json::to_value(r),
            BridgeResponse::UpdateDocument(r) => serde_json::to_value(r),
            BridgeResponse::ReloadDocument => Ok(serde_json::Value::Null),
            BridgeResponse::FetchUrl(r) => serde_json::to_value(r),
            BridgeResponse::QueryPlatform(p) => Ok(serde_json::Value::String(p.clone())),
        };
        // Every result type is plain strings, bools and byte vectors.
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// Normalized key press forwarded from the host to the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    pub key: String,
    pub shift_held: bool,
}

// ============================================================================
// Platform
// ============================================================================

/// Host platform, reported with node-style identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Darwin,
    Win32,
    Linux,
    Other(&'static str),
}

impl Platform {
    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &'static str) -> Self {
        match os {
            "macos" => Platform::Darwin,
            "windows" => Platform::Win32,
            "linux" => Platform::Linux,
            other => Platform::Other(other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Darwin => "darwin",
            Platform::Win32 => "win32",
            Platform::Linux => "linux",
            Platform::Other(os) => os,
        }
    }

    /// Whether the process stays alive with no windows open.
    pub fn stays_resident(&self) -> bool {
        matches!(self, Platform::Darwin)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Handler & Capability Checker
// ============================================================================

/// Host side of the bridge. Implementations convert every failure into the
/// operation's result type; nothing here returns an error.
#[async_trait]
pub trait BridgeHandler: Send + Sync {
    async fn save_file(&self, args: SaveFileArgs) -> SaveFileResult;
    async fn open_file(&self) -> Option<OpenedFile>;
    async fn update_document(&self, html_content: String) -> UpdateResult;
    async fn reload_document(&self);
    async fn fetch_url(&self, url: String) -> FetchResult;
    fn platform(&self) -> Platform;
}

/// Capability checker trait for bridge operations
pub trait BridgeCapabilityChecker: Send + Sync {
    fn check_op(&self, op: BridgeOp) -> Result<(), String>;
    fn check_fetch(&self, host: &str) -> Result<(), String>;
}

/// Default permissive checker (for dev mode)
pub struct PermissiveBridgeChecker;

impl BridgeCapabilityChecker for PermissiveBridgeChecker {
    fn check_op(&self, _op: BridgeOp) -> Result<(), String> {
        Ok(())
    }
    fn check_fetch(&self, _host: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Extract `host[:port]` from a URL for capability checking.
///
/// The port is only included when it differs from the scheme default.
pub fn extract_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host.to_string()),
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// Validates, authorizes and dispatches renderer calls to a [`BridgeHandler`].
pub struct Bridge<H> {
    handler: Arc<H>,
    checker: Arc<dyn BridgeCapabilityChecker>,
}

impl<H> Clone for Bridge<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            checker: self.checker.clone(),
        }
    }
}

impl<H: BridgeHandler> Bridge<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            checker: Arc::new(PermissiveBridgeChecker),
        }
    }

    pub fn with_checker(mut self, checker: Arc<dyn BridgeCapabilityChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Dispatch a validated call.
    pub async fn dispatch(&self, call: BridgeCall) -> Result<BridgeResponse, BridgeError> {
        let op = call.op();
        self.checker
            .check_op(op)
            .map_err(BridgeError::permission_denied)?;

        debug!(op = %op, "bridge.dispatch");

        let response = match call {
            BridgeCall::SaveFile(args) => BridgeResponse::SaveFile(self.handler.save_file(args).await),
            BridgeCall::OpenFile => BridgeResponse::OpenFile(self.handler.open_file().await),
            BridgeCall::UpdateDocument(args) => {
                BridgeResponse::UpdateDocument(self.handler.update_document(args.html_content).await)
            }
            BridgeCall::ReloadDocument => {
                self.handler.reload_document().await;
                BridgeResponse::ReloadDocument
            }
            BridgeCall::FetchUrl(args) => {
                // Unparseable URLs fall through; the fetcher reports them.
                let denied = extract_host(&args.url)
                    .map(|host| self.checker.check_fetch(&host))
                    .and_then(Result::err);
                match denied {
                    Some(reason) => {
                        warn!(url = %args.url, "fetch-url blocked by capabilities");
                        BridgeResponse::FetchUrl(FetchResult::failed(reason))
                    }
                    None => BridgeResponse::FetchUrl(self.handler.fetch_url(args.url).await),
                }
            }
            BridgeCall::QueryPlatform => {
                BridgeResponse::QueryPlatform(self.handler.platform().as_str().to_string())
            }
        };

        Ok(response)
    }

    /// Handle one raw message from the preload script.
    ///
    /// Returns the script that settles the renderer's pending promise, or
    /// `None` when the message has no usable id to answer.
    pub async fn handle_message(&self, raw: &str) -> Option<String> {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                return match recover_id(raw) {
                    Some(id) => {
                        warn!(id, error = %e, "Rejecting malformed bridge message");
                        Some(renderer::reject_script(id, &e))
                    }
                    None => {
                        warn!(error = %e, "Dropping bridge message");
                        None
                    }
                };
            }
        };

        let id = envelope.id;
        let result = match envelope.into_call() {
            Ok(call) => self.dispatch(call).await,
            Err(e) => Err(e),
        };

        Some(match result {
            Ok(response) => renderer::resolve_script(id, &response),
            Err(e) => {
                warn!(id, error = %e, "Bridge call rejected");
                renderer::reject_script(id, &e)
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BridgeHandler for RecordingHandler {
        async fn save_file(&self, args: SaveFileArgs) -> SaveFileResult {
            self.record("save-file");
            SaveFileResult::saved(format!("/tmp/{}", args.default_name))
        }

        async fn open_file(&self) -> Option<OpenedFile> {
            self.record("open-file");
            None
        }

        async fn update_document(&self, html_content: String) -> UpdateResult {
            self.record("update-document");
            if html_content.is_empty() {
                UpdateResult::failed("empty")
            } else {
                UpdateResult::applied()
            }
        }

        async fn reload_document(&self) {
            self.record("reload-document");
        }

        async fn fetch_url(&self, url: String) -> FetchResult {
            self.record("fetch-url");
            FetchResult::fetched(url)
        }

        fn platform(&self) -> Platform {
            Platform::Linux
        }
    }

    struct DenyingChecker;

    impl BridgeCapabilityChecker for DenyingChecker {
        fn check_op(&self, op: BridgeOp) -> Result<(), String> {
            if op == BridgeOp::UpdateDocument {
                Err("update-document is disabled".to_string())
            } else {
                Ok(())
            }
        }

        fn check_fetch(&self, host: &str) -> Result<(), String> {
            if host == "updates.ren3d.app" {
                Ok(())
            } else {
                Err(format!("host {} not allowed", host))
            }
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(BridgeErrorCode::MalformedEnvelope as u32, 9000);
        assert_eq!(BridgeErrorCode::UnknownOperation as u32, 9001);
        assert_eq!(BridgeErrorCode::InvalidArguments as u32, 9002);
        assert_eq!(BridgeErrorCode::PermissionDenied as u32, 9003);

        let err = BridgeError::unknown_operation("spawn-process");
        assert_eq!(err.code(), 9001);
        assert!(err.to_string().contains("spawn-process"));
    }

    #[test]
    fn test_op_names_round_trip() {
        for op in BridgeOp::ALL {
            assert_eq!(op.as_str().parse::<BridgeOp>().unwrap(), op);
        }
        assert!("exec".parse::<BridgeOp>().is_err());
    }

    #[test]
    fn test_parse_save_file_envelope() {
        let raw = r#"{"id":7,"op":"save-file","args":{"defaultName":"part.stl","content":"solid x","saveAs":true}}"#;
        let envelope = Envelope::parse(raw).unwrap();
        assert_eq!(envelope.id, 7);

        match envelope.into_call().unwrap() {
            BridgeCall::SaveFile(args) => {
                assert_eq!(args.default_name, "part.stl");
                assert_eq!(args.content, "solid x");
                assert!(args.save_as);
                assert!(args.existing_path.is_none());
                assert!(args.filters.is_none());
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let err = BridgeCall::from_parts(
            "save-file",
            serde_json::json!({"defaultName": "a.obj", "content": "", "mode": 755}),
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArguments { op: BridgeOp::SaveFile, .. }));
    }

    #[test]
    fn test_rejects_wrong_types() {
        let err =
            BridgeCall::from_parts("fetch-url", serde_json::json!({"url": 42})).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArguments { op: BridgeOp::FetchUrl, .. }));
    }

    #[test]
    fn test_argless_ops() {
        assert_eq!(
            BridgeCall::from_parts("open-file", serde_json::Value::Null).unwrap(),
            BridgeCall::OpenFile
        );
        assert_eq!(
            BridgeCall::from_parts("reload-document", serde_json::json!({})).unwrap(),
            BridgeCall::ReloadDocument
        );
        assert!(BridgeCall::from_parts("query-platform", serde_json::json!({"x": 1})).is_err());
    }

    #[test]
    fn test_malformed_envelope() {
        assert!(matches!(
            Envelope::parse("not json"),
            Err(BridgeError::MalformedEnvelope { .. })
        ));
        assert!(matches!(
            Envelope::parse(r#"{"id":1,"op":"open-file","extra":true}"#),
            Err(BridgeError::MalformedEnvelope { .. })
        ));
    }

    #[test]
    fn test_result_shapes() {
        assert_eq!(
            BridgeResponse::SaveFile(SaveFileResult::saved("/a/b.stl")).to_json(),
            serde_json::json!({"ok": true, "filePath": "/a/b.stl"})
        );
        assert_eq!(
            BridgeResponse::SaveFile(SaveFileResult::cancelled()).to_json(),
            serde_json::json!({"ok": false})
        );
        assert_eq!(
            BridgeResponse::OpenFile(None).to_json(),
            serde_json::Value::Null
        );
        assert_eq!(
            BridgeResponse::FetchUrl(FetchResult::failed("Too many redirects")).to_json(),
            serde_json::json!({"ok": false, "error": "Too many redirects"})
        );
        assert_eq!(
            BridgeResponse::UpdateDocument(UpdateResult::applied()).to_json(),
            serde_json::json!({"ok": true})
        );
        assert_eq!(
            BridgeResponse::QueryPlatform("darwin".into()).to_json(),
            serde_json::json!("darwin")
        );
    }

    #[test]
    fn test_key_event_serialization() {
        let event = KeyEvent {
            key: "C".to_string(),
            shift_held: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({"key": "C", "shiftHeld": true}));
    }

    #[test]
    fn test_platform_identifiers() {
        assert_eq!(Platform::from_os("macos").as_str(), "darwin");
        assert_eq!(Platform::from_os("windows").as_str(), "win32");
        assert_eq!(Platform::from_os("linux").as_str(), "linux");
        assert_eq!(Platform::from_os("freebsd").as_str(), "freebsd");
        assert!(Platform::Darwin.stays_resident());
        assert!(!Platform::Win32.stays_resident());
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("https://example.com/path").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            extract_host("https://example.com:8443/path").as_deref(),
            Some("example.com:8443")
        );
        assert_eq!(
            extract_host("https://api.example.com:443/v1").as_deref(),
            Some("api.example.com")
        );
        assert_eq!(extract_host("not a url"), None);
    }

    #[tokio::test]
    async fn test_dispatch_delegates() {
        let handler = Arc::new(RecordingHandler::default());
        let bridge = Bridge::new(handler.clone());

        let response = bridge.dispatch(BridgeCall::QueryPlatform).await.unwrap();
        assert_eq!(response, BridgeResponse::QueryPlatform("linux".into()));

        let response = bridge.dispatch(BridgeCall::ReloadDocument).await.unwrap();
        assert_eq!(response, BridgeResponse::ReloadDocument);
        assert_eq!(handler.calls(), vec!["reload-document"]);
    }

    #[tokio::test]
    async fn test_dispatch_denied_op_never_reaches_handler() {
        let handler = Arc::new(RecordingHandler::default());
        let bridge = Bridge::new(handler.clone()).with_checker(Arc::new(DenyingChecker));

        let err = bridge
            .dispatch(BridgeCall::UpdateDocument(UpdateDocumentArgs {
                html_content: "<html></html>".into(),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::PermissionDenied { .. }));
        assert!(handler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_host_check() {
        let handler = Arc::new(RecordingHandler::default());
        let bridge = Bridge::new(handler.clone()).with_checker(Arc::new(DenyingChecker));

        let blocked = bridge
            .dispatch(BridgeCall::FetchUrl(FetchUrlArgs {
                url: "https://evil.example/index.html".into(),
            }))
            .await
            .unwrap();
        match blocked {
            BridgeResponse::FetchUrl(result) => {
                assert!(!result.ok);
                assert!(result.error.unwrap().contains("evil.example"));
            }
            other => panic!("unexpected response: {:?}", other),
        }
        assert!(handler.calls().is_empty());

        let allowed = bridge
            .dispatch(BridgeCall::FetchUrl(FetchUrlArgs {
                url: "https://updates.ren3d.app/index.html".into(),
            }))
            .await
            .unwrap();
        assert!(matches!(allowed, BridgeResponse::FetchUrl(FetchResult { ok: true, .. })));
        assert_eq!(handler.calls(), vec!["fetch-url"]);
    }

    #[tokio::test]
    async fn test_handle_message_scripts() {
        let handler = Arc::new(RecordingHandler::default());
        let bridge = Bridge::new(handler.clone());

        let script = bridge
            .handle_message(r#"{"id":3,"op":"update-document","args":{"htmlContent":"<p>"}}"#)
            .await
            .unwrap();
        assert!(script.contains("__ren3d_resolve(3"));
        assert!(script.contains(r#"{"ok":true}"#));

        let script = bridge
            .handle_message(r#"{"id":4,"op":"spawn","args":{}}"#)
            .await
            .unwrap();
        assert!(script.contains("__ren3d_resolve(4, null"));
        assert!(script.contains("9001"));

        assert!(bridge.handle_message("{").await.is_none());
        assert_eq!(handler.calls(), vec!["update-document"]);
    }

    #[tokio::test]
    async fn test_malformed_envelope_with_id_is_rejected() {
        let handler = Arc::new(RecordingHandler::default());
        let bridge = Bridge::new(handler.clone());

        let script = bridge
            .handle_message(r#"{"id":5,"op":"open-file","extra":1}"#)
            .await
            .expect("caller 5 must be settled");
        assert!(script.starts_with("window.__ren3d_resolve(5, null, "));
        assert!(script.contains("9000"));

        let script = bridge
            .handle_message(r#"{"id":6,"op":7}"#)
            .await
            .expect("caller 6 must be settled");
        assert!(script.starts_with("window.__ren3d_resolve(6, null, "));
        assert!(script.contains("9000"));

        assert!(bridge.handle_message(r#"{"id":"x","op":"open-file"}"#).await.is_none());
        assert!(bridge.handle_message(r#"[1,2]"#).await.is_none());
        assert!(handler.calls().is_empty());
    }
}

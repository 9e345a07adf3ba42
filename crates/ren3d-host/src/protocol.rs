//! `app://` protocol: the active UI document plus bundled assets.

use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use ext_updater::UpdateStore;
use wry::http::header::{
    HeaderValue, CACHE_CONTROL, CONTENT_SECURITY_POLICY, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS,
};
use wry::http::{Response, StatusCode};

/// Production policy. The editor is a single page with inline scripts that
/// pulls its 3D libraries from public CDNs.
const CSP: &str = "default-src 'self' app:; \
     script-src 'self' app: 'unsafe-inline' https://unpkg.com https://cdn.jsdelivr.net https://cdnjs.cloudflare.com; \
     style-src 'self' app: 'unsafe-inline' https://unpkg.com https://cdn.jsdelivr.net https://fonts.googleapis.com; \
     img-src 'self' app: data: blob:; \
     font-src 'self' app: data: https://fonts.gstatic.com; \
     connect-src 'self' app: blob: data:; \
     worker-src 'self' app: blob:;";

const CSP_DEV: &str = "default-src 'self' app:; \
     script-src 'self' app: 'unsafe-inline' 'unsafe-eval' https:; \
     style-src 'self' app: 'unsafe-inline' https:; \
     img-src 'self' app: data: blob: https:; \
     font-src 'self' app: data: https:; \
     connect-src 'self' app: blob: data: http://localhost:* http://127.0.0.1:* https:; \
     worker-src 'self' app: blob:;";

pub fn mime_for(path: &str) -> &'static str {
    match Path::new(path).extension().and_then(|s| s.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        Some("wasm") => "application/wasm",
        Some("stl") => "model/stl",
        Some("obj") => "model/obj",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Navigations the window may perform itself.
pub fn is_app_url(url: &str) -> bool {
    url.starts_with("app://")
        || url.starts_with("http://app.localhost")
        || url.starts_with("https://app.localhost")
        || url.starts_with("about:")
        || url.starts_with("blob:")
        || url.starts_with("data:")
}

/// Links handed to the system browser instead of a webview.
pub fn is_external_url(url: &str) -> bool {
    !is_app_url(url)
        && (url.starts_with("http://") || url.starts_with("https://") || url.starts_with("mailto:"))
}

pub struct AppProtocol {
    store: Arc<UpdateStore>,
    /// Directory holding the bundled document and its assets.
    asset_root: PathBuf,
    document_name: String,
    dev_mode: bool,
}

impl AppProtocol {
    pub fn new(store: Arc<UpdateStore>, dev_mode: bool) -> Self {
        let bundled = store.bundled_path();
        let asset_root = bundled.parent().map(Path::to_path_buf).unwrap_or_default();
        let document_name = bundled
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| ext_updater::DOCUMENT_FILE.to_string());

        Self {
            store,
            asset_root,
            document_name,
            dev_mode,
        }
    }

    /// File backing a request path, or `None` for paths that escape the
    /// asset root.
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let mut path = request_path.trim_start_matches('/').trim_end_matches('/');

        // Relative URLs resolved against "index.html/" by some webviews
        if let Some((first, rest)) = path.split_once('/') {
            if first.ends_with(".html") || first.ends_with(".htm") {
                path = rest;
            }
        }

        if path.is_empty() || path == ext_updater::DOCUMENT_FILE || path == self.document_name {
            return Some(self.store.resolve_active().path().to_path_buf());
        }

        let relative = Path::new(path);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.asset_root.join(relative))
    }

    pub fn respond(&self, request_path: &str) -> Response<Cow<'static, [u8]>> {
        let Some(file) = self.resolve(request_path) else {
            tracing::warn!(path = %request_path, "Rejected path outside the app bundle");
            return text_response(StatusCode::FORBIDDEN, "Forbidden");
        };

        match std::fs::read(&file) {
            Ok(bytes) => {
                tracing::debug!(path = %request_path, file = %file.display(), "Protocol hit");
                let mut response = Response::new(Cow::Owned(bytes));
                let headers = response.headers_mut();
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static(mime_for(&file.to_string_lossy())),
                );
                headers.insert(
                    CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static(if self.dev_mode { CSP_DEV } else { CSP }),
                );
                headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
                // Reloads after an update must not see a cached document.
                headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
                response
            }
            Err(e) => {
                tracing::debug!(file = %file.display(), error = %e, "Protocol miss");
                text_response(StatusCode::NOT_FOUND, &format!("Not found: {}", request_path))
            }
        }
    }
}

fn text_response(status: StatusCode, body: &str) -> Response<Cow<'static, [u8]>> {
    let mut response = Response::new(Cow::Owned(body.as_bytes().to_vec()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use ext_updater::UpdatePayload;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<UpdateStore>,
        protocol: AppProtocol,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let web = dir.path().join("app").join("web");
        std::fs::create_dir_all(web.join("js")).unwrap();
        std::fs::write(web.join("index.html"), "<html>bundled</html>").unwrap();
        std::fs::write(web.join("js").join("editor.js"), "newScene();").unwrap();
        std::fs::write(dir.path().join("app").join("ren3d.toml"), "secret").unwrap();

        let store = Arc::new(UpdateStore::new(
            web.join("index.html"),
            dir.path().join("data").join("ui"),
        ));
        let protocol = AppProtocol::new(store.clone(), false);
        Fixture {
            _dir: dir,
            store,
            protocol,
        }
    }

    fn body(response: &Response<Cow<'static, [u8]>>) -> String {
        String::from_utf8(response.body().to_vec()).unwrap()
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_for("index.html"), "text/html; charset=utf-8");
        assert_eq!(mime_for("a/b/c.mjs"), "text/javascript; charset=utf-8");
        assert_eq!(mime_for("Makefile"), "application/octet-stream");
    }

    #[test]
    fn test_url_classification() {
        assert!(is_app_url("app://localhost/index.html"));
        assert!(is_app_url("http://app.localhost/index.html"));
        assert!(is_app_url("about:blank"));
        assert!(!is_app_url("https://github.com/ren3d"));

        assert!(is_external_url("https://github.com/ren3d"));
        assert!(is_external_url("mailto:team@ren3d.app"));
        assert!(!is_external_url("http://app.localhost/help.html"));
        assert!(!is_external_url("file:///etc/passwd"));
    }

    #[test]
    fn test_serves_bundled_document_and_assets() {
        let f = fixture();
        let response = f.protocol.respond("/index.html");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(&response), "<html>bundled</html>");
        assert!(response.headers().contains_key(CONTENT_SECURITY_POLICY));
        assert_eq!(response.headers()[CACHE_CONTROL], "no-store");

        assert_eq!(body(&f.protocol.respond("/")), "<html>bundled</html>");
        assert_eq!(body(&f.protocol.respond("/js/editor.js")), "newScene();");
        assert_eq!(body(&f.protocol.respond("/index.html/js/editor.js")), "newScene();");
    }

    #[tokio::test]
    async fn test_serves_override_after_update() {
        let f = fixture();
        f.store
            .apply_update(UpdatePayload::direct("<html>v2</html>"))
            .await
            .unwrap();
        assert_eq!(body(&f.protocol.respond("/index.html")), "<html>v2</html>");
        // Assets still come from the bundle.
        assert_eq!(body(&f.protocol.respond("/js/editor.js")), "newScene();");
    }

    #[test]
    fn test_traversal_rejected() {
        let f = fixture();
        assert_eq!(f.protocol.resolve("/../ren3d.toml"), None);
        assert_eq!(f.protocol.resolve("/js/../../ren3d.toml"), None);
        assert_eq!(
            f.protocol.respond("/../ren3d.toml").status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_missing_asset() {
        let f = fixture();
        let response = f.protocol.respond("/missing.png");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body(&response), "Not found: /missing.png");
    }
}

//! Session controller.
//!
//! A plain state machine: the host feeds it lifecycle events and executes the
//! [`SessionAction`]s it returns. It owns no window and touches no OS state,
//! so independent sessions can run side by side in tests.

use ext_bridge::{renderer, KeyEvent, Platform};
use tracing::{debug, info};

use crate::keys::Accelerator;
use crate::menu::{MenuAction, MenuItemSpec, MenuModel};

const ZOOM_STEP: f64 = 0.1;
const ZOOM_MIN: f64 = 0.3;
const ZOOM_MAX: f64 = 3.0;

/// Custom protocol scheme serving the UI document.
pub const DOCUMENT_SCHEME: &str = "app";

/// URL the window loads the UI document from.
///
/// WebView2 only routes custom protocols through `http://<scheme>.localhost`.
pub fn document_url(platform: Platform) -> String {
    match platform {
        Platform::Win32 => format!("http://{}.localhost/index.html", DOCUMENT_SCHEME),
        _ => format!("{}://localhost/index.html", DOCUMENT_SCHEME),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Ready,
    Active,
    /// No window, process stays resident (macOS).
    Quiescent,
    Terminated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Create the main window, hidden, loading `url`.
    CreateWindow { url: String },
    ShowWindow,
    /// Un-minimize and focus the main window.
    FocusWindow,
    /// Navigate the window to `url`, bypassing caches.
    ReloadWindow { url: String },
    CloseWindow,
    ForwardKey(KeyEvent),
    EvaluateScript(String),
    ShowAbout,
    ToggleDevtools,
    SetZoom(f64),
    ToggleFullscreen,
    Exit,
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    platform: Platform,
    window_open: bool,
    awaiting_paint: bool,
    forward_keys: bool,
    zoom: f64,
}

impl Session {
    pub fn new(platform: Platform) -> Self {
        Self {
            state: SessionState::Starting,
            platform,
            window_open: false,
            awaiting_paint: false,
            forward_keys: true,
            zoom: 1.0,
        }
    }

    /// Disable forwarding of bare accelerator key presses to the renderer.
    pub fn without_key_forwarding(mut self) -> Self {
        self.forward_keys = false;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn has_window(&self) -> bool {
        self.window_open
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn document_url(&self) -> String {
        document_url(self.platform)
    }

    fn terminate(&mut self) -> Vec<SessionAction> {
        info!(from = ?self.state, "Session terminating");
        self.state = SessionState::Terminated;
        self.window_open = false;
        vec![SessionAction::Exit]
    }

    fn create_window(&mut self) -> Vec<SessionAction> {
        self.state = SessionState::Ready;
        self.window_open = true;
        self.awaiting_paint = true;
        vec![SessionAction::CreateWindow {
            url: self.document_url(),
        }]
    }

    /// Outcome of the single instance lock. Losing it ends the session.
    pub fn on_instance_lock(&mut self, acquired: bool) -> Vec<SessionAction> {
        if acquired {
            Vec::new()
        } else {
            info!("Another instance is running");
            self.terminate()
        }
    }

    /// The event loop is up; open the main window.
    pub fn on_ready(&mut self) -> Vec<SessionAction> {
        match self.state {
            SessionState::Starting => self.create_window(),
            _ => Vec::new(),
        }
    }

    /// The page finished loading. Only the first paint of a window shows it.
    pub fn on_first_paint(&mut self) -> Vec<SessionAction> {
        if !self.window_open || !self.awaiting_paint {
            return Vec::new();
        }
        self.awaiting_paint = false;
        self.state = SessionState::Active;
        debug!("First paint, showing window");
        vec![SessionAction::ShowWindow]
    }

    /// Another launch attempt asked this instance to come forward.
    pub fn on_second_instance(&mut self) -> Vec<SessionAction> {
        match self.state {
            SessionState::Quiescent => self.create_window(),
            SessionState::Terminated => Vec::new(),
            // Still hidden; ShowWindow after the first paint brings it forward.
            _ if self.awaiting_paint => Vec::new(),
            _ if self.window_open => vec![SessionAction::FocusWindow],
            _ => Vec::new(),
        }
    }

    /// The last window was closed by the user.
    pub fn on_window_closed(&mut self) -> Vec<SessionAction> {
        if self.state == SessionState::Terminated {
            return Vec::new();
        }
        self.window_open = false;
        self.awaiting_paint = false;

        if self.platform.stays_resident() {
            debug!("Window closed, staying resident");
            self.state = SessionState::Quiescent;
            Vec::new()
        } else {
            self.terminate()
        }
    }

    /// Application re-activated (dock click on macOS).
    pub fn on_activate(&mut self) -> Vec<SessionAction> {
        match self.state {
            SessionState::Quiescent => self.create_window(),
            _ => Vec::new(),
        }
    }

    /// Renderer asked to reload the (possibly updated) document.
    pub fn on_reload_requested(&mut self) -> Vec<SessionAction> {
        if self.window_open {
            vec![SessionAction::ReloadWindow {
                url: self.document_url(),
            }]
        } else {
            Vec::new()
        }
    }

    pub fn on_quit(&mut self) -> Vec<SessionAction> {
        if self.state == SessionState::Terminated {
            Vec::new()
        } else {
            self.terminate()
        }
    }

    /// A key press reached the native window instead of the page.
    ///
    /// Presses matching a bare menu accelerator (no Ctrl/Cmd/Alt) are handed
    /// to the renderer as a key event; the menu action does not run. Anything
    /// else is left alone.
    pub fn on_key_input(&mut self, model: &MenuModel, pressed: &Accelerator) -> Vec<SessionAction> {
        if !self.forward_keys || !self.window_open {
            return Vec::new();
        }
        match model.find_by_accelerator(pressed) {
            Some(item) if item.forwards_key() => {
                debug!(id = %item.id, key = %pressed, "Forwarding key to renderer");
                pressed
                    .forwarded_key()
                    .map(SessionAction::ForwardKey)
                    .into_iter()
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    /// A menu item was activated, by click or by a native accelerator.
    pub fn on_menu_item(&mut self, item: &MenuItemSpec) -> Vec<SessionAction> {
        match &item.action {
            MenuAction::Renderer { function, args } => {
                if !self.window_open {
                    return Vec::new();
                }
                vec![SessionAction::EvaluateScript(renderer::invoke_script(
                    function, args,
                ))]
            }
            MenuAction::About => vec![SessionAction::ShowAbout],
            MenuAction::Quit => self.on_quit(),
            MenuAction::CloseWindow if self.window_open => vec![SessionAction::CloseWindow],
            MenuAction::ToggleDevtools if self.window_open => vec![SessionAction::ToggleDevtools],
            MenuAction::ToggleFullscreen if self.window_open => {
                vec![SessionAction::ToggleFullscreen]
            }
            MenuAction::ResetZoom => self.set_zoom(1.0),
            MenuAction::ZoomIn => self.set_zoom(self.zoom + ZOOM_STEP),
            MenuAction::ZoomOut => self.set_zoom(self.zoom - ZOOM_STEP),
            _ => Vec::new(),
        }
    }

    fn set_zoom(&mut self, zoom: f64) -> Vec<SessionAction> {
        let zoom = (zoom.clamp(ZOOM_MIN, ZOOM_MAX) * 10.0).round() / 10.0;
        self.zoom = zoom;
        if self.window_open {
            vec![SessionAction::SetZoom(zoom)]
        } else {
            Vec::new()
        }
    }
}

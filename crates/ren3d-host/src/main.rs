use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tao::dpi::LogicalSize;
use tao::event::{ElementState, Event, StartCause, WindowEvent};
use tao::keyboard::ModifiersState;
use tao::event_loop::{ControlFlow, EventLoopBuilder, EventLoopProxy, EventLoopWindowTarget};
use tao::window::{Fullscreen, Window, WindowBuilder};
use tokio::sync::{broadcast, mpsc};
use wry::{PageLoadEvent, WebView, WebViewBuilder};

use ext_app::session::DOCUMENT_SCHEME;
use ext_app::{
    request_focus, AppPaths, HostServices, InstanceLock, LockOutcome, MenuModel, Session,
    SessionAction, SessionCommand,
};
use ext_bridge::{renderer, Bridge, Platform};
use ext_fs::{DialogProvider, FileArbiter, MessageLevel, MessageOpts, NativeDialogs};
use ext_net::Fetcher;
use ext_updater::UpdateStore;

mod capabilities;
mod crash;
mod keyboard;
mod manifest;
mod menu;
mod protocol;

use capabilities::{create_capability_adapters, Capabilities};
use manifest::{Manifest, WindowConfig, MANIFEST_FILE};
use protocol::AppProtocol;

const PRELOAD: &str = include_str!("preload.js");

/// Per-user data directory name, under the platform data dir.
const DATA_DIR_NAME: &str = "ren3d";

/// How long each event loop turn lets async work run.
const TICK: Duration = Duration::from_millis(8);
const FOCUS_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    app_dir: PathBuf,
    dev_mode: bool,
    update_from: Option<String>,
    reset_ui: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut parsed = Args {
        app_dir: PathBuf::from("app"),
        dev_mode: false,
        update_from: None,
        reset_ui: false,
    };

    while let Some(a) = args.next() {
        match a.as_str() {
            "--app-dir" => match args.next() {
                Some(dir) => parsed.app_dir = PathBuf::from(dir),
                None => bail!("--app-dir requires a path"),
            },
            "--dev" => parsed.dev_mode = true,
            "--update-from" => match args.next() {
                Some(url) => parsed.update_from = Some(url),
                None => bail!("--update-from requires a URL"),
            },
            "--reset-ui" => parsed.reset_ui = true,
            other => tracing::warn!("Ignoring unknown argument {:?}", other),
        }
    }

    if parsed.reset_ui && parsed.update_from.is_some() {
        bail!("--reset-ui and --update-from cannot be combined");
    }
    Ok(parsed)
}

#[derive(Debug)]
enum UserEvent {
    /// Script to run in the page (bridge replies, warnings).
    Script(String),
    Menu(String),
    Command(SessionCommand),
    PageLoaded,
}

struct MainWindow {
    // Field order matters: the webview must go before its window.
    webview: WebView,
    window: Window,
}

/// Everything needed to carry out [`SessionAction`]s.
struct Shell {
    window: Option<MainWindow>,
    window_config: WindowConfig,
    app_name: String,
    app_version: String,
    dev_mode: bool,
    preload: String,
    protocol: Arc<AppProtocol>,
    menu: muda::Menu,
    dialogs: Arc<dyn DialogProvider>,
    ipc_tx: mpsc::UnboundedSender<String>,
    proxy: EventLoopProxy<UserEvent>,
    lock: Option<InstanceLock>,
}

impl Shell {
    fn create_window(
        &self,
        url: &str,
        target: &EventLoopWindowTarget<UserEvent>,
    ) -> Result<MainWindow> {
        let config = &self.window_config;
        let (width, height) = config.size();
        let (min_width, min_height) = config.min_size();

        // Hidden until the first paint
        let window = WindowBuilder::new()
            .with_title(config.title())
            .with_inner_size(LogicalSize::new(width, height))
            .with_min_inner_size(LogicalSize::new(min_width, min_height))
            .with_visible(false)
            .build(target)
            .context("creating window")?;

        let ipc_tx = self.ipc_tx.clone();
        let assets = self.protocol.clone();
        let load_proxy = self.proxy.clone();

        let webview = WebViewBuilder::new()
            .with_initialization_script(&self.preload)
            .with_background_color(config.background_rgba())
            .with_devtools(true)
            .with_ipc_handler(move |msg| {
                if ipc_tx.send(msg.body().clone()).is_err() {
                    tracing::warn!("Bridge worker stopped, dropping message");
                }
            })
            .with_custom_protocol(DOCUMENT_SCHEME.into(), move |_id, request| {
                assets.respond(request.uri().path())
            })
            .with_navigation_handler(|url| {
                if protocol::is_app_url(&url) {
                    return true;
                }
                open_external(&url);
                false
            })
            .with_new_window_req_handler(|url| {
                open_external(&url);
                false
            })
            .with_on_page_load_handler(move |event, _url| {
                if let PageLoadEvent::Finished = event {
                    let _ = load_proxy.send_event(UserEvent::PageLoaded);
                }
            })
            .with_url(url)
            .build(&window)
            .context("creating webview")?;

        menu::attach(&self.menu, &window);

        if self.dev_mode {
            webview.open_devtools();
        }

        tracing::info!("Created window at {}", url);
        Ok(MainWindow { webview, window })
    }

    fn evaluate(&self, script: &str) {
        if let Some(ref main) = self.window {
            if let Err(e) = main.webview.evaluate_script(script) {
                tracing::warn!("evaluate_script failed: {}", e);
            }
        }
    }

    /// Carry out one action. Returns follow-up actions from the session.
    fn apply(
        &mut self,
        action: SessionAction,
        session: &mut Session,
        target: &EventLoopWindowTarget<UserEvent>,
        control: &mut ControlFlow,
    ) -> Vec<SessionAction> {
        tracing::debug!(?action, "session action");
        match action {
            SessionAction::CreateWindow { url } => match self.create_window(&url, target) {
                Ok(main) => self.window = Some(main),
                Err(e) => {
                    tracing::error!("{:#}", e);
                    return session.on_quit();
                }
            },
            SessionAction::ShowWindow => {
                if let Some(ref main) = self.window {
                    main.window.set_visible(true);
                    main.window.set_focus();
                }
            }
            SessionAction::FocusWindow => {
                if let Some(ref main) = self.window {
                    main.window.set_minimized(false);
                    main.window.set_visible(true);
                    main.window.set_focus();
                }
            }
            SessionAction::ReloadWindow { url } => {
                if let Some(ref main) = self.window {
                    if let Err(e) = main.webview.load_url(&url) {
                        tracing::error!("Reload failed: {}", e);
                    }
                }
            }
            SessionAction::CloseWindow => {
                if self.window.take().is_some() {
                    return session.on_window_closed();
                }
            }
            SessionAction::ForwardKey(key) => self.evaluate(&renderer::key_event_script(&key)),
            SessionAction::EvaluateScript(script) => self.evaluate(&script),
            SessionAction::ShowAbout => {
                self.dialogs.message(&MessageOpts {
                    title: format!("About {}", self.app_name),
                    message: format!("{} v{}", self.app_name, self.app_version),
                    detail: Some("Offline 3D editor".to_string()),
                    level: MessageLevel::Info,
                });
            }
            SessionAction::ToggleDevtools => {
                if let Some(ref main) = self.window {
                    if main.webview.is_devtools_open() {
                        main.webview.close_devtools();
                    } else {
                        main.webview.open_devtools();
                    }
                }
            }
            SessionAction::SetZoom(zoom) => {
                if let Some(ref main) = self.window {
                    if let Err(e) = main.webview.zoom(zoom) {
                        tracing::warn!("Zoom failed: {}", e);
                    }
                }
            }
            SessionAction::ToggleFullscreen => {
                if let Some(ref main) = self.window {
                    let next = match main.window.fullscreen() {
                        Some(_) => None,
                        None => Some(Fullscreen::Borderless(None)),
                    };
                    main.window.set_fullscreen(next);
                }
            }
            SessionAction::Exit => {
                self.window = None;
                // The event loop exits the process without running destructors.
                drop(self.lock.take());
                *control = ControlFlow::Exit;
            }
        }
        Vec::new()
    }

    fn run_actions(
        &mut self,
        actions: Vec<SessionAction>,
        session: &mut Session,
        target: &EventLoopWindowTarget<UserEvent>,
        control: &mut ControlFlow,
    ) {
        let mut queue = std::collections::VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            queue.extend(self.apply(action, session, target, control));
        }
    }
}

fn open_external(url: &str) {
    if !protocol::is_external_url(url) {
        tracing::warn!("Blocked navigation to {}", url);
        return;
    }
    tracing::info!("Opening {} in the system browser", url);
    if let Err(e) = open::that_detached(url) {
        tracing::warn!("Failed to open {}: {}", url, e);
    }
}

fn main() -> Result<()> {
    // Current-thread runtime driven from the tao event loop, so block_on
    // can be called from inside it.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;

    let handle = rt.handle().clone();
    let _guard = handle.enter();

    sync_main(rt)
}

fn sync_main(rt: tokio::runtime::Runtime) -> Result<()> {
    // REN3D_LOG controls the log level, default "info"
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("REN3D_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = parse_args(env::args().skip(1))?;
    let app_dir = args.app_dir.clone();

    let manifest_path = app_dir.join(MANIFEST_FILE);
    let manifest_txt = rt
        .block_on(tokio::fs::read_to_string(&manifest_path))
        .with_context(|| format!("reading manifest at {}", manifest_path.display()))?;
    let manifest = Manifest::parse(&manifest_txt).context("parsing manifest")?;

    tracing::info!(
        "Starting app: {} v{}",
        manifest.app.name,
        manifest.app.version
    );

    let paths = AppPaths::for_user(DATA_DIR_NAME).context("locating user data directory")?;

    if manifest.app.crash_reporting.unwrap_or(false) {
        let dir = manifest
            .app
            .crash_report_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| paths.crash_dir());
        crash::install(crash::CrashReporter::new(
            &manifest.app.name,
            &manifest.app.version,
            dir,
        ));
    }
    if let Some(dir) = crash::report_dir() {
        tracing::debug!("Crash reports: {}", dir.display());
    }

    let capabilities =
        Capabilities::from_permissions(manifest.permissions.as_ref(), args.dev_mode, &app_dir)
            .context("initializing capabilities")?;
    if args.dev_mode {
        tracing::info!("Running in dev mode - all permissions allowed");
    }
    let (bridge_caps, net_caps, fs_caps) = create_capability_adapters(capabilities);

    let platform = Platform::current();
    let dialogs: Arc<dyn DialogProvider> = Arc::new(NativeDialogs);
    let store = Arc::new(UpdateStore::new(
        manifest.bundled_document(&app_dir),
        paths.ui_dir(),
    ));
    let fetcher = Arc::new(
        Fetcher::new(manifest.fetcher_config())
            .context("building HTTP client")?
            .with_checker(net_caps),
    );
    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<SessionCommand>();
    let services = Arc::new(
        HostServices::new(
            FileArbiter::new(dialogs.clone()).with_checker(fs_caps),
            store.clone(),
            fetcher,
            command_tx,
        )
        .with_platform(platform),
    );

    // One-shot maintenance modes
    if args.reset_ui {
        rt.block_on(store.revert()).context("reverting UI document")?;
        tracing::info!("UI document reset to the bundled version");
        return Ok(());
    }
    if let Some(ref url) = args.update_from {
        let document = rt
            .block_on(services.update_from_url(url))
            .with_context(|| format!("updating UI document from {}", url))?;
        tracing::info!(
            "Installed UI document from {} ({} bytes)",
            document.url,
            document.body.len()
        );
        return Ok(());
    }

    let mut session = Session::new(platform);
    let lock = match InstanceLock::acquire(&paths, &manifest.app.identifier)
        .context("acquiring single instance lock")?
    {
        LockOutcome::Acquired(lock) => {
            session.on_instance_lock(true);
            lock
        }
        LockOutcome::Held { pid } => {
            tracing::info!(pid = ?pid, "{} is already running", manifest.app.name);
            if let Err(e) = request_focus(&paths, &manifest.app.identifier) {
                tracing::warn!("Could not signal the running instance: {}", e);
            }
            session.on_instance_lock(false);
            return Ok(());
        }
    };

    let bridge = Bridge::new(services.clone()).with_checker(bridge_caps);

    let event_loop = EventLoopBuilder::<UserEvent>::with_user_event().build();
    let proxy = event_loop.create_proxy();

    // Bridge calls from the page; each runs as its own task.
    let (ipc_tx, mut ipc_rx) = mpsc::unbounded_channel::<String>();
    {
        let proxy = proxy.clone();
        tokio::spawn(async move {
            while let Some(raw) = ipc_rx.recv().await {
                let bridge = bridge.clone();
                let proxy = proxy.clone();
                tokio::spawn(async move {
                    if let Some(script) = bridge.handle_message(&raw).await {
                        let _ = proxy.send_event(UserEvent::Script(script));
                    }
                });
            }
        });
    }

    {
        let proxy = proxy.clone();
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                if proxy.send_event(UserEvent::Command(command)).is_err() {
                    break;
                }
            }
        });
    }

    // Secondary update failures show up in the page console.
    {
        let proxy = proxy.clone();
        let mut warnings = store.subscribe_warnings();
        tokio::spawn(async move {
            loop {
                match warnings.recv().await {
                    Ok(warning) => {
                        let script = renderer::invoke_script(
                            "console.warn",
                            &[serde_json::Value::String(format!("[ren3d] {}", warning))],
                        );
                        let _ = proxy.send_event(UserEvent::Script(script));
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    let menu_model = MenuModel::standard(platform);
    {
        let proxy = proxy.clone();
        std::thread::spawn(move || {
            let receiver = muda::MenuEvent::receiver();
            while let Ok(event) = receiver.recv() {
                if proxy.send_event(UserEvent::Menu(event.id.0)).is_err() {
                    break;
                }
            }
        });
    }

    let mut shell = Shell {
        window: None,
        window_config: manifest.window(),
        app_name: manifest.app.name.clone(),
        app_version: manifest.app.version.clone(),
        dev_mode: args.dev_mode,
        preload: PRELOAD.replace("__REN3D_PLATFORM__", platform.as_str()),
        protocol: Arc::new(AppProtocol::new(store.clone(), args.dev_mode)),
        menu: menu::build(&menu_model),
        dialogs,
        ipc_tx,
        proxy,
        lock: Some(lock),
    };
    let mut last_focus_poll = Instant::now();
    let mut modifiers = ModifiersState::empty();

    event_loop.run(move |event, target, control| {
        *control = ControlFlow::Poll;

        let actions = match event {
            Event::NewEvents(StartCause::Init) => session.on_ready(),

            Event::MainEventsCleared => {
                // Let bridge tasks make progress
                rt.block_on(tokio::time::sleep(TICK));

                if last_focus_poll.elapsed() >= FOCUS_POLL_INTERVAL {
                    last_focus_poll = Instant::now();
                    match shell.lock {
                        Some(ref lock) if lock.take_focus_request() => session.on_second_instance(),
                        _ => Vec::new(),
                    }
                } else {
                    Vec::new()
                }
            }

            Event::UserEvent(UserEvent::Script(script)) => {
                shell.evaluate(&script);
                Vec::new()
            }

            Event::UserEvent(UserEvent::PageLoaded) => session.on_first_paint(),

            Event::UserEvent(UserEvent::Command(SessionCommand::Reload)) => {
                session.on_reload_requested()
            }

            Event::UserEvent(UserEvent::Menu(id)) => match menu_model.find(&id) {
                Some(item) => session.on_menu_item(item),
                None => {
                    tracing::warn!("Unknown menu item {}", id);
                    Vec::new()
                }
            },

            Event::WindowEvent {
                event: WindowEvent::CloseRequested,
                ..
            } => {
                shell.window = None;
                tracing::info!("Window closed");
                session.on_window_closed()
            }

            Event::WindowEvent {
                event: WindowEvent::ModifiersChanged(state),
                ..
            } => {
                modifiers = state;
                Vec::new()
            }

            // Keys the page did not consume. Bare menu accelerators are not
            // registered natively, so they are forwarded from here.
            Event::WindowEvent {
                event: WindowEvent::KeyboardInput { event, .. },
                ..
            } if event.state == ElementState::Pressed => {
                match keyboard::accelerator_for(&event.logical_key, modifiers) {
                    Some(pressed) => session.on_key_input(&menu_model, &pressed),
                    None => Vec::new(),
                }
            }

            #[cfg(target_os = "macos")]
            Event::Reopen { .. } => session.on_activate(),

            _ => Vec::new(),
        };

        if !actions.is_empty() {
            shell.run_actions(actions, &mut session, target, control);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_defaults() {
        let parsed = args(&[]).unwrap();
        assert_eq!(parsed.app_dir, PathBuf::from("app"));
        assert!(!parsed.dev_mode && !parsed.reset_ui);
        assert_eq!(parsed.update_from, None);
    }

    #[test]
    fn test_parse_flags() {
        let parsed = args(&[
            "--app-dir",
            "/opt/ren3d",
            "--dev",
            "--update-from",
            "https://ren3d.app/index.html",
        ])
        .unwrap();
        assert_eq!(parsed.app_dir, PathBuf::from("/opt/ren3d"));
        assert!(parsed.dev_mode);
        assert_eq!(
            parsed.update_from.as_deref(),
            Some("https://ren3d.app/index.html")
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(args(&["--app-dir"]).is_err());
        assert!(args(&["--update-from"]).is_err());
        assert!(args(&["--reset-ui", "--update-from", "https://x"]).is_err());
    }

    #[test]
    fn test_preload_has_platform_slot() {
        assert!(PRELOAD.contains("__REN3D_PLATFORM__"));
        assert!(PRELOAD.contains("electronAPI"));
    }
}

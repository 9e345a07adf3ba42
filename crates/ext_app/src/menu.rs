//! Application menu model.
//!
//! Platform-neutral description of the menu bar; the host turns it into
//! native menus and routes activations back through [`crate::Session`].

use ext_bridge::Platform;
use serde_json::json;
use tracing::warn;

use crate::keys::Accelerator;

#[derive(Debug, Clone, PartialEq)]
pub enum MenuAction {
    /// Call a global function of the editor page.
    Renderer {
        function: &'static str,
        args: Vec<serde_json::Value>,
    },
    About,
    Quit,
    CloseWindow,
    ToggleDevtools,
    ResetZoom,
    ZoomIn,
    ZoomOut,
    ToggleFullscreen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MenuItemSpec {
    pub id: String,
    pub label: String,
    pub accelerator: Option<Accelerator>,
    pub action: MenuAction,
}

impl MenuItemSpec {
    /// A renderer command on a bare key. The page handles that key itself,
    /// so the native menu must not grab it.
    pub fn forwards_key(&self) -> bool {
        matches!(self.action, MenuAction::Renderer { .. })
            && self.accelerator.as_ref().is_some_and(Accelerator::is_bare)
    }

    /// Accelerator to register with the native menu.
    pub fn native_accelerator(&self) -> Option<&Accelerator> {
        if self.forwards_key() {
            None
        } else {
            self.accelerator.as_ref()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MenuEntry {
    Item(MenuItemSpec),
    Separator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submenu {
    pub label: String,
    pub entries: Vec<MenuEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MenuModel {
    pub submenus: Vec<Submenu>,
}

fn item(id: &str, label: &str, accelerator: Option<&str>, action: MenuAction) -> MenuEntry {
    let accelerator = accelerator.and_then(|a| match a.parse::<Accelerator>() {
        Ok(accel) => Some(accel),
        Err(e) => {
            warn!(id, "Dropping accelerator {:?}: {}", a, e);
            None
        }
    });
    MenuEntry::Item(MenuItemSpec {
        id: id.to_string(),
        label: label.to_string(),
        accelerator,
        action,
    })
}

fn call(function: &'static str) -> MenuAction {
    MenuAction::Renderer {
        function,
        args: Vec::new(),
    }
}

fn call_with(function: &'static str, arg: &str) -> MenuAction {
    MenuAction::Renderer {
        function,
        args: vec![json!(arg)],
    }
}

impl MenuModel {
    /// The editor's menu bar.
    pub fn standard(platform: Platform) -> Self {
        let is_mac = platform == Platform::Darwin;
        let mut submenus = Vec::new();

        if is_mac {
            submenus.push(Submenu {
                label: "Ren3D".into(),
                entries: vec![
                    item("app.about", "About Ren3D", None, MenuAction::About),
                    MenuEntry::Separator,
                    item("app.quit", "Quit Ren3D", Some("CmdOrCtrl+Q"), MenuAction::Quit),
                ],
            });
        }

        submenus.push(Submenu {
            label: "File".into(),
            entries: vec![
                item("file.new", "New Scene", Some("CmdOrCtrl+N"), call("newScene")),
                MenuEntry::Separator,
                item("file.import", "Import .stl / .obj", Some("CmdOrCtrl+I"), call("doImport")),
                MenuEntry::Separator,
                item("file.export-stl", "Export .stl", Some("CmdOrCtrl+E"), call("exportSTL")),
                item("file.export-obj", "Export .obj", None, call("exportOBJ")),
                MenuEntry::Separator,
                if is_mac {
                    item("file.close", "Close Window", Some("CmdOrCtrl+W"), MenuAction::CloseWindow)
                } else {
                    item("file.quit", "Exit", Some("CmdOrCtrl+Q"), MenuAction::Quit)
                },
            ],
        });

        submenus.push(Submenu {
            label: "Edit".into(),
            entries: vec![
                item("edit.undo", "Undo", Some("CmdOrCtrl+Z"), call("undo")),
                item("edit.redo", "Redo", Some("CmdOrCtrl+Y"), call("redo")),
                MenuEntry::Separator,
                item("edit.duplicate", "Duplicate", Some("CmdOrCtrl+D"), call("duplicateSel")),
                item("edit.delete", "Delete", Some("Delete"), call("deleteSel")),
                MenuEntry::Separator,
                item("edit.select-all", "Select All", Some("CmdOrCtrl+A"), call("selectAll")),
            ],
        });

        submenus.push(Submenu {
            label: "View".into(),
            entries: vec![
                item("view.persp", "Perspective", None, call_with("camView", "persp")),
                item("view.front", "Front", None, call_with("camView", "front")),
                item("view.top", "Top", None, call_with("camView", "top")),
                item("view.right", "Right", None, call_with("camView", "right")),
                MenuEntry::Separator,
                item("view.frame-all", "Frame All", Some("Home"), call("frameAll")),
                item("view.frame-selected", "Frame Selected", Some("F"), call("frameSel")),
                MenuEntry::Separator,
                item("view.grid", "Grid", None, call("toggleGrid")),
                item("view.wireframe", "Wireframe", None, call("toggleWire")),
                MenuEntry::Separator,
                item("view.devtools", "Developer Tools", Some("CmdOrCtrl+Alt+I"), MenuAction::ToggleDevtools),
                item("view.reset-zoom", "Reset UI Zoom", Some("CmdOrCtrl+0"), MenuAction::ResetZoom),
                item("view.zoom-in", "Zoom In UI", Some("CmdOrCtrl+="), MenuAction::ZoomIn),
                item("view.zoom-out", "Zoom Out UI", Some("CmdOrCtrl+-"), MenuAction::ZoomOut),
                MenuEntry::Separator,
                item("view.fullscreen", "Full Screen", Some("F11"), MenuAction::ToggleFullscreen),
            ],
        });

        submenus.push(Submenu {
            label: "Add".into(),
            entries: vec![
                item("add.box", "Box", Some("Shift+C"), call_with("addObj", "box")),
                item("add.sphere", "Sphere", Some("Shift+S"), call_with("addObj", "sphere")),
                item("add.cylinder", "Cylinder", Some("Shift+Y"), call_with("addObj", "cyl")),
                item("add.cone", "Cone", Some("Shift+O"), call_with("addObj", "cone")),
                item("add.torus", "Torus", Some("Shift+T"), call_with("addObj", "torus")),
                item("add.plane", "Plane", Some("Shift+P"), call_with("addObj", "plane")),
            ],
        });

        submenus.push(Submenu {
            label: "Help".into(),
            entries: vec![item("help.about", "About", None, MenuAction::About)],
        });

        Self { submenus }
    }

    pub fn items(&self) -> impl Iterator<Item = &MenuItemSpec> {
        self.submenus
            .iter()
            .flat_map(|submenu| submenu.entries.iter())
            .filter_map(|entry| match entry {
                MenuEntry::Item(item) => Some(item),
                MenuEntry::Separator => None,
            })
    }

    pub fn find(&self, id: &str) -> Option<&MenuItemSpec> {
        self.items().find(|item| item.id == id)
    }

    /// The item bound to `pressed`, comparing keys case-insensitively.
    pub fn find_by_accelerator(&self, pressed: &Accelerator) -> Option<&MenuItemSpec> {
        self.items().find(|item| {
            item.accelerator.as_ref().is_some_and(|a| {
                a.primary == pressed.primary
                    && a.alt == pressed.alt
                    && a.shift == pressed.shift
                    && a.key.eq_ignore_ascii_case(&pressed.key)
            })
        })
    }
}

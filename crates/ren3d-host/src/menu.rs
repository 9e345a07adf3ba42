//! Native menu bar built from the editor's [`MenuModel`].

use ext_app::{MenuEntry, MenuModel};
use tao::window::Window;

/// Build the muda menu. Item ids are the model's ids, so activations map
/// straight back with [`MenuModel::find`]. Bare keys of renderer commands
/// are left to the page.
pub fn build(model: &MenuModel) -> muda::Menu {
    let menu = muda::Menu::new();
    let mut count = 0usize;

    for spec in &model.submenus {
        let submenu = muda::Submenu::new(&spec.label, true);
        for entry in &spec.entries {
            let appended = match entry {
                MenuEntry::Separator => submenu.append(&muda::PredefinedMenuItem::separator()),
                MenuEntry::Item(item) => {
                    let native = item.native_accelerator();
                    let accelerator = native
                        .and_then(|a| a.to_string().parse::<muda::accelerator::Accelerator>().ok());
                    if native.is_some() && accelerator.is_none() {
                        tracing::warn!(id = %item.id, "Accelerator not supported by native menu");
                    }
                    count += 1;
                    submenu.append(&muda::MenuItem::with_id(
                        item.id.as_str(),
                        &item.label,
                        true,
                        accelerator,
                    ))
                }
            };
            if let Err(e) = appended {
                tracing::warn!("Failed to append menu entry: {}", e);
            }
        }
        if let Err(e) = menu.append(&submenu) {
            tracing::warn!("Failed to append submenu {}: {}", spec.label, e);
        }
    }

    tracing::debug!("Registered {} menu items", count);
    menu
}

/// Show the menu bar for `window`. On macOS the menu belongs to the
/// application and is installed once.
pub fn attach(menu: &muda::Menu, window: &Window) {
    #[cfg(target_os = "macos")]
    {
        let _ = window;
        menu.init_for_nsapp();
    }

    #[cfg(target_os = "windows")]
    {
        use tao::platform::windows::WindowExtWindows;
        if let Err(e) = unsafe { menu.init_for_hwnd(window.hwnd() as isize) } {
            tracing::warn!("Failed to attach menu: {}", e);
        }
    }

    #[cfg(target_os = "linux")]
    {
        use gtk::prelude::*;
        use tao::platform::unix::WindowExtUnix;
        let gtk_win = window.gtk_window();
        let gtk_win_ref: &gtk::Window = gtk_win.upcast_ref();
        if let Err(e) = menu.init_for_gtk_window(gtk_win_ref, None::<&gtk::Box>) {
            tracing::warn!("Failed to attach menu: {}", e);
        }
    }
}

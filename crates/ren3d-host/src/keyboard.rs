//! Translation of native key presses into menu accelerators.

use ext_app::Accelerator;
use tao::keyboard::{Key, ModifiersState};

/// The accelerator a key press spells, or `None` for keys no menu item can
/// be bound to.
pub fn accelerator_for(key: &Key<'_>, modifiers: ModifiersState) -> Option<Accelerator> {
    let key = match key {
        Key::Character(c) => c.to_string(),
        Key::Home => "Home".to_string(),
        Key::End => "End".to_string(),
        Key::Delete => "Delete".to_string(),
        Key::Escape => "Escape".to_string(),
        _ => return None,
    };

    let primary = if cfg!(target_os = "macos") {
        modifiers.super_key()
    } else {
        modifiers.control_key()
    };

    Some(Accelerator {
        primary,
        alt: modifiers.alt_key(),
        shift: modifiers.shift_key(),
        key,
    })
}

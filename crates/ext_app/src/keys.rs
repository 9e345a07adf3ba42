//! Menu accelerators and the keys forwarded to the renderer.

use std::fmt;
use std::str::FromStr;

use ext_bridge::KeyEvent;

use crate::AppError;

/// A parsed accelerator such as `CmdOrCtrl+Shift+Z` or `Home`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accelerator {
    /// Command on macOS, Control elsewhere.
    pub primary: bool,
    pub alt: bool,
    pub shift: bool,
    pub key: String,
}

impl Accelerator {
    /// No primary or alt modifier: the menu would swallow a key the renderer
    /// also listens for.
    pub fn is_bare(&self) -> bool {
        !self.primary && !self.alt
    }

    /// The key event the renderer receives in place of the menu action, for
    /// bare accelerators only.
    pub fn forwarded_key(&self) -> Option<KeyEvent> {
        if !self.is_bare() {
            return None;
        }

        let mut chars = self.key.chars();
        let key = match (chars.next(), chars.next()) {
            (Some(c), None) if self.shift => c.to_uppercase().to_string(),
            (Some(c), None) => c.to_lowercase().to_string(),
            _ => self.key.clone(),
        };

        Some(KeyEvent {
            key,
            shift_held: self.shift,
        })
    }
}

impl FromStr for Accelerator {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut accel = Accelerator {
            primary: false,
            alt: false,
            shift: false,
            key: String::new(),
        };

        let mut parts: Vec<&str> = s.split('+').map(str::trim).collect();
        let key = parts
            .pop()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::invalid_accelerator(format!("missing key in {:?}", s)))?;

        for modifier in parts {
            match modifier.to_ascii_lowercase().as_str() {
                "cmdorctrl" | "commandorcontrol" | "ctrl" | "control" | "cmd" | "command"
                | "super" | "meta" => accel.primary = true,
                "alt" | "option" => accel.alt = true,
                "shift" => accel.shift = true,
                other => {
                    return Err(AppError::invalid_accelerator(format!(
                        "unknown modifier {:?} in {:?}",
                        other, s
                    )))
                }
            }
        }

        accel.key = key.to_string();
        Ok(accel)
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.primary {
            f.write_str("CmdOrCtrl+")?;
        }
        if self.alt {
            f.write_str("Alt+")?;
        }
        if self.shift {
            f.write_str("Shift+")?;
        }
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modifiers() {
        let accel: Accelerator = "CmdOrCtrl+Shift+Z".parse().unwrap();
        assert!(accel.primary && accel.shift && !accel.alt);
        assert_eq!(accel.key, "Z");
        assert_eq!(accel.to_string(), "CmdOrCtrl+Shift+Z");

        let accel: Accelerator = "Delete".parse().unwrap();
        assert!(accel.is_bare());
        assert_eq!(accel.to_string(), "Delete");
    }

    #[test]
    fn test_parse_errors() {
        assert!("Ctrl+".parse::<Accelerator>().is_err());
        assert!("Hyper+K".parse::<Accelerator>().is_err());
        assert!("".parse::<Accelerator>().is_err());
    }

    #[test]
    fn test_forwarded_keys() {
        let shift_c: Accelerator = "Shift+C".parse().unwrap();
        assert_eq!(
            shift_c.forwarded_key(),
            Some(KeyEvent {
                key: "C".into(),
                shift_held: true
            })
        );

        let f: Accelerator = "F".parse().unwrap();
        assert_eq!(f.forwarded_key().unwrap().key, "f");

        let home: Accelerator = "Home".parse().unwrap();
        assert_eq!(
            home.forwarded_key(),
            Some(KeyEvent {
                key: "Home".into(),
                shift_held: false
            })
        );

        let undo: Accelerator = "CmdOrCtrl+Z".parse().unwrap();
        assert_eq!(undo.forwarded_key(), None);
        let alt: Accelerator = "Alt+F".parse().unwrap();
        assert_eq!(alt.forwarded_key(), None);
    }
}

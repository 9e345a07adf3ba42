//! `ren3d.toml` application manifest.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ext_net::FetcherConfig;
use serde::Deserialize;

use crate::capabilities::Permissions;

pub const MANIFEST_FILE: &str = "ren3d.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Manifest {
    pub app: App,
    pub window: Option<WindowConfig>,
    pub fetch: Option<FetchConfig>,
    pub permissions: Option<Permissions>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    pub name: String,
    pub identifier: String,
    pub version: String,
    /// Bundled UI document, relative to the app directory.
    pub document: Option<String>,
    pub crash_reporting: Option<bool>,
    pub crash_report_dir: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WindowConfig {
    pub title: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub min_width: Option<u32>,
    pub min_height: Option<u32>,
    /// `#rrggbb`
    pub background: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FetchConfig {
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Absolute path of the bundled UI document.
    pub fn bundled_document(&self, app_dir: &Path) -> PathBuf {
        app_dir.join(self.app.document.as_deref().unwrap_or("web/index.html"))
    }

    pub fn window(&self) -> WindowConfig {
        self.window.clone().unwrap_or_default()
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        let mut config = FetcherConfig::default();
        if let Some(ref fetch) = self.fetch {
            if let Some(secs) = fetch.timeout_secs {
                config.timeout = Duration::from_secs(secs);
            }
            if let Some(ref agent) = fetch.user_agent {
                config.user_agent = agent.clone();
            }
        }
        config
    }
}

impl WindowConfig {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("Ren3D")
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width.unwrap_or(1440), self.height.unwrap_or(900))
    }

    pub fn min_size(&self) -> (u32, u32) {
        (self.min_width.unwrap_or(900), self.min_height.unwrap_or(600))
    }

    /// Background as RGBA; malformed colors fall back to the default.
    pub fn background_rgba(&self) -> (u8, u8, u8, u8) {
        self.background
            .as_deref()
            .and_then(parse_hex_color)
            .unwrap_or((0x05, 0x05, 0x08, 0xff))
    }
}

fn parse_hex_color(s: &str) -> Option<(u8, u8, u8, u8)> {
    let hex = s.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?, 0xff))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r##"
[app]
name = "Ren3D"
identifier = "com.ren3d.editor"
version = "2.0.0"
crash_reporting = true

[window]
width = 1280
background = "#102030"

[fetch]
timeout_secs = 15

[permissions]
ops = ["save-file", "open-file"]

[permissions.net]
allow = ["*.example.com"]
"##;

    #[test]
    fn test_parse_full_manifest() {
        let manifest = Manifest::parse(FULL).unwrap();
        assert_eq!(manifest.app.identifier, "com.ren3d.editor");
        assert_eq!(manifest.app.crash_reporting, Some(true));

        let window = manifest.window();
        assert_eq!(window.size(), (1280, 900));
        assert_eq!(window.min_size(), (900, 600));
        assert_eq!(window.background_rgba(), (0x10, 0x20, 0x30, 0xff));

        assert_eq!(manifest.fetcher_config().timeout, Duration::from_secs(15));

        let permissions = manifest.permissions.unwrap();
        assert_eq!(permissions.ops.unwrap().len(), 2);
    }

    #[test]
    fn test_defaults() {
        let manifest = Manifest::parse(
            r#"
[app]
name = "Ren3D"
identifier = "com.ren3d.editor"
version = "2.0.0"
"#,
        )
        .unwrap();

        let window = manifest.window();
        assert_eq!(window.title(), "Ren3D");
        assert_eq!(window.size(), (1440, 900));
        assert_eq!(window.background_rgba(), (0x05, 0x05, 0x08, 0xff));
        assert_eq!(manifest.fetcher_config().timeout, Duration::from_secs(60));
        assert_eq!(
            manifest.bundled_document(Path::new("/opt/ren3d")),
            Path::new("/opt/ren3d/web/index.html")
        );
    }

    #[test]
    fn test_bad_colors() {
        assert_eq!(parse_hex_color("050508"), None);
        assert_eq!(parse_hex_color("#05050"), None);
        assert_eq!(parse_hex_color("#zz0508"), None);
    }

    #[test]
    fn test_missing_app_section_fails() {
        assert!(Manifest::parse("[window]\nwidth = 10\n").is_err());
    }
}

//! Panic hook that leaves a crash report in the user's data directory.

use std::fmt::Write as _;
use std::panic;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use tracing::{error, info, warn};

static REPORTER: OnceCell<CrashReporter> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct CrashReporter {
    app_name: String,
    version: String,
    report_dir: PathBuf,
}

/// What went wrong, captured inside the panic hook.
#[derive(Debug, Clone)]
pub struct CrashDetails {
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub message: String,
    pub backtrace: String,
}

impl CrashReporter {
    pub fn new(app_name: &str, version: &str, report_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_name: app_name.to_string(),
            version: version.to_string(),
            report_dir: report_dir.into(),
        }
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    fn file_name(&self, details: &CrashDetails) -> String {
        let slug: String = self
            .app_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        format!("crash-{}-{}.txt", slug, details.timestamp.format("%Y%m%d-%H%M%S%.3f"))
    }

    pub fn render(&self, details: &CrashDetails) -> String {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        let mut report = String::new();
        let _ = writeln!(report, "{} {} crash report", self.app_name, self.version);
        let _ = writeln!(report, "time:     {}", details.timestamp.to_rfc3339());
        let _ = writeln!(
            report,
            "platform: {}-{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        let _ = writeln!(report, "host:     {}", host);
        let _ = writeln!(report, "at:       {}", details.location);
        let _ = writeln!(report, "panic:    {}", details.message);
        let _ = writeln!(report);
        let _ = writeln!(report, "{}", details.backtrace);
        report
    }

    pub fn write(&self, details: &CrashDetails) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.report_dir)?;
        let path = self.report_dir.join(self.file_name(details));
        std::fs::write(&path, self.render(details))?;
        Ok(path)
    }
}

/// Install the panic hook. Only the first call has any effect.
pub fn install(reporter: CrashReporter) {
    if let Err(e) = std::fs::create_dir_all(reporter.report_dir()) {
        warn!(dir = %reporter.report_dir().display(), error = %e, "Cannot create crash report directory");
    }

    let dir = reporter.report_dir().to_path_buf();
    if REPORTER.set(reporter).is_err() {
        return;
    }

    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let details = CrashDetails {
            timestamp: Utc::now(),
            location: panic_info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_else(|| "unknown".to_string()),
            message: panic_message(panic_info.payload()),
            backtrace: format!("{:?}", backtrace::Backtrace::new()),
        };

        error!(at = %details.location, "panic: {}", details.message);
        if let Some(reporter) = REPORTER.get() {
            match reporter.write(&details) {
                Ok(path) => error!("Crash report written to {}", path.display()),
                Err(e) => error!("Failed to write crash report: {}", e),
            }
        }

        previous(panic_info);
    }));

    info!("Crash reporting enabled, reports go to {}", dir.display());
}

pub fn report_dir() -> Option<PathBuf> {
    REPORTER.get().map(|r| r.report_dir().to_path_buf())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> CrashDetails {
        CrashDetails {
            timestamp: DateTime::parse_from_rfc3339("2026-03-01T12:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
            location: "src/main.rs:10:5".into(),
            message: "boom".into(),
            backtrace: "0: main".into(),
        }
    }

    #[test]
    fn test_render() {
        let reporter = CrashReporter::new("Ren3D", "2.0.0", "/tmp/unused");
        let report = reporter.render(&details());
        assert!(report.starts_with("Ren3D 2.0.0 crash report\n"));
        assert!(report.contains("at:       src/main.rs:10:5"));
        assert!(report.contains("panic:    boom"));
        assert!(report.contains("time:     2026-03-01T12:30:00+00:00"));
        assert!(report.ends_with("0: main\n"));
    }

    #[test]
    fn test_write_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = CrashReporter::new("Ren 3D", "2.0.0", dir.path().join("crashes"));
        let path = reporter.write(&details()).unwrap();

        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "crash-ren-3d-20260301-123000.000.txt"
        );
        assert!(std::fs::read_to_string(path).unwrap().contains("boom"));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "non-string panic payload");
    }
}

//! Return keyboard focus to the terminal after the browser login (macOS).
//!
//! Best effort: failures are logged and never fail the login.

use tracing::debug;

/// Application that had focus before the browser was opened.
#[derive(Debug, Default)]
pub struct FocusGuard {
    app: Option<String>,
}

impl FocusGuard {
    /// Record the frontmost application.
    #[must_use]
    pub fn capture() -> Self {
        Self {
            app: frontmost_application(),
        }
    }

    /// Application recorded by [`capture`](Self::capture), if any.
    #[must_use]
    pub fn application(&self) -> Option<&str> {
        self.app.as_deref()
    }

    /// Re-activate the recorded application.
    pub fn restore(self) {
        if let Some(app) = self.app {
            activate(&app);
        }
    }
}

#[cfg(target_os = "macos")]
fn frontmost_application() -> Option<String> {
    use std::process::Command;

    let output = Command::new("osascript")
        .args([
            "-e",
            "tell application \"System Events\" to return name of first application process whose frontmost is true",
        ])
        .output();

    match output {
        Ok(o) if o.status.success() => {
            let name = String::from_utf8_lossy(&o.stdout).trim().to_string();
            (!name.is_empty()).then_some(name)
        }
        Ok(o) => {
            tracing::warn!(
                stderr = %String::from_utf8_lossy(&o.stderr).trim(),
                "Unable to determine focused application"
            );
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Unable to determine focused application");
            None
        }
    }
}

#[cfg(not(target_os = "macos"))]
fn frontmost_application() -> Option<String> {
    None
}

#[cfg(target_os = "macos")]
fn activate(app: &str) {
    use std::process::Command;

    let script = format!("tell application \"{}\" to activate", app.replace('"', "\\\""));
    match Command::new("osascript").args(["-e", &script]).output() {
        Ok(o) if o.status.success() => debug!(app, "Restored focus"),
        Ok(o) => tracing::warn!(
            app,
            stderr = %String::from_utf8_lossy(&o.stderr).trim(),
            "Unable to restore focus"
        ),
        Err(e) => tracing::warn!(app, error = %e, "Unable to restore focus"),
    }
}

#[cfg(not(target_os = "macos"))]
fn activate(app: &str) {
    debug!(app, "Focus restore not supported on this platform");
}

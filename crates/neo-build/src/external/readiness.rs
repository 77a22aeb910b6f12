//! Readiness detection for external processes
//!
//! Decides, line by line, when a process has finished starting up and which
//! later lines are worth relaying. Process spawning never looks at line
//! content itself.

use std::time::Duration;

/// Fallback used when a process never prints a recognizable marker
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Line matcher for one kind of external process
pub trait ReadinessDetector: Send + Sync {
    /// Whether this stdout line marks the process as ready
    fn is_ready(&self, line: &str) -> bool;

    /// Whether a line received after readiness should be relayed
    fn is_notice(&self, line: &str) -> bool;
}

/// Dev server: ready once it prints its local listening address
#[derive(Debug, Clone, Copy, Default)]
pub struct DevServerReadiness;

impl ReadinessDetector for DevServerReadiness {
    fn is_ready(&self, line: &str) -> bool {
        ["Local:", "localhost:", "127.0.0.1:"]
            .iter()
            .any(|marker| line.contains(marker))
    }

    fn is_notice(&self, line: &str) -> bool {
        let line = line.to_ascii_lowercase();
        ["hmr update", "page reload", "hot updated"]
            .iter()
            .any(|marker| line.contains(marker))
    }
}

/// Watch builder: ready once it reports a finished build
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchBuildReadiness;

impl ReadinessDetector for WatchBuildReadiness {
    fn is_ready(&self, line: &str) -> bool {
        let line = line.to_ascii_lowercase();
        line.contains("built in") || line.contains("build finished")
    }

    fn is_notice(&self, line: &str) -> bool {
        let line = line.to_ascii_lowercase();
        ["built in", "build started", "rebuild"]
            .iter()
            .any(|marker| line.contains(marker))
    }
}

/// Remove ANSI escape sequences (colors, cursor movement) from a line
pub fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        // CSI: ESC [ params... final byte in @..~
        if chars.peek() == Some(&'[') {
            chars.next();
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
        } else {
            chars.next();
        }
    }

    out
}

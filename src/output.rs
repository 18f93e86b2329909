//! Output sink for the startup banner and the access log.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// A shared, line-oriented writer.
///
/// Clones write to the same destination. Each line is written under a lock
/// so concurrent requests never interleave their log lines.
#[derive(Clone)]
pub struct Output(Arc<Mutex<Box<dyn Write + Send>>>);

impl Output {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(writer))))
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Writes `line` plus a newline. Failures are logged, never returned.
    pub fn write_line(&self, line: impl fmt::Display) {
        let mut writer = self.0.lock();
        if let Err(e) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
            warn!("output write failed: {e}");
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::stderr()
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Output")
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Color {
    Red,
    Green,
}

/// Wraps `text` in the ANSI escape for `color`.
pub(crate) fn colorize(color: Color, text: &str) -> String {
    let code = match color {
        Color::Red => 31,
        Color::Green => 32,
    };
    format!("\u{1b}[{code}m{text}\u{1b}[0m")
}

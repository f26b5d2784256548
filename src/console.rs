//! Console output multiplexing.
//!
//! The sender loop owns the prompt and the receiver loop prints inbound
//! messages; both write to the same terminal. Every write here runs its full
//! sequence (clear the pending prompt line, print, reprint the prompt,
//! flush) inside one lock region so the two loops never interleave output
//! at sub-line granularity.

use std::io::{self, Write};
use std::sync::Mutex;

use crossterm::{
    cursor::MoveToColumn,
    queue,
    terminal::{Clear, ClearType},
};

use crate::framing::ChatMessage;

/// Serialized access to the shared terminal.
pub struct Console {
    name: String,
    out: Mutex<Box<dyn Write + Send>>,
}

impl Console {
    /// Console writing to stdout, prompting with the local display name.
    pub fn stdout(name: impl Into<String>) -> Self {
        Self::with_sink(name, Box::new(io::stdout()))
    }

    /// Console writing to an arbitrary sink. Used by tests to capture output.
    pub fn with_sink(name: impl Into<String>, sink: Box<dyn Write + Send>) -> Self {
        Self {
            name: name.into(),
            out: Mutex::new(sink),
        }
    }

    /// Print the local input prompt (`name: `) without a trailing newline.
    pub fn show_prompt(&self) -> io::Result<()> {
        let mut guard = self.lock();
        let out = guard.as_mut();
        write!(out, "{}: ", self.name)?;
        out.flush()
    }

    /// Display an inbound message, then restore the prompt.
    pub fn show_incoming(&self, message: &ChatMessage) -> io::Result<()> {
        let mut guard = self.lock();
        let mut out = guard.as_mut();
        queue!(&mut out, Clear(ClearType::CurrentLine), MoveToColumn(0))?;
        writeln!(out, "{message}")?;
        write!(out, "{}: ", self.name)?;
        out.flush()
    }

    /// Display a status line (disconnects, errors), then restore the prompt.
    pub fn show_notice(&self, text: &str) -> io::Result<()> {
        let mut guard = self.lock();
        let mut out = guard.as_mut();
        queue!(&mut out, Clear(ClearType::CurrentLine), MoveToColumn(0))?;
        writeln!(out, "* {text}")?;
        write!(out, "{}: ", self.name)?;
        out.flush()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn Write + Send>> {
        // A poisoned console lock only means another loop panicked while
        // printing; keep going with whatever state the sink is in.
        match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

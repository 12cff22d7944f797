//! Console output.
//!
//! Everything printed by the session goes through one writer task so lines
//! from background completions never interleave with a half-written prompt.

use crate::model::ResultTable;
use crate::render;
use crossterm::style::{style, Stylize};
use std::io::Write;
use tokio::sync::mpsc;

/// Output line routing for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
    /// Written without a newline and flushed immediately.
    Prompt(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
pub fn spawn_output_writer() -> (mpsc::UnboundedSender<OutputLine>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{msg}");
                }
                OutputLine::Stderr(msg) => {
                    let _ = out.flush();
                    let _ = writeln!(err, "{msg}");
                }
                OutputLine::Prompt(prompt) => {
                    let _ = write!(out, "{prompt}");
                    let _ = out.flush();
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Plain,
    Info,
    Success,
    Warn,
    Error,
}

/// Cheap handle the session and background tasks use to print.
#[derive(Debug, Clone)]
pub struct Console {
    tx: mpsc::UnboundedSender<OutputLine>,
    color: bool,
}

impl Console {
    pub fn new(tx: mpsc::UnboundedSender<OutputLine>, color: bool) -> Self {
        Self { tx, color }
    }

    fn paint(&self, tone: Tone, msg: &str) -> String {
        if !self.color {
            return msg.to_string();
        }
        match tone {
            Tone::Plain => msg.to_string(),
            Tone::Info => style(msg).cyan().to_string(),
            Tone::Success => style(msg).green().to_string(),
            Tone::Warn => style(msg).yellow().to_string(),
            Tone::Error => style(msg).red().to_string(),
        }
    }

    fn send(&self, line: OutputLine) {
        // Closed only during shutdown.
        let _ = self.tx.send(line);
    }

    pub fn line(&self, msg: impl AsRef<str>) {
        self.send(OutputLine::Stdout(self.paint(Tone::Plain, msg.as_ref())));
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.send(OutputLine::Stdout(self.paint(Tone::Info, msg.as_ref())));
    }

    pub fn success(&self, msg: impl AsRef<str>) {
        self.send(OutputLine::Stdout(self.paint(Tone::Success, msg.as_ref())));
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.send(OutputLine::Stderr(self.paint(Tone::Warn, msg.as_ref())));
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.send(OutputLine::Stderr(self.paint(Tone::Error, msg.as_ref())));
    }

    pub fn prompt(&self, prompt: &str) {
        self.send(OutputLine::Prompt(prompt.to_string()));
    }

    /// Render rows with an optional header, sized to the terminal.
    pub fn table(&self, header: &[String], rows: &[Vec<String>]) {
        for line in render::render_table(header, rows, render::max_cell_width()) {
            self.line(line);
        }
    }

    pub fn results(&self, table: &ResultTable) {
        self.table(&table.header, &table.rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_console_keeps_text_untouched() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let console = Console::new(tx, false);
        console.error("boom");
        console.success("ok");
        console.prompt("oblv> ");

        assert_eq!(rx.try_recv().unwrap(), OutputLine::Stderr("boom".into()));
        assert_eq!(rx.try_recv().unwrap(), OutputLine::Stdout("ok".into()));
        assert_eq!(rx.try_recv().unwrap(), OutputLine::Prompt("oblv> ".into()));
    }

    #[test]
    fn coloured_console_wraps_in_ansi_sequences() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        Console::new(tx, true).info("hello");
        let OutputLine::Stdout(text) = rx.try_recv().unwrap() else {
            panic!("expected stdout line");
        };
        assert!(text.contains("hello"));
        assert!(text.starts_with('\u{1b}'));
    }
}

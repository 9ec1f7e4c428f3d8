//! Reporters: the incremental progress renderer and the buffered error collector

use crate::error::TestError;
use crate::event::{Buffering, Event, Subscriber};
use colored::*;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

/// Where reporters write. Cloned handles share one sink so lines never interleave.
#[derive(Clone)]
pub struct Output {
    sink: Arc<Mutex<Sink>>,
}

enum Sink {
    Stdout,
    Memory(Vec<u8>),
}

impl Output {
    pub fn stdout() -> Self {
        Self {
            sink: Arc::new(Mutex::new(Sink::Stdout)),
        }
    }

    /// An in-memory sink, read back with [`Output::contents`]
    pub fn memory() -> Self {
        Self {
            sink: Arc::new(Mutex::new(Sink::Memory(Vec::new()))),
        }
    }

    pub fn write_str(&self, text: &str) -> io::Result<()> {
        match &mut *self.sink.lock() {
            Sink::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(text.as_bytes())?;
                stdout.flush()
            }
            Sink::Memory(buf) => {
                buf.extend_from_slice(text.as_bytes());
                Ok(())
            }
        }
    }

    pub fn write_line(&self, line: &str) -> io::Result<()> {
        self.write_str(&format!("{}\n", line))
    }

    /// Everything written so far; empty for stdout
    pub fn contents(&self) -> String {
        match &*self.sink.lock() {
            Sink::Stdout => String::new(),
            Sink::Memory(buf) => String::from_utf8_lossy(buf).into_owned(),
        }
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &*self.sink.lock() {
            Sink::Stdout => "stdout",
            Sink::Memory(_) => "memory",
        };
        write!(f, "Output({})", kind)
    }
}

/// Writes a line per event as it arrives, indented by suite depth
pub struct ProgressRenderer {
    out: Output,
    depth: usize,
}

impl ProgressRenderer {
    pub fn new(out: Output) -> Self {
        Self { out, depth: 0 }
    }

    fn indent(&self) -> String {
        "  ".repeat(self.depth)
    }

    fn write_failure(&self, name: &str, error: &TestError) -> io::Result<()> {
        let indent = self.indent();
        self.out
            .write_line(&format!("{}{}", indent, format!(" ✗  {}", name).red()))?;
        for line in error_lines(error) {
            self.out.write_line(&format!("{} | {}", indent, line))?;
        }
        Ok(())
    }
}

impl Subscriber for ProgressRenderer {
    fn on_event(&mut self, event: &Event) -> io::Result<()> {
        match event {
            Event::SuiteStart { name, .. } => {
                self.out
                    .write_line(&format!("{} {}", self.indent(), name.bold()))?;
                self.depth += 1;
            }
            Event::SuiteEnd { .. } => self.depth = self.depth.saturating_sub(1),
            Event::TestStart { .. } | Event::ContextTeardown { .. } => {}
            Event::TestEnd { name, error, .. } => match error {
                None => self
                    .out
                    .write_line(&format!("{}{}", self.indent(), format!(" ✓  {}", name).green()))?,
                Some(error) => self.write_failure(name, error)?,
            },
            Event::Uncaught { error } => self.write_failure("uncaught error", error)?,
        }
        Ok(())
    }
}

/// Collects a block per error and hands them over once the stream closes
#[derive(Debug, Default)]
pub struct ErrorCollector {
    blocks: Vec<String>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The whole error report, one block per error, each followed by a blank line
    pub fn render(&self) -> String {
        self.blocks.concat()
    }

    fn push(&mut self, header: String, lines: Vec<String>) {
        let mut block = format!("{}\n", header.red());
        for line in lines {
            block.push_str(&format!("  {}\n", line));
        }
        block.push('\n');
        self.blocks.push(block);
    }
}

impl Subscriber for ErrorCollector {
    fn buffering(&self) -> Buffering {
        Buffering::UntilClose
    }

    fn on_event(&mut self, event: &Event) -> io::Result<()> {
        match event {
            Event::TestEnd {
                name,
                path,
                error: Some(error),
            } => {
                let mut full = path.clone();
                full.push(name.clone());
                self.push(full.join(" > "), error_lines(error));
            }
            Event::ContextTeardown { path, error } => {
                let mut lines = vec![format!("Error: {}", error)];
                if let Some(origin) = &error.origin {
                    lines.push(format!("    at {}", origin));
                }
                self.push(
                    format!("{} (persistent context teardown)", path.join(" > ")),
                    lines,
                );
            }
            Event::Uncaught { error } => {
                self.push("uncaught error".to_string(), error_lines(error));
            }
            _ => {}
        }
        Ok(())
    }
}

fn error_lines(error: &TestError) -> Vec<String> {
    let mut lines = vec![format!("Error: {}", error)];
    if let Some(origin) = error.origin() {
        lines.push(format!("    at {}", origin));
    }
    lines
}

/// `Executed <n> test<s>[: <m> error<s>].`
pub fn tally_line(total: usize, errors: usize) -> String {
    let tests = if total == 1 { "test" } else { "tests" };
    if errors == 0 {
        format!("Executed {} {}.", total, tests)
    } else {
        let noun = if errors == 1 { "error" } else { "errors" };
        format!("Executed {} {}: {} {}.", total, tests, errors, noun)
    }
}

//! Console output.
//!
//! The session and orchestrator write through the [`Console`] trait so the
//! terminal can be swapped for a [`RecordingConsole`] in tests.

use std::sync::Mutex;

use owo_colors::{AnsiColors, OwoColorize};

use crate::theme::{Accent, Theme};

/// Where startup banners, announcements, and results go.
pub trait Console: Send + Sync {
    fn render_splash(&self, theme: &Theme);
    fn announce(&self, message: &str);
    fn write_output(&self, text: &str);
    fn write_error(&self, text: &str);
}

fn ansi(accent: Accent) -> AnsiColors {
    match accent {
        Accent::Magenta => AnsiColors::Magenta,
        Accent::Cyan => AnsiColors::Cyan,
        Accent::Blue => AnsiColors::Blue,
    }
}

/// Writes to stdout/stderr with ANSI colors.
#[derive(Debug, Default)]
pub struct TerminalConsole;

impl Console for TerminalConsole {
    fn render_splash(&self, theme: &Theme) {
        println!("{}\n", theme.splash().color(ansi(theme.accent)).bold());
    }

    fn announce(&self, message: &str) {
        println!("{}", message.bold());
    }

    fn write_output(&self, text: &str) {
        if !text.is_empty() {
            println!("{}", text.trim_end());
        }
    }

    fn write_error(&self, text: &str) {
        if !text.is_empty() {
            eprintln!("{}", text.trim_end().red());
        }
    }
}

/// One line captured by [`RecordingConsole`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleLine {
    Splash(String),
    Announce(String),
    Output(String),
    Error(String),
}

/// Captures everything written, for assertions.
#[derive(Debug, Default)]
pub struct RecordingConsole {
    lines: Mutex<Vec<ConsoleLine>>,
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<ConsoleLine> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Theme names of every splash rendered.
    pub fn splashes(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|l| match l {
                ConsoleLine::Splash(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn announcements(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|l| match l {
                ConsoleLine::Announce(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn outputs(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|l| match l {
                ConsoleLine::Output(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|l| match l {
                ConsoleLine::Error(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, line: ConsoleLine) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }
}

impl Console for RecordingConsole {
    fn render_splash(&self, theme: &Theme) {
        self.push(ConsoleLine::Splash(theme.name.to_string()));
    }

    fn announce(&self, message: &str) {
        self.push(ConsoleLine::Announce(message.to_string()));
    }

    fn write_output(&self, text: &str) {
        self.push(ConsoleLine::Output(text.to_string()));
    }

    fn write_error(&self, text: &str) {
        self.push(ConsoleLine::Error(text.to_string()));
    }
}

use crate::channels::errors::ErrorEvent;
use crate::event_bus::Event;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta / dark pink
pub const RESET_COLOR: &str = "\x1b[0m";

/// Rendered output for a telemetry item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
    fn render_errors(&self, errors: &[ErrorEvent]) -> Vec<EventRender>;
}

/// Controls whether rendered telemetry carries ANSI color codes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FormatterMode {
    /// Colorize when stdout looks like a terminal, plain otherwise.
    #[default]
    Auto,
    /// Always emit ANSI color codes.
    Colored,
    /// Never emit ANSI color codes.
    Plain,
}

impl FormatterMode {
    fn colorize(self) -> bool {
        match self {
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
            FormatterMode::Auto => std::io::IsTerminal::is_terminal(&std::io::stdout()),
        }
    }
}

pub struct PlainFormatter {
    mode: FormatterMode,
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlainFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: FormatterMode::Auto,
        }
    }

    #[must_use]
    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }

    fn colors(&self) -> (&'static str, &'static str, &'static str) {
        if self.mode.colorize() {
            (CONTEXT_COLOR, LINE_COLOR, RESET_COLOR)
        } else {
            ("", "", "")
        }
    }
}

fn format_error_chain(
    error: &crate::channels::errors::LadderError,
    indent: usize,
    line_color: &str,
    reset_color: &str,
) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(cause) = &error.cause {
        let indent_str = "  ".repeat(indent);
        lines.push(format!(
            "{line_color}{indent_str}cause: {}{reset_color}\n",
            cause.message
        ));
        lines.extend(format_error_chain(cause, indent + 1, line_color, reset_color));
    }
    lines
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let (_, line_color, reset_color) = self.colors();
        let line = format!("{line_color}{event}{reset_color}\n");
        EventRender {
            context: event.scope_label().map(|s| s.to_string()),
            lines: vec![line],
        }
    }

    fn render_errors(&self, errors: &[ErrorEvent]) -> Vec<EventRender> {
        let (ctx_color, line_color, reset_color) = self.colors();
        errors
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let mut lines = Vec::new();
                let scope_str = format!("{ctx_color}{:?}{reset_color}", e.scope);
                lines.push(format!("[{}] {} | {}\n", i, e.when, scope_str));
                lines.push(format!(
                    "{line_color}  error: {}{reset_color}\n",
                    e.error.message
                ));
                lines.extend(format_error_chain(&e.error, 1, line_color, reset_color));
                if !e.tags.is_empty() {
                    lines.push(format!("{line_color}  tags: {:?}{reset_color}\n", e.tags));
                }
                if !e.context.is_null() {
                    lines.push(format!(
                        "{line_color}  context: {}{reset_color}\n",
                        e.context
                    ));
                }
                EventRender {
                    context: Some(format!("{:?}", e.scope)),
                    lines,
                }
            })
            .collect()
    }
}

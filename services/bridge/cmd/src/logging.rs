//! Console log formatting for the bridge binary.
//!
//! Lines look like `[timestamp] [component] [level] message`. The component is
//! taken from an explicit `component` field when present, otherwise from the
//! crate that emitted the event (`bridge_session::heartbeat` becomes
//! `bridge-session`).

use std::fmt;
use std::io::IsTerminal;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

const COMPONENT_WIDTH: usize = 18;
const LOG_LEVEL_WIDTH: usize = 7;

/// Log event with an explicit component
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Warning with an explicit component
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

/// Debug event with an explicit component
#[macro_export]
macro_rules! component_debug {
    ($component:expr, $($arg:tt)*) => {
        tracing::debug!(component = $component, $($arg)*)
    };
}

/// Formatter for the bridge's console output
#[derive(Debug, Clone)]
pub struct BridgeLogFormatter {
    service_name: String,
    color_enabled: bool,
}

impl BridgeLogFormatter {
    /// Formatter that colors output when stdout is a terminal
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            color_enabled: is_terminal(),
        }
    }

    /// Force colors on or off
    pub fn with_colors(mut self, enabled: bool) -> Self {
        self.color_enabled = enabled;
        self
    }

    fn component_name(&self, component: Option<&str>, target: &str) -> String {
        let name = match component {
            Some(comp) => format!("{}-{}", self.service_name, comp),
            None => {
                let krate = target.split("::").next().unwrap_or(target);
                if krate.starts_with("bridge_") {
                    krate.replace('_', "-")
                } else {
                    self.service_name.clone()
                }
            }
        };

        if name.chars().count() > COMPONENT_WIDTH {
            let cut: String = name.chars().take(COMPONENT_WIDTH - 1).collect();
            format!("{}…", cut)
        } else {
            format!("{:<width$}", name, width = COMPONENT_WIDTH)
        }
    }

    fn level_label(level: &Level) -> String {
        let label = match *level {
            Level::ERROR => "✗ ERROR",
            Level::WARN => "⚠ WARN",
            Level::INFO => "ℹ INFO",
            Level::DEBUG => "◦ DEBUG",
            Level::TRACE => "◦ TRACE",
        };
        format!("{:<width$}", label, width = LOG_LEVEL_WIDTH + 2)
    }

    fn level_color(&self, level: &Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }
        match *level {
            Level::ERROR => COLOR_BRIGHT_RED,
            Level::WARN => COLOR_BRIGHT_YELLOW,
            Level::INFO => COLOR_GREEN,
            Level::DEBUG | Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }

    /// Render one line without the trailing newline
    fn render(&self, level: &Level, target: &str, fields: &FieldVisitor, timestamp: &str) -> String {
        let color = self.level_color(level);
        let (cyan, reset) = if self.color_enabled {
            (COLOR_CYAN, COLOR_RESET)
        } else {
            ("", "")
        };
        let mut line = format!(
            "{}[{}] [{}] [{}{}{}] {}",
            cyan,
            timestamp,
            self.component_name(fields.component.as_deref(), target),
            color,
            Self::level_label(level),
            reset,
            fields.message
        );
        for (key, value) in &fields.extra {
            line.push_str(&format!(" {}={}", key, value));
        }
        line.push_str(reset);
        line
    }
}

impl<S, N> FormatEvent<S, N> for BridgeLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string();
        let metadata = event.metadata();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        writeln!(
            writer,
            "{}",
            self.render(metadata.level(), metadata.target(), &visitor, &timestamp)
        )
    }
}

#[derive(Debug, Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
    extra: Vec<(String, String)>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            name => self.extra.push((name.to_string(), value.to_string())),
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        let unquoted = rendered
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .map(str::to_string)
            .unwrap_or(rendered);
        match field.name() {
            "message" => self.message = unquoted,
            "component" => self.component = Some(unquoted),
            name => self.extra.push((name.to_string(), unquoted)),
        }
    }
}

fn is_terminal() -> bool {
    std::env::var("TERM").map_or(false, |term| term != "dumb") && std::io::stdout().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatter() -> BridgeLogFormatter {
        BridgeLogFormatter::new("bridge").with_colors(false)
    }

    fn fields(message: &str, component: Option<&str>) -> FieldVisitor {
        FieldVisitor {
            message: message.to_string(),
            component: component.map(str::to_string),
            extra: Vec::new(),
        }
    }

    #[test]
    fn test_component_from_target() {
        let f = formatter();
        assert_eq!(
            f.component_name(None, "bridge_session::heartbeat").trim_end(),
            "bridge-session"
        );
        assert_eq!(f.component_name(None, "wallet_bridge").trim_end(), "bridge");
        assert_eq!(
            f.component_name(Some("simulator"), "wallet_bridge").trim_end(),
            "bridge-simulator"
        );
    }

    #[test]
    fn test_long_component_truncated() {
        let name = formatter().component_name(Some("a-very-long-component-name"), "x");
        assert_eq!(name.chars().count(), COMPONENT_WIDTH);
        assert!(name.ends_with('…'));
    }

    #[test]
    fn test_render_line() {
        let mut visitor = fields("Peer health healthy -> degraded", None);
        visitor.extra.push(("session".into(), "server_x_y".into()));
        let line = formatter().render(
            &Level::WARN,
            "bridge_session::heartbeat",
            &visitor,
            "2024-01-01 00:00:00.000",
        );
        assert!(line.starts_with("[2024-01-01 00:00:00.000] [bridge-session"));
        assert!(line.contains("⚠ WARN"));
        assert!(line.ends_with("Peer health healthy -> degraded session=server_x_y"));
        assert!(!line.contains('\x1b'));
    }
}

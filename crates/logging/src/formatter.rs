// crates/logging/src/formatter.rs
use std::fmt;
use time::{OffsetDateTime, macros::format_description};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, format::Writer};
use tracing_subscriber::registry::LookupSpan;

/// Plain-text line format: `YYYY/MM/DD HH:MM:SS [pid] message key=value`.
#[derive(Debug, Clone, Copy)]
pub struct DaemonFormatter {
    timestamps: bool,
}

impl DaemonFormatter {
    pub fn new(timestamps: bool) -> Self {
        Self { timestamps }
    }
}

impl Default for DaemonFormatter {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Collects the message and the remaining fields of an event.
#[derive(Default)]
pub(crate) struct MessageVisitor {
    pub(crate) msg: String,
    fields: Vec<(&'static str, String)>,
}

impl MessageVisitor {
    /// Message followed by `key=value` pairs, or `fallback` when empty.
    pub(crate) fn line(&self, fallback: &str) -> String {
        let mut out = if self.msg.is_empty() && self.fields.is_empty() {
            fallback.to_string()
        } else {
            self.msg.clone()
        };
        for (name, value) in &self.fields {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(name);
            out.push('=');
            out.push_str(value);
        }
        out
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.msg.push_str(value);
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.msg.push_str(&format!("{value:?}"));
        } else {
            self.fields.push((field.name(), format!("{value:?}")));
        }
    }
}

pub(crate) fn format_time() -> Result<String, fmt::Error> {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let fmt = format_description!("[year]/[month]/[day] [hour]:[minute]:[second]");
    now.format(&fmt).map_err(|_| fmt::Error)
}

impl<S, N> FormatEvent<S, N> for DaemonFormatter
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
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if self.timestamps {
            write!(writer, "{} [{}] ", format_time()?, std::process::id())?;
        }
        writer.write_str(&visitor.line(event.metadata().target()))?;
        writer.write_char('\n')
    }
}

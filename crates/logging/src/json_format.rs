// crates/logging/src/json_format.rs
#![allow(missing_docs)]

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{Event, Subscriber};
use tracing_serde::{AsSerde, fields::AsMap};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, format::Writer};
use tracing_subscriber::registry::LookupSpan;

#[derive(Serialize)]
struct Record<'a> {
    timestamp: String,
    level: Value,
    target: &'a str,
    pid: u32,
    fields: Value,
}

/// One JSON object per event.
#[derive(Default)]
pub struct JsonFormatter;

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let timestamp = OffsetDateTime::now_utc()
            .format(&time::macros::format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
            ))
            .map_err(|_| std::fmt::Error)?;
        let record = Record {
            timestamp,
            level: serde_json::to_value(event.metadata().level().as_serde())
                .map_err(|_| std::fmt::Error)?,
            target: event.metadata().target(),
            pid: std::process::id(),
            fields: serde_json::to_value(event.field_map()).map_err(|_| std::fmt::Error)?,
        };
        let data = serde_json::to_string(&record).map_err(|_| std::fmt::Error)?;
        writer.write_str(&data)?;
        writer.write_char('\n')
    }
}

// crates/logging/src/subscriber.rs
#![allow(missing_docs)]

use crate::flags::{LogFormat, SubscriberConfig};
use crate::formatter::DaemonFormatter;
use crate::json_format::JsonFormatter;
use crate::sink::{FileWriter, StderrWriter};
use std::io;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::Layer, layer::SubscriberExt};

#[cfg(all(unix, feature = "syslog"))]
mod syslog {
    use crate::flags::{DEFAULT_IDENT, DEFAULT_SYSLOG_PATH};
    use crate::formatter::MessageVisitor;
    use std::io;
    use std::os::unix::net::UnixDatagram;
    use std::path::Path;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer};

    const FACILITY_DAEMON: u8 = 3;

    pub(crate) struct SyslogLayer {
        sock: UnixDatagram,
    }

    impl SyslogLayer {
        pub(crate) fn new(path: Option<&Path>) -> io::Result<Self> {
            let sock = UnixDatagram::unbound()?;
            sock.connect(path.unwrap_or(Path::new(DEFAULT_SYSLOG_PATH)))?;
            Ok(Self { sock })
        }
    }

    fn severity(level: Level) -> u8 {
        match level {
            Level::ERROR => 3,
            Level::WARN => 4,
            Level::INFO => 6,
            Level::DEBUG | Level::TRACE => 7,
        }
    }

    impl<S> Layer<S> for SyslogLayer
    where
        S: Subscriber,
    {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut v = MessageVisitor::default();
            event.record(&mut v);
            let pri = FACILITY_DAEMON * 8 + severity(*event.metadata().level());
            let pid = std::process::id();
            let data = format!(
                "<{pri}>{DEFAULT_IDENT}[{pid}]: {}",
                v.line(event.metadata().target())
            );
            let _ = self.sock.send(data.as_bytes());
        }
    }
}

fn level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Build a [`tracing`] subscriber for the daemon.
///
/// `filter` directives override the level derived from `verbose`.
pub fn subscriber(cfg: SubscriberConfig) -> io::Result<Box<dyn tracing::Subscriber + Send + Sync>> {
    let SubscriberConfig {
        format,
        verbose,
        filter,
        stderr,
        log_file,
        syslog,
        syslog_path,
    } = cfg;

    let filter = EnvFilter::builder()
        .with_default_directive(level(verbose).into())
        .parse_lossy(filter.as_deref().unwrap_or_default());

    let stderr_layer = stderr.then(|| {
        let base = tracing_fmt::layer()
            .with_writer(StderrWriter)
            .with_ansi(false);
        match format {
            LogFormat::Json => base.event_format(JsonFormatter).boxed(),
            LogFormat::Text => base.event_format(DaemonFormatter::default()).boxed(),
        }
    });

    let file_layer = log_file.map(|file| {
        let base = tracing_fmt::layer()
            .with_writer(FileWriter { file })
            .with_ansi(false);
        match format {
            LogFormat::Json => base.event_format(JsonFormatter).boxed(),
            LogFormat::Text => base.event_format(DaemonFormatter::new(true)).boxed(),
        }
    });

    #[cfg(all(unix, feature = "syslog"))]
    let syslog_layer = if syslog {
        syslog::SyslogLayer::new(syslog_path.as_deref()).ok()
    } else {
        None
    };
    #[cfg(not(all(unix, feature = "syslog")))]
    let syslog_layer: Option<tracing_subscriber::layer::Identity> = {
        let _ = (syslog, syslog_path);
        None
    };

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .with(syslog_layer);
    Ok(Box::new(registry))
}

/// Install the subscriber as the process-wide default.
pub fn init(cfg: SubscriberConfig) -> io::Result<()> {
    let sub = subscriber(cfg)?;
    tracing::subscriber::set_global_default(sub).map_err(io::Error::other)
}

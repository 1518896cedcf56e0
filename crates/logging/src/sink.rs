// crates/logging/src/sink.rs
use std::fs::File;
use std::io;
use tracing_subscriber::fmt::MakeWriter;

/// Appends formatted events to an open log file.
///
/// Each event is a single `write(2)` on an `O_APPEND` descriptor, so lines
/// from concurrent worker processes do not interleave.
pub(crate) struct FileWriter {
    pub(crate) file: File,
}

impl<'a> MakeWriter<'a> for FileWriter {
    type Writer = &'a File;

    fn make_writer(&'a self) -> Self::Writer {
        &self.file
    }
}

/// Standard error, resolved per event.
pub(crate) struct StderrWriter;

impl<'a> MakeWriter<'a> for StderrWriter {
    type Writer = io::Stderr;

    fn make_writer(&'a self) -> Self::Writer {
        io::stderr()
    }
}

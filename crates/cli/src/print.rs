// crates/cli/src/print.rs

use clap::CommandFactory;
use clap::error::ErrorKind;

use crate::Opts;

/// Print a parse failure and return its exit status. Help and version
/// requests go to stdout and succeed; anything else is an argument error.
pub fn report_clap_error(e: clap::Error) -> i32 {
    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            print!("{e}");
            0
        }
        _ => {
            let rendered = e.render().to_string();
            eprint!("{rendered}");
            if !rendered.contains("Usage:") {
                eprintln!("\n{}", Opts::command().render_usage());
            }
            1
        }
    }
}

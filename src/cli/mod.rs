pub mod commands;
pub mod output;
pub mod types;

pub use output::progress::{create_progress_bar, create_spinner};
pub use types::{Cli, Commands};

use console::style;

/// Report a command failure and exit with status 1
///
/// The whole error chain is printed, so the error that triggered a fatal
/// search abort stays visible.
pub fn handle_error(err: anyhow::Error, json: bool) -> ! {
    if json {
        let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "error": err.to_string(),
            "causes": causes,
        });
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_else(|_| err.to_string())
        );
    } else {
        eprintln!("{} {}", style("error:").red().bold(), err);
        for cause in err.chain().skip(1) {
            eprintln!("  {} {}", style("caused by:").yellow(), cause);
        }
    }
    std::process::exit(1);
}

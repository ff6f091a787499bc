//! Opt-in tracing setup for embedders.

use std::fs::File;
use tracing_subscriber::prelude::*;

/// Initialize logging. With `OUTRIDER_LOG` set, debug traces go to
/// `outrider.log`; otherwise `RUST_LOG` controls stderr output as usual.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    if std::env::var("OUTRIDER_LOG").is_ok() {
        match File::create("outrider.log") {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false);
                let filter = tracing_subscriber::EnvFilter::new("outrider=debug");
                let _ = tracing_subscriber::registry()
                    .with(file_layer.with_filter(filter))
                    .try_init();
            }
            Err(err) => {
                eprintln!("Failed to create log file: {err}");
            }
        }
    } else if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

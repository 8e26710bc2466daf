//! vidupe - Duplicate Video Finder
//!
//! Usage: `vidupe [DIR]...`. Every other setting comes from `config.toml`
//! or `VIDUPE_*` environment variables.

use std::path::PathBuf;

use vidupe::config::Config;
use vidupe::error::{ExitCode, StructuredError};
use vidupe::logging::init_logging;
use vidupe::signal::{install_handler, ShutdownHandler};

fn main() {
    let roots: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();

    let config = match Config::load() {
        Ok(config) => config.with_roots(roots),
        Err(err) => {
            let exit_code = ExitCode::GeneralError;
            eprintln!("[{}] Error: {}", exit_code.code_prefix(), err);
            std::process::exit(exit_code.as_i32());
        }
    };
    let json_errors = config.json_errors;

    init_logging(config.verbose, config.quiet);

    let shutdown = match install_handler() {
        Ok(handler) => handler,
        Err(e) => {
            log::warn!("{}; Ctrl+C will stop the scan without saving the cache", e);
            ShutdownHandler::new()
        }
    };

    match vidupe::run_app(config, &shutdown) {
        Ok(code) => std::process::exit(code.as_i32()),
        Err(err) => {
            let exit_code = ExitCode::for_error(&err);

            if json_errors {
                let structured = StructuredError::new(&err, exit_code);
                match serde_json::to_string_pretty(&structured) {
                    Ok(json) => eprintln!("{}", json),
                    Err(_) => eprintln!("[{}] Error: {:#}", exit_code.code_prefix(), err),
                }
            } else {
                eprintln!("[{}] Error: {:#}", exit_code.code_prefix(), err);
            }

            std::process::exit(exit_code.as_i32());
        }
    }
}

//! Graceful shutdown on Ctrl+C.
//!
//! The handler flips a shared [`AtomicBool`]. Workers check it before each
//! file; work already in flight completes, the cache is flushed, and the run
//! exits with [`ExitCode::Interrupted`](crate::error::ExitCode::Interrupted).

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Flag to hand to the finder and walker.
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install the process-wide Ctrl+C handler.
///
/// Repeated calls return the already installed handler with its flag reset.
/// If another handler was registered outside this module, an unhooked
/// handler is returned that still honors [`ShutdownHandler::request_shutdown`].
///
/// # Errors
///
/// Currently infallible in practice; the error type is kept for callers that
/// want to surface registration failures.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let flag = handler.get_flag();

    let installed = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let _ = writeln!(
            std::io::stderr(),
            "\nInterrupted. Finishing in-flight files and saving the cache..."
        );
        let _ = std::io::stderr().flush();
        log::info!("Shutdown signal received");
    });

    match installed {
        Ok(()) => {
            let _ = GLOBAL_HANDLER.set(handler.clone());
            Ok(GLOBAL_HANDLER.get().cloned().unwrap_or(handler))
        }
        Err(e) => {
            if let Some(handler) = GLOBAL_HANDLER.get() {
                handler.reset();
                return Ok(handler.clone());
            }
            log::debug!("Ctrl+C handler already registered ({}), using unhooked handler", e);
            let fallback = ShutdownHandler::new();
            let _ = GLOBAL_HANDLER.set(fallback.clone());
            Ok(fallback)
        }
    }
}

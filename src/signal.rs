//! Ctrl+C handling.
//!
//! A single `AtomicBool` is shared by the walker, the hasher, the fingerprint
//! prefetch pool and the matrix engine. Setting it stops work between two
//! completed fingerprint computations; everything already written to the
//! store stays committed.
//!
//! ```rust,no_run
//! use songdedupe::signal::install_handler;
//! use songdedupe::duplicates::FinderConfig;
//!
//! let handler = install_handler().expect("signal handler");
//! let config = FinderConfig::default().with_shutdown_flag(handler.get_flag());
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Exit status for an interrupted run (128 + SIGINT).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Shared shutdown flag.
///
/// Wraps one `Arc<AtomicBool>`. Clones share the flag, so the handler kept
/// by `run_app` and the copies handed to the walker, hasher, prefetch pool
/// and matrix engine all observe the same Ctrl+C.
///
/// # Thread Safety
///
/// `ShutdownHandler` is `Send` and `Sync`; every access is a `SeqCst` atomic
/// load or store.
///
/// # Example
///
/// ```rust,no_run
/// use songdedupe::signal::ShutdownHandler;
/// use std::sync::atomic::Ordering;
///
/// let handler = ShutdownHandler::new();
/// let flag = handler.get_flag();
///
/// handler.request_shutdown();
/// assert!(flag.load(Ordering::SeqCst));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    /// Set once shutdown was requested.
    flag: Arc<AtomicBool>,
}

impl ShutdownHandler {
    /// Create a handler with no shutdown requested.
    ///
    /// # Returns
    ///
    /// A handler whose flag is `false`. Nothing is hooked to Ctrl+C; use
    /// [`install_handler`] for that.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether Ctrl+C was pressed or [`request_shutdown`](Self::request_shutdown) called.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Set the flag by hand.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clone of the flag for worker threads.
    ///
    /// # Returns
    ///
    /// An `Arc` sharing this handler's flag, suitable for
    /// `FinderConfig::with_shutdown_flag`.
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Clear the flag.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Failed to install the Ctrl+C handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install the process-wide Ctrl+C handler.
///
/// `ctrlc` only accepts one handler per process, so repeated calls (tests
/// driving `run_app` several times) get the already-installed handler back
/// with its flag cleared.
///
/// # Returns
///
/// The process-wide [`ShutdownHandler`], its flag cleared.
///
/// # Errors
///
/// Returns [`SignalError`] only when the OS refuses the hook and no handler
/// was installed before.
///
/// # Example
///
/// ```rust,no_run
/// use songdedupe::signal::install_handler;
///
/// let handler = install_handler().expect("signal handler");
/// if handler.is_shutdown_requested() {
///     eprintln!("interrupted before the scan started");
/// }
/// ```
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
            "\nInterrupted. Finishing current fingerprint, progress is saved..."
        );
        let _ = std::io::stderr().flush();
        log::info!("Shutdown signal received");
    });

    match installed {
        Ok(()) => {
            let _ = GLOBAL_HANDLER.set(handler.clone());
            Ok(handler)
        }
        Err(ctrlc::Error::MultipleHandlers) => {
            log::debug!("Ctrl+C handler already registered, using unhooked handler");
            let fallback = GLOBAL_HANDLER.get_or_init(ShutdownHandler::new);
            fallback.reset();
            Ok(fallback.clone())
        }
        Err(e) => Err(SignalError::InstallFailed(e)),
    }
}

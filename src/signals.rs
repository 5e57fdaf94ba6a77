//! SIGINT/SIGTERM handling.
//!
//! The handler only stores into a static flag. The watch loop polls it between ticks
//! and while sleeping, then runs its final flush on the main thread.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use log::debug;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Installs the handler and returns the flag it sets.
pub fn install_shutdown_handler() -> Result<&'static AtomicBool> {
    for signal in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the handler is async-signal-safe, it only performs an atomic store.
        let previous = unsafe {
            libc::signal(signal, on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t)
        };
        if previous == libc::SIG_ERR {
            bail!("Failed to install handler for signal {signal}");
        }
    }
    debug!("installed shutdown handler");
    Ok(&SHUTDOWN)
}

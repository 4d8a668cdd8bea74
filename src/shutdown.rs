// ABOUTME: Shared shutdown flag set by signal handlers, polled by the engine
// ABOUTME: Observing it is a clean exit, not an error

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A single shared flag replacing per-signal globals: SIGINT and SIGTERM
/// both request the same orderly stop. The engine polls it at every loop
/// iteration and before every sleep.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    inner: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Install signal handlers that set `flag` on the first SIGINT or SIGTERM.
pub fn listen_for_signals(flag: ShutdownFlag) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received");
        flag.request();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

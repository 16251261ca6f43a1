//! OS signal handling for the pipeline binary.
//!
//! Stopping the pipeline is a clean shutdown at the source: the binary
//! stops reading metrics, the source channel closes, and every stage
//! drains in turn. SIGQUIT additionally dumps the in-progress spans
//! before stopping, for operational visibility into what was still open.

use log::info;
use std::fmt;

/// The signal that triggered shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT (Ctrl+C).
    Interrupt,
    /// SIGTERM (kill, container runtimes).
    Terminate,
    /// SIGHUP (terminal hangup).
    Hangup,
    /// SIGQUIT: shut down after dumping in-progress spans.
    Quit,
}

impl ShutdownSignal {
    /// Whether the diagnostic span dump should run before stopping.
    pub fn wants_dump(&self) -> bool {
        matches!(self, ShutdownSignal::Quit)
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
            ShutdownSignal::Hangup => write!(f, "SIGHUP"),
            ShutdownSignal::Quit => write!(f, "SIGQUIT"),
        }
    }
}

/// Wait for any shutdown signal and report which one arrived.
#[cfg(unix)]
pub async fn shutdown_signal() -> ShutdownSignal {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sighup = signal(SignalKind::hangup()).expect("install SIGHUP handler");
    let mut sigquit = signal(SignalKind::quit()).expect("install SIGQUIT handler");

    let received = tokio::select! {
        _ = sigterm.recv() => ShutdownSignal::Terminate,
        _ = sigint.recv() => ShutdownSignal::Interrupt,
        _ = sighup.recv() => ShutdownSignal::Hangup,
        _ = sigquit.recv() => ShutdownSignal::Quit,
    };
    info!("received {}", received);
    received
}

/// Non-unix fallback: only Ctrl+C is available.
#[cfg(not(unix))]
pub async fn shutdown_signal() -> ShutdownSignal {
    tokio::signal::ctrl_c()
        .await
        .expect("install Ctrl+C handler");
    info!("received Ctrl+C");
    ShutdownSignal::Interrupt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_display() {
        assert_eq!(format!("{}", ShutdownSignal::Interrupt), "SIGINT");
        assert_eq!(format!("{}", ShutdownSignal::Quit), "SIGQUIT");
    }

    #[test]
    fn test_only_quit_wants_a_dump() {
        assert!(ShutdownSignal::Quit.wants_dump());
        assert!(!ShutdownSignal::Interrupt.wants_dump());
        assert!(!ShutdownSignal::Terminate.wants_dump());
        assert!(!ShutdownSignal::Hangup.wants_dump());
    }
}

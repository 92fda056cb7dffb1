use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;

use super::DaemonError;

/// OS signals the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Signal {
    #[display("SIGHUP")]
    Hangup,
    #[display("SIGINT")]
    Interrupt,
    #[display("SIGTERM")]
    Terminate,
    #[display("SIGQUIT")]
    Quit,
}

/// A stream of signals delivered to the daemon.
#[async_trait]
pub trait SignalSource: Send {
    /// Waits for the next signal. `None` means no more signals will arrive.
    async fn recv(&mut self) -> Option<Signal>;
}

/// Listens for `SIGHUP`, `SIGINT`, `SIGTERM` and `SIGQUIT`.
///
/// Handlers are installed on construction and buffer deliveries, so signals
/// arriving while a labeling pass is running are not lost.
pub struct OsSignals {
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
}

impl OsSignals {
    /// Installs the handlers. Must be called from within a tokio runtime.
    pub fn register() -> Result<Self, Report<DaemonError>> {
        let install = |kind: SignalKind, name: &'static str| {
            signal(kind)
                .change_context(DaemonError::SignalSetup)
                .attach_printable_lazy(|| format!("signal: {name}"))
        };

        Ok(Self {
            hangup: install(SignalKind::hangup(), "SIGHUP")?,
            interrupt: install(SignalKind::interrupt(), "SIGINT")?,
            terminate: install(SignalKind::terminate(), "SIGTERM")?,
            quit: install(SignalKind::quit(), "SIGQUIT")?,
        })
    }
}

#[async_trait]
impl SignalSource for OsSignals {
    async fn recv(&mut self) -> Option<Signal> {
        tokio::select! {
            Some(()) = self.hangup.recv() => Some(Signal::Hangup),
            Some(()) = self.interrupt.recv() => Some(Signal::Interrupt),
            Some(()) = self.terminate.recv() => Some(Signal::Terminate),
            Some(()) = self.quit.recv() => Some(Signal::Quit),
            else => None,
        }
    }
}

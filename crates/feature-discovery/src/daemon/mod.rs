//! The labeling loop.
//!
//! Two nested loops drive the daemon. The outer loop, [`supervise`], runs one
//! configuration epoch at a time: it loads configuration and builds a fresh
//! [`Daemon`]. The inner loop, [`Daemon::run`], re-queries devices and
//! republishes labels every sleep interval until a signal arrives. `SIGHUP`
//! ends the epoch and starts a new one; any other signal stops the process.

pub mod signals;

use core::error::Error;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::label;
use crate::label::Labels;
use crate::label::TimestampSource;
use crate::output::Outputer;
use crate::resource::DeviceManager;

pub use signals::OsSignals;
pub use signals::Signal;
pub use signals::SignalSource;

/// Errors that terminate the daemon.
#[derive(Debug, derive_more::Display)]
pub enum DaemonError {
    #[display("Unable to load config")]
    Config,
    #[display("Failed to initialize labeling for the new configuration")]
    Initialization,
    #[display("Error generating labels")]
    Labeling,
    #[display("Error publishing labels")]
    Output,
    #[display("Failed to install signal handlers")]
    SignalSetup,
}

impl Error for DaemonError {}

/// How a configuration epoch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Reload configuration and start a new epoch.
    Restart,
    /// Exit the process.
    Shutdown,
}

enum Wake {
    Rerun,
    Stop(RunOutcome),
}

/// Labeling state for one configuration epoch.
pub struct Daemon {
    config: Config,
    manager: Option<Box<dyn DeviceManager>>,
    outputer: Box<dyn Outputer>,
}

impl Daemon {
    pub fn new(config: Config, manager: Box<dyn DeviceManager>, outputer: Box<dyn Outputer>) -> Self {
        Self {
            config,
            manager: Some(manager),
            outputer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs labeling passes until a signal ends the epoch.
    ///
    /// The output artifact is cleaned up before returning, whether the epoch
    /// ended through a signal or an error.
    pub async fn run<S>(&mut self, signals: &mut S) -> Result<RunOutcome, Report<DaemonError>>
    where
        S: SignalSource + ?Sized,
    {
        let result = self.run_passes(signals).await;

        if let Err(e) = self.outputer.cleanup().await {
            warn!("Error removing output: {e:?}");
        }
        result
    }

    async fn run_passes<S>(&mut self, signals: &mut S) -> Result<RunOutcome, Report<DaemonError>>
    where
        S: SignalSource + ?Sized,
    {
        let timestamp = TimestampSource::now(self.config.flags.no_timestamp);

        loop {
            let device_labels = self.device_labels().await?;
            let labels =
                label::merge(&[&timestamp, &device_labels]).change_context(DaemonError::Labeling)?;

            if labels.len() <= 1 {
                warn!("No labels generated from any source");
            }

            info!("Creating labels");
            self.outputer
                .output(&labels)
                .await
                .change_context(DaemonError::Output)?;

            match self.idle(signals).await {
                Wake::Rerun => continue,
                Wake::Stop(outcome) => return Ok(outcome),
            }
        }
    }

    /// Queries the devices on the blocking pool; the device library and the
    /// machine type file are both synchronous.
    async fn device_labels(&mut self) -> Result<Labels, Report<DaemonError>> {
        let mut manager = self
            .manager
            .take()
            .ok_or_else(|| Report::new(DaemonError::Labeling))
            .attach_printable("device manager lost by a previous pass")?;
        let flags = self.config.flags.clone();

        let (manager, labels) = tokio::task::spawn_blocking(move || {
            let labels = label::device_labels(manager.as_mut(), &flags);
            (manager, labels)
        })
        .await
        .change_context(DaemonError::Labeling)?;

        self.manager = Some(manager);
        labels.change_context(DaemonError::Labeling)
    }

    async fn idle<S>(&self, signals: &mut S) -> Wake
    where
        S: SignalSource + ?Sized,
    {
        let interval = self.config.flags.sleep_interval;
        info!("Sleeping {interval:?}");

        tokio::select! {
            _ = tokio::time::sleep(interval) => Wake::Rerun,
            signal = signals.recv() => match signal {
                Some(Signal::Hangup) => {
                    info!("Received SIGHUP, restarting.");
                    Wake::Stop(RunOutcome::Restart)
                }
                Some(signal) => {
                    info!("Received signal {signal}, shutting down.");
                    Wake::Stop(RunOutcome::Shutdown)
                }
                None => {
                    warn!("Signal source closed, shutting down.");
                    Wake::Stop(RunOutcome::Shutdown)
                }
            },
        }
    }
}

/// Builds the [`Daemon`] for a new configuration epoch.
#[async_trait]
pub trait EpochLoader: Send {
    async fn load(&mut self) -> Result<Daemon, Report<DaemonError>>;
}

/// Runs configuration epochs until one ends with [`RunOutcome::Shutdown`].
pub async fn supervise<L, S>(loader: &mut L, signals: &mut S) -> Result<(), Report<DaemonError>>
where
    L: EpochLoader + ?Sized,
    S: SignalSource + ?Sized,
{
    loop {
        let mut daemon = loader.load().await?;

        info!("Start running");
        match daemon.run(signals).await? {
            RunOutcome::Restart => continue,
            RunOutcome::Shutdown => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use similar_asserts::assert_eq;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::Flags;
    use crate::config::KubeClientConfig;
    use crate::config::NodeConfig;
    use crate::output::OutputError;
    use crate::resource::mock::MockDeviceManager;

    struct ChannelSignals(mpsc::UnboundedReceiver<Signal>);

    #[async_trait]
    impl SignalSource for ChannelSignals {
        async fn recv(&mut self) -> Option<Signal> {
            self.0.recv().await
        }
    }

    /// Records published labels and raises a signal after a number of outputs.
    #[derive(Clone, Default)]
    struct RecordingOutputer {
        outputs: Arc<Mutex<Vec<Labels>>>,
        cleanups: Arc<AtomicUsize>,
        signal_after: Option<(usize, Signal, mpsc::UnboundedSender<Signal>)>,
        fail: bool,
    }

    impl RecordingOutputer {
        fn signalling(after: usize, signal: Signal, tx: &mpsc::UnboundedSender<Signal>) -> Self {
            Self {
                signal_after: Some((after, signal, tx.clone())),
                ..Default::default()
            }
        }

        fn outputs(&self) -> Vec<Labels> {
            self.outputs.lock().unwrap().clone()
        }

        fn cleanups(&self) -> usize {
            self.cleanups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Outputer for RecordingOutputer {
        async fn output(&self, labels: &Labels) -> Result<(), Report<OutputError>> {
            if self.fail {
                return Err(Report::new(OutputError::WriteFailed {
                    path: "test".to_string(),
                }));
            }
            let count = {
                let mut outputs = self.outputs.lock().unwrap();
                outputs.push(labels.clone());
                outputs.len()
            };
            if let Some((after, signal, tx)) = &self.signal_after {
                if count == *after {
                    tx.send(*signal).unwrap();
                }
            }
            Ok(())
        }

        async fn cleanup(&self) -> Result<(), Report<OutputError>> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(no_timestamp: bool) -> Config {
        Config {
            flags: Flags {
                no_timestamp,
                sleep_interval: Duration::from_secs(60),
                output_file: String::new(),
                machine_type_file: String::new(),
                ixml_lib_path: "libixml.so".to_string(),
            },
            kube: KubeClientConfig::default(),
            node: NodeConfig::default(),
        }
    }

    fn manager() -> MockDeviceManager {
        MockDeviceManager::new(&[("BI-V150S", 32768), ("BI-V150S", 32768)])
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_signal_shuts_down() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut signals = ChannelSignals(rx);
        let manager = manager();
        let outputer = RecordingOutputer::signalling(3, Signal::Terminate, &tx);
        let mut daemon = Daemon::new(config(false), Box::new(manager.clone()), Box::new(outputer.clone()));

        let outcome = daemon.run(&mut signals).await.unwrap();

        assert_eq!(outcome, RunOutcome::Shutdown);
        let outputs = outputer.outputs();
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0]["iluvatar.com/gpu.count"], "2");
        // devices are re-queried on every pass, with the adapter released in between
        assert_eq!(manager.init_count(), 3);
        assert_eq!(manager.shutdown_count(), 3);
        assert_eq!(outputer.cleanups(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn device_manager_is_handed_back_after_each_pass() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut signals = ChannelSignals(rx);
        let manager = manager();
        let outputer = RecordingOutputer::signalling(2, Signal::Terminate, &tx);
        let mut config = config(true);
        config.flags.sleep_interval = Duration::from_millis(10);
        let mut daemon = Daemon::new(config, Box::new(manager.clone()), Box::new(outputer.clone()));

        assert_eq!(daemon.run(&mut signals).await.unwrap(), RunOutcome::Shutdown);

        assert_eq!(outputer.outputs().len(), 2);
        assert_eq!(manager.init_count(), 2);
        assert!(daemon.manager.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn hangup_signal_restarts() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut signals = ChannelSignals(rx);
        let outputer = RecordingOutputer::signalling(1, Signal::Hangup, &tx);
        let mut daemon = Daemon::new(config(false), Box::new(manager()), Box::new(outputer.clone()));

        let outcome = daemon.run(&mut signals).await.unwrap();

        assert_eq!(outcome, RunOutcome::Restart);
        assert_eq!(outputer.outputs().len(), 1);
        assert_eq!(outputer.cleanups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_and_quit_shut_down() {
        for signal in [Signal::Interrupt, Signal::Quit] {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut signals = ChannelSignals(rx);
            let outputer = RecordingOutputer::signalling(1, signal, &tx);
            let mut daemon = Daemon::new(config(true), Box::new(manager()), Box::new(outputer.clone()));

            assert_eq!(daemon.run(&mut signals).await.unwrap(), RunOutcome::Shutdown);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn closed_signal_source_shuts_down() {
        let (tx, rx) = mpsc::unbounded_channel::<Signal>();
        drop(tx);
        let mut signals = ChannelSignals(rx);
        let outputer = RecordingOutputer::default();
        let mut daemon = Daemon::new(config(true), Box::new(manager()), Box::new(outputer.clone()));

        assert_eq!(daemon.run(&mut signals).await.unwrap(), RunOutcome::Shutdown);
        assert_eq!(outputer.outputs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timestamp_is_fixed_within_epoch() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut signals = ChannelSignals(rx);
        let outputer = RecordingOutputer::signalling(2, Signal::Terminate, &tx);
        let mut daemon = Daemon::new(config(false), Box::new(manager()), Box::new(outputer.clone()));

        daemon.run(&mut signals).await.unwrap();

        let outputs = outputer.outputs();
        let key = "iluvatar.com/ix.timestamp";
        assert!(outputs[0].contains_key(key));
        assert_eq!(outputs[0][key], outputs[1][key]);
    }

    #[tokio::test(start_paused = true)]
    async fn node_without_devices_still_publishes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut signals = ChannelSignals(rx);
        let outputer = RecordingOutputer::signalling(1, Signal::Terminate, &tx);
        let manager = MockDeviceManager::new(&[]);
        let mut daemon = Daemon::new(config(true), Box::new(manager), Box::new(outputer.clone()));

        daemon.run(&mut signals).await.unwrap();

        assert_eq!(outputer.outputs(), vec![Labels::new()]);
    }

    #[tokio::test(start_paused = true)]
    async fn labeling_failure_is_fatal_and_cleans_up() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut signals = ChannelSignals(rx);
        let outputer = RecordingOutputer::default();
        let manager = manager().with_driver_version("1.2.3.4");
        let mut daemon = Daemon::new(config(true), Box::new(manager), Box::new(outputer.clone()));

        let err = daemon.run(&mut signals).await.unwrap_err();

        assert!(matches!(err.current_context(), DaemonError::Labeling));
        assert!(outputer.outputs().is_empty());
        assert_eq!(outputer.cleanups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn output_failure_is_fatal_and_cleans_up() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut signals = ChannelSignals(rx);
        let outputer = RecordingOutputer {
            fail: true,
            ..Default::default()
        };
        let mut daemon = Daemon::new(config(true), Box::new(manager()), Box::new(outputer.clone()));

        let err = daemon.run(&mut signals).await.unwrap_err();

        assert!(matches!(err.current_context(), DaemonError::Output));
        assert_eq!(outputer.cleanups(), 1);
    }

    /// Hands out daemons whose outputers raise the queued signals in turn.
    struct ScriptedLoader {
        script: Vec<Signal>,
        tx: mpsc::UnboundedSender<Signal>,
        loads: usize,
        fail: bool,
    }

    #[async_trait]
    impl EpochLoader for ScriptedLoader {
        async fn load(&mut self) -> Result<Daemon, Report<DaemonError>> {
            if self.fail {
                return Err(Report::new(DaemonError::Config));
            }
            let signal = self.script[self.loads];
            self.loads += 1;
            let outputer = RecordingOutputer::signalling(1, signal, &self.tx);
            Ok(Daemon::new(config(true), Box::new(manager()), Box::new(outputer)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn supervise_reloads_on_hangup() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut signals = ChannelSignals(rx);
        let mut loader = ScriptedLoader {
            script: vec![Signal::Hangup, Signal::Hangup, Signal::Terminate],
            tx,
            loads: 0,
            fail: false,
        };

        supervise(&mut loader, &mut signals).await.unwrap();

        assert_eq!(loader.loads, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn supervise_propagates_load_failure() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut signals = ChannelSignals(rx);
        let mut loader = ScriptedLoader {
            script: Vec::new(),
            tx,
            loads: 0,
            fail: true,
        };

        let err = supervise(&mut loader, &mut signals).await.unwrap_err();
        assert!(matches!(err.current_context(), DaemonError::Config));
    }
}

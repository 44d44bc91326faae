//! # Acquisition Session
//!
//! The connection state machine for one logging run:
//!
//! ```text
//! Idle -> Discovering -> Connecting -> Subscribing -> Streaming
//!                            ^                            |
//!                            +---- Disconnected (backoff) <+
//!
//! any state --(cancel / fatal)--> Stopped
//! ```
//!
//! Discovery failure at startup is fatal. Every failure after that (connect,
//! subscribe, link loss) closes the connection, waits for the backoff delay and
//! tries again, forever. The [`LogSink`] is opened once per run and survives
//! every reconnect, so the sample count and the output file are continuous.

pub mod backoff;

use std::path::PathBuf;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ble::{
    DeviceDescriptor, DeviceLocator, LinkEvent, Transport, DEFAULT_CHARACTERISTIC_UUID,
};
use crate::config::Config;
use crate::error::{LoggerError, Result};
use crate::telemetry::{LogSink, NotificationDecoder};
use backoff::BackoffPolicy;

/// Lifecycle state of an [`AcquisitionSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Discovering,
    Connecting,
    Subscribing,
    Streaming,
    /// Link lost, waiting for the backoff delay
    Disconnected,
    Stopped,
}

/// Observable state, published on every transition and every sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub samples: u64,
    pub reconnects: u32,
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Operator cancellation
    Cancelled,
    /// Unrecoverable sink error
    Fatal,
}

/// Final report of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub samples: u64,
    /// `None` when the run stopped before a sink was opened
    pub destination: Option<PathBuf>,
    pub reconnects: u32,
    pub decode_failures: u64,
    pub reason: StopReason,
}

/// Static parameters of a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Identifier of the peripheral to log (`None` = not configured)
    pub target: Option<String>,
    /// Notify characteristic carrying the samples
    pub channel: Uuid,
    pub output_dir: PathBuf,
    pub file_prefix: String,
    /// Emit a progress line every N samples
    pub progress_interval: u64,
    /// Re-run discovery after N consecutive failures (0 = never)
    pub rediscover_after_failures: u32,
}

impl SessionOptions {
    pub fn new(target: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            target: Some(target.into()),
            channel: DEFAULT_CHARACTERISTIC_UUID,
            output_dir: output_dir.into(),
            file_prefix: "ESP_32C3".to_string(),
            progress_interval: 100,
            rediscover_after_failures: 0,
        }
    }

    /// Build options from a validated configuration
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::InvalidConfig`] if the characteristic UUID does not parse
    pub fn from_config(config: &Config) -> Result<Self> {
        let channel = Uuid::parse_str(&config.device.characteristic_uuid).map_err(|e| {
            LoggerError::InvalidConfig(format!("characteristic_uuid: {}", e))
        })?;

        let target = Some(config.device.target.trim().to_string()).filter(|t| !t.is_empty());

        Ok(Self {
            target,
            channel,
            output_dir: PathBuf::from(&config.sink.output_dir),
            file_prefix: config.sink.file_prefix.clone(),
            progress_interval: config.session.progress_interval,
            rediscover_after_failures: config.session.rediscover_after_failures,
        })
    }
}

/// One run's end-to-end connection lifecycle
///
/// Owns the transport, the active connection and the [`LogSink`]; nothing
/// else writes to the sink.
pub struct AcquisitionSession<T: Transport> {
    transport: T,
    locator: DeviceLocator,
    backoff: Box<dyn BackoffPolicy>,
    options: SessionOptions,
    decoder: NotificationDecoder,
    sink: Option<LogSink>,
    state: watch::Sender<SessionSnapshot>,
    sample_count: u64,
    decode_failures: u64,
    reconnects: u32,
    consecutive_failures: u32,
}

impl<T: Transport> AcquisitionSession<T> {
    pub fn new(
        transport: T,
        locator: DeviceLocator,
        backoff: Box<dyn BackoffPolicy>,
        options: SessionOptions,
    ) -> Self {
        let decoder = NotificationDecoder::new(options.target.clone().unwrap_or_default());
        let (state, _) = watch::channel(SessionSnapshot {
            status: SessionStatus::Idle,
            samples: 0,
            reconnects: 0,
        });

        Self {
            transport,
            locator,
            backoff,
            options,
            decoder,
            sink: None,
            state,
            sample_count: 0,
            decode_failures: 0,
            reconnects: 0,
            consecutive_failures: 0,
        }
    }

    /// Log into an already opened destination
    ///
    /// By default the session opens its own sink once the target is found.
    pub fn with_sink(mut self, sink: LogSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    /// Follow status and sample count while the session runs
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// Run until cancelled or until an unrecoverable error
    ///
    /// # Errors
    ///
    /// - Discovery errors at startup ([`LoggerError::Discovery`],
    ///   [`LoggerError::DeviceNotFound`], [`LoggerError::NoTarget`]); no sink is created
    /// - Sink failures ([`LoggerError::Io`], [`LoggerError::SinkClosed`]); the sink
    ///   is still closed and the summary reported before returning
    pub async fn run(mut self, cancel: CancellationToken) -> Result<SessionSummary> {
        self.set_status(SessionStatus::Discovering);

        let target = self.options.target.clone();
        let discovered = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.locator.discover(&self.transport, target.as_deref()) => Some(result),
        };

        let mut device = match discovered {
            None => {
                info!("Data collection stopped by user.");
                return self.finish(Ok(StopReason::Cancelled));
            }
            Some(Ok(device)) => device,
            Some(Err(e)) => {
                error!("Could not start acquisition: {}", e);
                self.set_status(SessionStatus::Stopped);
                return Err(e);
            }
        };

        if self.sink.is_none() {
            match LogSink::open(
                &self.options.output_dir,
                &self.options.file_prefix,
                &device.identifier,
            ) {
                Ok(sink) => self.sink = Some(sink),
                Err(e) => {
                    error!("Could not open log destination: {}", e);
                    self.set_status(SessionStatus::Stopped);
                    return Err(e);
                }
            }
        }

        let outcome = self.acquire(&mut device, &cancel).await;
        self.finish(outcome)
    }

    /// Connect / stream / back off, forever
    async fn acquire(
        &mut self,
        device: &mut DeviceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<StopReason> {
        loop {
            if cancel.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }

            self.set_status(SessionStatus::Connecting);
            info!("Connecting to {}...", device);

            match self.connect_and_stream(device, cancel).await {
                Ok(()) => {
                    info!("Data collection stopped by user.");
                    return Ok(StopReason::Cancelled);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.consecutive_failures += 1;
                    self.reconnects += 1;
                    self.set_status(SessionStatus::Disconnected);
                    warn!("Connection error: {}", e);
                }
            }

            let every = self.options.rediscover_after_failures;
            if every > 0 && self.consecutive_failures % every == 0 {
                self.rediscover(device, cancel).await;
                self.set_status(SessionStatus::Disconnected);
            }

            let delay = self.backoff.delay(self.consecutive_failures);
            info!(
                "Retrying in {:.1} seconds (attempt {})...",
                delay.as_secs_f64(),
                self.consecutive_failures
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Data collection stopped by user.");
                    return Ok(StopReason::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One connection attempt; `Ok` only on cancellation
    ///
    /// The connection is closed on every exit path once it was opened.
    async fn connect_and_stream(
        &mut self,
        device: &DeviceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut connection = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            result = self.transport.connect(device) => result?,
        };

        let result = self.subscribe_and_stream(&mut connection, cancel).await;

        self.transport.close(connection).await;
        debug!("Connection to {} released", device);

        result
    }

    async fn subscribe_and_stream(
        &mut self,
        connection: &mut T::Connection,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.set_status(SessionStatus::Subscribing);

        let channel = self.options.channel;
        let mut events = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            result = self.transport.subscribe(connection, channel) => result?,
        };

        self.set_status(SessionStatus::Streaming);
        self.consecutive_failures = 0;
        self.backoff.reset();
        info!("Connected! Starting data collection...");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                event = events.recv() => match event {
                    Some(LinkEvent::Payload(payload)) => self.handle_payload(&payload)?,
                    Some(LinkEvent::Lost(reason)) => return Err(LoggerError::Connection(reason)),
                    None => {
                        return Err(LoggerError::Connection(
                            "notification channel closed".to_string(),
                        ))
                    }
                },
            }
        }
    }

    /// Decode and record one payload; only sink errors escape
    fn handle_payload(&mut self, payload: &[u8]) -> Result<()> {
        let record = match self.decoder.decode(payload) {
            Ok(record) => record,
            Err(e) => {
                self.decode_failures += 1;
                warn!("Error processing data: {}", e);
                return Ok(());
            }
        };

        let sink = self.sink.as_mut().ok_or(LoggerError::SinkClosed)?;
        let count = sink.append(&record)?;
        self.sample_count = count;

        if count % self.options.progress_interval.max(1) == 0 {
            info!("Samples collected: {}", count);
        }
        self.publish();
        Ok(())
    }

    async fn rediscover(&mut self, device: &mut DeviceDescriptor, cancel: &CancellationToken) {
        self.set_status(SessionStatus::Discovering);
        info!(
            "{} consecutive failures, scanning for {} again",
            self.consecutive_failures, device.identifier
        );

        let target = device.identifier.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = self.locator.discover(&self.transport, Some(&target)) => result,
        };

        match result {
            Ok(found) => *device = found,
            Err(e) => warn!("Rediscovery failed, keeping {}: {}", device, e),
        }
    }

    /// Close the sink, report, and turn the outcome into the run result
    fn finish(mut self, outcome: Result<StopReason>) -> Result<SessionSummary> {
        let (reason, mut failure) = match outcome {
            Ok(reason) => (reason, None),
            Err(e) => {
                error!("Unrecoverable error: {}", e);
                (StopReason::Fatal, Some(e))
            }
        };

        let destination = self.sink.as_ref().map(|s| s.path().to_path_buf());
        if let Some(sink) = self.sink.as_mut() {
            match sink.close() {
                Ok(count) => self.sample_count = count,
                Err(e) => {
                    error!("Failed to close {}: {}", sink.path().display(), e);
                    failure.get_or_insert(e);
                }
            }
        }

        self.set_status(SessionStatus::Stopped);

        info!(
            "Data collection completed. Total samples: {}",
            self.sample_count
        );
        if let Some(path) = &destination {
            info!("Data saved to: {}", path.display());
        }
        if self.decode_failures > 0 {
            info!("Payloads dropped as undecodable: {}", self.decode_failures);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(SessionSummary {
                samples: self.sample_count,
                destination,
                reconnects: self.reconnects,
                decode_failures: self.decode_failures,
                reason,
            }),
        }
    }

    fn set_status(&self, status: SessionStatus) {
        let previous = self.state.borrow().status;
        if previous != status {
            debug!("Session {:?} -> {:?}", previous, status);
        }
        self.state.send_replace(SessionSnapshot {
            status,
            samples: self.sample_count,
            reconnects: self.reconnects,
        });
    }

    fn publish(&self) {
        let samples = self.sample_count;
        self.state.send_modify(|s| s.samples = samples);
    }
}

#[cfg(test)]
mod tests {
    use super::backoff::ConstantBackoff;
    use super::*;
    use crate::ble::transport::mocks::{payload, sample, ConnectPlan, ScriptedTransport};
    use std::fs;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::task::JoinHandle;
    use tokio_test::assert_ok;

    const TARGET: &str = "AA:BB:CC:DD:EE:FF";

    fn target_device() -> DeviceDescriptor {
        DeviceDescriptor::new(TARGET).with_name("ESP32C3-IMU")
    }

    fn session(transport: ScriptedTransport, dir: &TempDir) -> AcquisitionSession<ScriptedTransport> {
        AcquisitionSession::new(
            transport,
            DeviceLocator::new(Duration::from_secs(5)),
            Box::new(ConstantBackoff::default()),
            SessionOptions::new(TARGET, dir.path()),
        )
    }

    fn start(
        session: AcquisitionSession<ScriptedTransport>,
    ) -> (CancellationToken, JoinHandle<Result<SessionSummary>>) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(session.run(cancel.clone()));
        (cancel, handle)
    }

    fn data_rows(summary: &SessionSummary) -> Vec<String> {
        let contents = fs::read_to_string(summary.destination.as_ref().unwrap()).unwrap();
        let mut lines = contents.lines().map(str::to_string);
        assert_eq!(
            lines.next().unwrap(),
            "Timestamp,Device_ID,Accel_X,Accel_Y,Accel_Z,Gyro_X,Gyro_Y,Gyro_Z,Roll,Pitch"
        );
        lines.collect()
    }

    fn timestamps(rows: &[String]) -> Vec<String> {
        rows.iter()
            .map(|r| r.split(',').next().unwrap().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_are_logged_in_delivery_order() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![target_device()]);
        let expected: Vec<String> = (0..25).map(|i| format!("t{}", i)).collect();
        transport.push(ConnectPlan::StreamThenHold(
            expected.iter().map(|ts| sample(ts)).collect(),
        ));

        let session = session(transport.clone(), &dir);
        let mut state = session.watch();
        let (cancel, handle) = start(session);

        state.wait_for(|s| s.samples == 25).await.unwrap();
        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.samples, 25);
        assert_eq!(summary.reason, StopReason::Cancelled);
        assert_eq!(timestamps(&data_rows(&summary)), expected);
        assert_eq!(transport.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_keeps_same_destination_and_count() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![target_device()]);
        transport
            .push(ConnectPlan::StreamThenDrop(vec![sample("a1"), sample("a2"), sample("a3")]))
            .push(ConnectPlan::StreamThenHold(vec![sample("b1"), sample("b2")]));

        let session = session(transport.clone(), &dir);
        let mut state = session.watch();
        let (cancel, handle) = start(session);

        state.wait_for(|s| s.samples == 5).await.unwrap();
        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.samples, 5);
        assert_eq!(summary.reconnects, 1);
        assert_eq!(transport.connects(), 2);
        assert_eq!(transport.closes(), 2);

        // One file, one header, all five rows in order
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        assert_eq!(
            timestamps(&data_rows(&summary)),
            vec!["a1", "a2", "a3", "b1", "b2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_is_dropped_and_streaming_continues() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![target_device()]);
        transport.push(ConnectPlan::StreamThenHold(vec![
            sample("t1"),
            payload(r#"{"timestamp":"bad","accel":{"x":"oops"}}"#),
            payload("not json at all"),
            sample("t2"),
        ]));

        let session = session(transport.clone(), &dir);
        let mut state = session.watch();
        let (cancel, handle) = start(session);

        state.wait_for(|s| s.samples == 2).await.unwrap();
        assert_eq!(state.borrow().status, SessionStatus::Streaming);
        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.samples, 2);
        assert_eq!(summary.decode_failures, 2);
        assert_eq!(summary.reconnects, 0);
        assert_eq!(timestamps(&data_rows(&summary)), vec!["t1", "t2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_streaming() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![target_device()]);
        for i in 0..4 {
            transport.push(ConnectPlan::RefuseConnect(format!("refused {}", i)));
        }
        transport.push(ConnectPlan::RefuseSubscribe("gatt busy".into()));
        transport.push(ConnectPlan::StreamThenHold(Vec::new()));

        let session = session(transport.clone(), &dir);
        let mut state = session.watch();
        let started = tokio::time::Instant::now();
        let (cancel, handle) = start(session);

        state
            .wait_for(|s| s.status == SessionStatus::Streaming)
            .await
            .unwrap();

        // Five failures, each followed by the fixed 3 s backoff
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(transport.connects(), 6);
        // Failed subscribe still released its connection
        assert_eq!(transport.closes(), 1);

        cancel.cancel();
        let summary = assert_ok!(handle.await.unwrap());
        assert_eq!(summary.reconnects, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_not_found_stops_without_sink() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![
            DeviceDescriptor::new("11:22:33:44:55:66"),
            DeviceDescriptor::new("77:88:99:AA:BB:CC"),
        ]);

        let session = session(transport.clone(), &dir);
        let state = session.watch();
        let result = session.run(CancellationToken::new()).await;

        match result {
            Err(LoggerError::DeviceNotFound { discovered, .. }) => assert_eq!(discovered.len(), 2),
            other => panic!("Expected DeviceNotFound, got: {:?}", other),
        }
        assert_eq!(state.borrow().status, SessionStatus::Stopped);
        assert_eq!(transport.connects(), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_failure_is_startup_fatal() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::failing_scan("adapter powered off");

        let result = session(transport.clone(), &dir)
            .run(CancellationToken::new())
            .await;

        assert!(matches!(result, Err(LoggerError::Discovery(_))));
        assert_eq!(transport.scans(), 1);
        assert_eq!(transport.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_closes_sink() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![target_device()]);
        transport.push(ConnectPlan::StreamThenDrop(vec![sample("t1")]));
        for _ in 0..100 {
            transport.push(ConnectPlan::RefuseConnect("out of range".into()));
        }

        let session = session(transport.clone(), &dir);
        let mut state = session.watch();
        let (cancel, handle) = start(session);

        state
            .wait_for(|s| s.status == SessionStatus::Disconnected && s.samples == 1)
            .await
            .unwrap();
        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.reason, StopReason::Cancelled);
        assert_eq!(summary.samples, 1);
        assert_eq!(data_rows(&summary).len(), 1);
        assert_eq!(state.borrow().status, SessionStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_discovery_returns_empty_summary() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![target_device()]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = session(transport.clone(), &dir).run(cancel).await.unwrap();

        assert_eq!(summary.samples, 0);
        assert_eq!(summary.destination, None);
        assert_eq!(transport.scans(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rediscovery_after_repeated_failures() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![target_device()]);
        for _ in 0..4 {
            transport.push(ConnectPlan::RefuseConnect("out of range".into()));
        }

        let mut options = SessionOptions::new(TARGET, dir.path());
        options.rediscover_after_failures = 2;
        let session = AcquisitionSession::new(
            transport.clone(),
            DeviceLocator::new(Duration::from_secs(1)),
            Box::new(ConstantBackoff::new(Duration::from_millis(10))),
            options,
        );
        let mut state = session.watch();
        let (cancel, handle) = start(session);

        state
            .wait_for(|s| s.status == SessionStatus::Streaming)
            .await
            .unwrap();
        cancel.cancel();
        handle.await.unwrap().unwrap();

        // Startup scan plus one rescan after every second failure
        assert_eq!(transport.scans(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_scan_stops_without_sink() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::hanging_scan();

        let session = session(transport.clone(), &dir);
        let mut state = session.watch();
        let (cancel, handle) = start(session);

        state
            .wait_for(|s| s.status == SessionStatus::Discovering)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.reason, StopReason::Cancelled);
        assert_eq!(summary.samples, 0);
        assert_eq!(summary.destination, None);
        assert_eq!(transport.scans(), 1);
        assert_eq!(transport.connects(), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(state.borrow().status, SessionStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_connect() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![target_device()]);
        transport.push(ConnectPlan::HangConnect);

        let session = session(transport.clone(), &dir);
        let mut state = session.watch();
        let (cancel, handle) = start(session);

        state
            .wait_for(|s| s.status == SessionStatus::Connecting)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.reason, StopReason::Cancelled);
        assert_eq!(summary.samples, 0);
        assert!(data_rows(&summary).is_empty());
        assert_eq!(transport.connects(), 1);
        assert_eq!(transport.subscribes(), 0);
        // No connection was handed out, so there is nothing to close
        assert_eq!(transport.closes(), 0);
        assert_eq!(state.borrow().status, SessionStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_subscribe_closes_connection() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![target_device()]);
        transport.push(ConnectPlan::HangSubscribe);

        let session = session(transport.clone(), &dir);
        let mut state = session.watch();
        let (cancel, handle) = start(session);

        state
            .wait_for(|s| s.status == SessionStatus::Subscribing)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.reason, StopReason::Cancelled);
        assert!(summary.destination.is_some());
        assert_eq!(transport.subscribes(), 1);
        assert_eq!(transport.closes(), 1);
        assert_eq!(state.borrow().status, SessionStatus::Stopped);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(start_paused = true)]
    async fn test_sink_write_failure_ends_run_and_releases_connection() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![target_device()]);
        transport.push(ConnectPlan::StreamThenHold(vec![sample("t1"), sample("t2")]));

        let session = session(transport.clone(), &dir).with_sink(LogSink::unwritable());
        let state = session.watch();
        let result = session.run(CancellationToken::new()).await;

        match result {
            Err(LoggerError::Io(_)) => {}
            other => panic!("Expected Io error, got: {:?}", other),
        }
        assert_eq!(transport.subscribes(), 1);
        assert_eq!(transport.closes(), 1);
        // Never reconnected after the storage failure
        assert_eq!(transport.connects(), 1);
        assert_eq!(state.borrow().samples, 0);
        assert_eq!(state.borrow().status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_append_after_close_is_fatal() {
        let dir = tempdir().unwrap();
        let mut session = session(ScriptedTransport::new(vec![]), &dir);
        let mut sink = LogSink::create(dir.path().join("closed.csv")).unwrap();
        sink.close().unwrap();
        session.sink = Some(sink);
        let state = session.watch();

        let valid = br#"{"timestamp":"t","accel":{"x":1,"y":2,"z":3},"gyro":{"x":0,"y":0,"z":0},"angles":{"roll":0,"pitch":0}}"#;
        let err = session.handle_payload(valid).unwrap_err();
        assert!(err.is_fatal());

        let result = session.finish(Err(err));
        assert!(matches!(result, Err(LoggerError::SinkClosed)));
        assert_eq!(state.borrow().status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_session_starts_idle() {
        let dir = tempdir().unwrap();
        let session = session(ScriptedTransport::new(vec![]), &dir);
        assert_eq!(session.status(), SessionStatus::Idle);
    }
}

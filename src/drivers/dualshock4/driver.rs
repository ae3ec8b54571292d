//! Per-device I/O orchestration.
//!
//! Each controller gets one session task that owns its [ConnectionSession].
//! A blocking reader thread drains input reports from the transport and a
//! writer task performs one output write at a time. Output requests and
//! encoded reports are passed through `watch` slots, so a backed-up writer
//! only ever sends the most recent state.
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::config::SessionConfig;

use super::{
    codec::{InputReport, OutputRequest},
    event::{translate, Event},
    hid_report::MAX_REPORT_SIZE,
    session::{ConnectionSession, SessionError, SessionSnapshot},
    transport::{HidApiTransport, HidTransport, TransportError},
};

/// Number of raw reports buffered between the reader thread and the session
const REPORT_BUFFER_SIZE: usize = 256;

/// Possible errors while driving a device
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("driver task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("driver has stopped")]
    Stopped,
}

/// DualShock 4 driver for a single connected controller
pub struct Driver<T: HidTransport + 'static> {
    session: ConnectionSession,
    reader: T,
    writer: T,
    keep_alive_interval: Duration,
}

impl Driver<HidApiTransport> {
    /// Open the controller at the given hidraw path. The device is opened
    /// twice so reads and writes never wait on each other.
    pub fn open(path: &str, config: &SessionConfig) -> Result<Self, DriverError> {
        let reader = HidApiTransport::open(path)?;
        let writer = HidApiTransport::open(path)?;
        let session = ConnectionSession::new(path, reader.transport(), config);
        Ok(Self::new(session, reader, writer, config))
    }
}

impl<T: HidTransport + 'static> Driver<T> {
    pub fn new(session: ConnectionSession, reader: T, writer: T, config: &SessionConfig) -> Self {
        Self {
            session,
            reader,
            writer,
            keep_alive_interval: config.keep_alive_interval(),
        }
    }

    /// Run the driver in a new task
    pub fn spawn(self, events: Option<mpsc::Sender<Event>>) -> DriverHandle {
        let id = self.session.id().to_string();
        let (output_tx, output_rx) = watch::channel(None);
        let (snapshot_tx, snapshot_rx) = watch::channel(self.session.snapshot());
        let task = tokio::spawn(self.run(output_rx, snapshot_tx, events));
        DriverHandle {
            id,
            output: output_tx,
            snapshot: snapshot_rx,
            task,
        }
    }

    /// Drive the device until it disconnects, the session fails or the
    /// output sender is dropped. Returns the final session snapshot.
    pub async fn run(
        self,
        mut output: watch::Receiver<Option<OutputRequest>>,
        snapshot: watch::Sender<SessionSnapshot>,
        mut events: Option<mpsc::Sender<Event>>,
    ) -> Result<SessionSnapshot, DriverError> {
        let Self {
            mut session,
            reader,
            writer,
            keep_alive_interval,
        } = self;
        log::debug!("Starting DualShock 4 driver for {}", session.id());

        // Read calibration before the read loop takes over the reader
        let reader = read_calibration(&mut session, reader).await?;
        snapshot.send_replace(session.snapshot());

        let (report_tx, mut report_rx) = mpsc::channel(REPORT_BUFFER_SIZE);
        let read_task = tokio::task::spawn_blocking(move || read_loop(reader, report_tx));

        let (write_tx, write_rx) = watch::channel(None);
        let mut write_task = tokio::spawn(write_loop(writer, write_rx));

        let tick = (keep_alive_interval / 8).max(Duration::from_millis(1));
        let mut keep_alive = tokio::time::interval(tick);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut previous: Option<InputReport> = None;
        let result = loop {
            tokio::select! {
                report = report_rx.recv() => {
                    let bytes = match report {
                        Some(Ok(bytes)) => bytes,
                        Some(Err(e)) => break Err(e.into()),
                        None => break Err(TransportError::Disconnected.into()),
                    };
                    if bytes.is_empty() {
                        log::info!("Zero-length read from {}", session.id());
                        break Err(TransportError::Disconnected.into());
                    }
                    match session.handle_input(&bytes) {
                        Ok(report) => {
                            if let Some(tx) = events.as_ref() {
                                for event in translate(previous.as_ref(), &report) {
                                    if tx.send(event).await.is_err() {
                                        log::debug!("Event receiver dropped");
                                        events = None;
                                        break;
                                    }
                                }
                            }
                            previous = Some(report);
                        }
                        Err(e) if e.is_fatal() => break Err(e.into()),
                        Err(e) => log::debug!("Ignoring report from {}: {e}", session.id()),
                    }
                }
                changed = output.changed() => {
                    if changed.is_err() {
                        log::debug!("Output handle dropped for {}", session.id());
                        break Ok(());
                    }
                    let request = *output.borrow_and_update();
                    if let Some(request) = request {
                        match session.build_output(&request, Instant::now()) {
                            Ok(bytes) => {
                                write_tx.send_replace(Some(bytes));
                            }
                            Err(e) => break Err(e.into()),
                        }
                    }
                }
                _ = keep_alive.tick() => {
                    match session.keep_alive(Instant::now()) {
                        Ok(Some(bytes)) => {
                            write_tx.send_replace(Some(bytes));
                        }
                        Ok(None) => (),
                        Err(e) => break Err(e.into()),
                    }
                }
                written = &mut write_task => {
                    break match written {
                        Ok(Ok(())) => Err(TransportError::Closed.into()),
                        Ok(Err(e)) => Err(e.into()),
                        Err(e) => Err(e.into()),
                    };
                }
            }
            snapshot.send_replace(session.snapshot());
        };

        // Closing the channels stops the reader and writer
        drop(report_rx);
        drop(write_tx);
        snapshot.send_replace(session.snapshot());
        let last = session.disconnect();
        if !read_task.is_finished() {
            log::trace!("Reader for {} stops after its next read", last.id);
        }

        match result {
            Ok(()) => Ok(last),
            Err(e) => {
                log::info!("DualShock 4 driver for {} stopped: {e}", last.id);
                Err(e)
            }
        }
    }
}

/// Issue the one calibration read of the session. Failures are not fatal:
/// the session falls back to identity calibration.
async fn read_calibration<T: HidTransport + 'static>(
    session: &mut ConnectionSession,
    mut reader: T,
) -> Result<T, DriverError> {
    let Some(request) = session.request_calibration() else {
        return Ok(reader);
    };
    let (reader, result) = tokio::task::spawn_blocking(move || {
        let result = reader.read_feature(request.report_id, request.length);
        (reader, result)
    })
    .await?;

    match result {
        Ok(buf) => {
            if let Err(e) = session.apply_calibration(&buf) {
                log::warn!("Using identity calibration for {}: {e}", session.id());
            }
        }
        Err(e) => {
            log::warn!(
                "Failed to read calibration from {}, using identity calibration: {e}",
                session.id()
            );
        }
    }

    Ok(reader)
}

/// Blocking loop forwarding raw reports until the receiver goes away
fn read_loop<T: HidTransport>(mut reader: T, tx: mpsc::Sender<Result<Vec<u8>, TransportError>>) {
    let mut buf = [0u8; MAX_REPORT_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(bytes_read) => {
                let report = buf[..bytes_read].to_vec();
                if tx.blocking_send(Ok(report)).is_err() || bytes_read == 0 {
                    break;
                }
            }
            Err(TransportError::Timeout) => {
                if tx.is_closed() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }
    log::debug!("Reader stopped");
}

/// Write encoded reports one at a time, always picking the latest
async fn write_loop<T: HidTransport + 'static>(
    mut writer: T,
    mut rx: watch::Receiver<Option<Vec<u8>>>,
) -> Result<(), TransportError> {
    while rx.changed().await.is_ok() {
        let Some(bytes) = rx.borrow_and_update().clone() else {
            continue;
        };
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let result = writer.write(&bytes);
            (writer, result)
        })
        .await
        .map_err(|_| TransportError::Closed)?;
        writer = returned;
        let bytes_written = result?;
        log::trace!("Wrote {bytes_written} bytes");
    }
    Ok(())
}

/// Handle to a running driver task
pub struct DriverHandle {
    id: String,
    output: watch::Sender<Option<OutputRequest>>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<Result<SessionSnapshot, DriverError>>,
}

impl DriverHandle {
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Set the desired output state. Only the most recent request is written
    /// if the device falls behind.
    pub fn set_output(&self, request: OutputRequest) -> Result<(), DriverError> {
        self.output
            .send(Some(request))
            .map_err(|_| DriverError::Stopped)
    }

    /// Latest snapshot published by the session
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the driver and wait for it to finish
    pub async fn stop(self) -> Result<SessionSnapshot, DriverError> {
        let Self { output, task, .. } = self;
        drop(output);
        task.await?
    }

    /// Wait for the driver to finish on its own
    pub async fn join(self) -> Result<SessionSnapshot, DriverError> {
        let Self { output, task, .. } = self;
        let result = task.await?;
        drop(output);
        result
    }
}

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, ReadHalf};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::{ConnError, ConnectionState, Result, SessionInfo, TeardownReport};
use crate::config::ScannerConfig;
use crate::interpret::TranscriptInterpreter;
use crate::scan::{self, DiagnosticOutcome, ScanOutcome};
use crate::serial::interface::BAUD_RATE;
use crate::serial::pipeline::{self, ReaderExit, SharedAssembler};
use crate::serial::{
    BoxedTransport, Coordinator, PortOpener, PortSelection, SerialDeviceInfo, SerialPortOpener,
    Transcript,
};

/// Upper bound on waiting for the read loop to acknowledge cancellation.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

type ReaderTask = JoinHandle<(ReadHalf<BoxedTransport>, ReaderExit)>;

/// The single open connection to the board: the write side, the read loop
/// feeding the transcript, and the handles needed to shut both down.
pub struct Session {
    info: SessionInfo,
    coordinator: Coordinator,
    transcript: Transcript,
    reader: Option<ReaderTask>,
    cancel: Option<oneshot::Sender<()>>,
}

impl Session {
    fn start(info: SessionInfo, transport: BoxedTransport, config: &ScannerConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        let transcript = Transcript::new();
        let assembler = SharedAssembler::default();
        let alive = Arc::new(AtomicBool::new(true));
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let reader = tokio::spawn(pipeline::read_loop(
            read_half,
            assembler.clone(),
            transcript.clone(),
            cancel_rx,
            alive.clone(),
        ));

        let mut coordinator = Coordinator::new(
            write_half,
            assembler,
            transcript.clone(),
            alive,
            config.timing.post_write_delay(),
        );
        coordinator.set_echo_commands(config.scan.echo_commands);

        Self {
            info,
            coordinator,
            transcript,
            reader: Some(reader),
            cancel: Some(cancel_tx),
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn coordinator(&mut self) -> &mut Coordinator {
        &mut self.coordinator
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_open(&self) -> bool {
        self.coordinator.is_open()
    }

    /// Best-effort teardown: cancel the read, wait for the read loop to stop,
    /// close the write side, then close the port. A failing step is logged and
    /// recorded; the remaining steps still run.
    pub async fn close(mut self) -> TeardownReport {
        let mut report = TeardownReport {
            port_name: self.info.port_name.clone(),
            ..TeardownReport::default()
        };

        match self.cancel.take() {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    log::warn!("Read loop on {} had already stopped", self.info.port_name);
                    report.cancel_error = Some("read loop already stopped".to_string());
                }
            }
            None => report.cancel_error = Some("no read loop to cancel".to_string()),
        }

        let mut read_half = None;
        if let Some(mut reader) = self.reader.take() {
            match tokio::time::timeout(READER_JOIN_TIMEOUT, &mut reader).await {
                Ok(Ok((half, exit))) => {
                    report.reader_exit = Some(exit);
                    read_half = Some(half);
                }
                Ok(Err(e)) => {
                    log::error!("Read loop on {} failed: {}", self.info.port_name, e);
                    report.reader_error = Some(e.to_string());
                }
                Err(_) => {
                    log::warn!("Read loop on {} did not stop in time, aborting it", self.info.port_name);
                    reader.abort();
                    report.reader_error = Some("read loop did not acknowledge cancellation".to_string());
                }
            }
        }

        let writer = match self.coordinator.take_writer() {
            Some(mut writer) => {
                match writer.shutdown().await {
                    Ok(()) => report.writer_closed = true,
                    Err(e) => {
                        log::warn!("Closing writer on {} failed: {}", self.info.port_name, e);
                        report.writer_error = Some(e.to_string());
                    }
                }
                Some(writer)
            }
            None => None,
        };

        // Dropping the reassembled stream releases the OS handle. If the read
        // half was lost with its task, dropping the writer releases the last
        // reference instead.
        match (read_half, writer) {
            (Some(read_half), Some(writer)) => drop(read_half.unsplit(writer)),
            (read_half, writer) => {
                drop(writer);
                drop(read_half);
            }
        }
        report.port_closed = true;

        log::info!("Disconnected from {}", self.info.port_name);
        report
    }
}

/// Clears the busy flag however `connect` exits.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the one active session. Connects are mutually exclusive; a connect
/// that arrives while another is in flight is refused rather than queued.
pub struct ConnectionManager {
    opener: Arc<dyn PortOpener>,
    config: ScannerConfig,
    busy: AtomicBool,
    session: Mutex<Option<Session>>,
}

impl ConnectionManager {
    pub fn new(config: ScannerConfig) -> Self {
        Self::with_opener(Arc::new(SerialPortOpener::new()), config)
    }

    pub fn with_opener(opener: Arc<dyn PortOpener>, config: ScannerConfig) -> Self {
        Self {
            opener,
            config,
            busy: AtomicBool::new(false),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub async fn list_ports(&self) -> Result<Vec<SerialDeviceInfo>> {
        self.opener.list_ports().await.map_err(ConnError::from)
    }

    /// Open a session on the selected port, replacing any existing one.
    pub async fn connect(&self, selection: PortSelection) -> Result<SessionInfo> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("Connect requested while another connect is in progress");
            return Err(ConnError::Busy);
        }
        let _busy = BusyGuard(&self.busy);

        let mut slot = self.session.lock().await;
        if let Some(existing) = slot.take() {
            log::info!("Closing existing session on {} before reconnecting", existing.info().port_name);
            let report = existing.close().await;
            if !report.is_clean() {
                log::warn!("Previous session teardown was not clean: {:?}", report);
            }
        }

        let port_name = match &selection {
            PortSelection::Named(name) => name.clone(),
            PortSelection::Auto => {
                let ports = self.opener.list_ports().await?;
                selection.resolve(&ports)?
            }
        };

        log::info!("Attempting to connect to port: {}", port_name);
        let transport = match self.opener.open(&port_name).await {
            Ok(transport) => transport,
            Err(e) => {
                let err = ConnError::from(e);
                log::error!("Connection to {} failed: {}", port_name, err);
                return Err(err);
            }
        };

        let info = SessionInfo::new(port_name, BAUD_RATE);
        let session = Session::start(info.clone(), transport, &self.config);

        // Opening the port resets the board
        let settle = self.config.timing.open_settle();
        log::debug!("Waiting {:?} for {} to come out of reset", settle, info.port_name);
        tokio::time::sleep(settle).await;

        *slot = Some(session);
        log::info!("Connected to {}", info.port_name);
        Ok(info)
    }

    /// Reuse the open session if it is still alive, otherwise connect.
    pub async fn ensure_connected(&self, selection: PortSelection) -> Result<SessionInfo> {
        {
            let slot = self.session.lock().await;
            if let Some(session) = slot.as_ref() {
                let wanted = match &selection {
                    PortSelection::Named(name) => name == &session.info().port_name,
                    PortSelection::Auto => true,
                };
                if wanted && session.is_open() {
                    return Ok(session.info().clone());
                }
            }
        }
        self.connect(selection).await
    }

    /// Tear down the current session, if any.
    pub async fn disconnect(&self) -> Option<TeardownReport> {
        let session = self.session.lock().await.take()?;
        let report = session.close().await;
        if !report.is_clean() {
            log::warn!("Teardown of {} finished with errors: {:?}", report.port_name, report);
        }
        Some(report)
    }

    pub async fn state(&self) -> ConnectionState {
        if self.busy.load(Ordering::SeqCst) {
            return ConnectionState::Connecting;
        }
        match self.session.lock().await.as_ref() {
            Some(session) if session.is_open() => ConnectionState::Connected(session.info().port_name.clone()),
            Some(session) => ConnectionState::Stale(session.info().port_name.clone()),
            None => ConnectionState::Disconnected,
        }
    }

    pub async fn session_info(&self) -> Option<SessionInfo> {
        self.session.lock().await.as_ref().map(|s| s.info().clone())
    }

    /// Run `f` with exclusive access to the open session. Holding the session
    /// for the whole call keeps commands from different callers from
    /// interleaving.
    pub async fn execute_with_session<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Session) -> Pin<Box<dyn Future<Output = R> + Send + '_>>,
        R: Send,
    {
        let mut slot = self.session.lock().await;
        match slot.as_mut() {
            Some(session) => Ok(f(session).await),
            None => Err(ConnError::NotConnected),
        }
    }

    /// Full sweep on the open session. The session stays locked until the
    /// sweep is over.
    pub async fn scan(&self, interpreter: Arc<dyn TranscriptInterpreter>) -> Result<ScanOutcome> {
        let config = self.config.clone();
        self.execute_with_session(|session| {
            Box::pin(async move { scan::run_scan(session, &config, interpreter.as_ref()).await })
        })
        .await
    }

    pub async fn diagnose(&self) -> Result<DiagnosticOutcome> {
        let config = self.config.clone();
        self.execute_with_session(|session| {
            Box::pin(async move { scan::run_diagnostic(session, &config).await })
        })
        .await
    }
}

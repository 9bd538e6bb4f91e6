use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tempfile::TempPath;
use tracing::{debug, error, info, warn};

use crate::app::adb::device::{CollectingReceiver, ShellOutputReceiver};
use crate::app::adb::monitor::StateMonitor;
use crate::app::config::LogcatSettings;
use crate::app::device::handle::DeviceHandle;
use crate::app::device::DeviceController;
use crate::app::error::DeviceError;

pub const LOGCAT_CMD: &str = "logcat -v threadtime";
const LOGCAT_DUMP_CMD: &str = "logcat -v threadtime -d";
const LOGCAT_BUFF_SIZE: usize = 32 * 1024;
const MARKER_RULE: &str = "\n*******************\n";
const RECONNECT_POLL: Duration = Duration::from_secs(1);

/// Two-file rolling store for captured log bytes.
///
/// Bytes go to the current file until it holds more than `max_file_size`,
/// at which point it becomes the previous file (the older previous file is
/// deleted) and a fresh current file is started. At most two files exist.
pub struct LogBuffer {
    serial: String,
    max_file_size: u64,
    writer: BufWriter<File>,
    current: TempPath,
    previous: Option<TempPath>,
    bytes_stored: u64,
    rotations: usize,
}

impl LogBuffer {
    pub fn new(serial: &str, max_file_size: u64) -> io::Result<Self> {
        let (writer, current) = create_tmp_file(serial)?;
        Ok(Self {
            serial: serial.to_string(),
            max_file_size,
            writer,
            current,
            previous: None,
            bytes_stored: 0,
            rotations: 0,
        })
    }

    pub fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.bytes_stored += data.len() as u64;
        if self.bytes_stored > self.max_file_size {
            self.rotate()?;
        }
        Ok(())
    }

    /// Writes a banner so readers can see where capture was interrupted.
    pub fn append_marker(&mut self, message: &str) -> io::Result<()> {
        self.writer.write_all(MARKER_RULE.as_bytes())?;
        self.writer.write_all(message.as_bytes())?;
        self.writer.write_all(MARKER_RULE.as_bytes())
    }

    fn rotate(&mut self) -> io::Result<()> {
        info!(serial = %self.serial, "max tmp logcat file size reached; rotating");
        self.writer.flush()?;
        let (writer, path) = create_tmp_file(&self.serial)?;
        self.writer = writer;
        let finished = std::mem::replace(&mut self.current, path);
        self.previous = Some(finished);
        self.bytes_stored = 0;
        self.rotations += 1;
        Ok(())
    }

    /// Previous file followed by the current one, flushed up to this call.
    pub fn reader(&mut self) -> io::Result<Box<dyn Read + Send>> {
        self.writer.flush()?;
        let current = File::open(&self.current)?;
        match &self.previous {
            Some(previous) => Ok(Box::new(File::open(previous)?.chain(current))),
            None => Ok(Box::new(current)),
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.previous
            .iter()
            .chain(std::iter::once(&self.current))
            .map(|path| path.to_path_buf())
            .collect()
    }

    pub fn rotations(&self) -> usize {
        self.rotations
    }

    /// Flushes and deletes both files.
    pub fn close(self) -> io::Result<()> {
        let Self {
            mut writer,
            current,
            previous,
            ..
        } = self;
        let flushed = writer.flush();
        drop(writer);
        if let Some(previous) = previous {
            previous.close()?;
        }
        current.close()?;
        flushed
    }
}

fn create_tmp_file(serial: &str) -> io::Result<(BufWriter<File>, TempPath)> {
    let file = tempfile::Builder::new()
        .prefix(&format!("logcat_{}_", serial.replace(|c: char| c == '/' || c == '\\', "_")))
        .suffix(".txt")
        .tempfile()?;
    let (file, path) = file.into_parts();
    debug!(serial, path = %path.display(), "created tmp logcat file");
    Ok((BufWriter::with_capacity(LOGCAT_BUFF_SIZE, file), path))
}

#[derive(Debug, Default)]
struct CancelToken {
    cancelled: Mutex<bool>,
    cv: Condvar,
}

impl CancelToken {
    fn cancel(&self) {
        let mut cancelled = self.cancelled.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *cancelled = true;
        self.cv.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `true` when woken by cancellation.
    fn sleep(&self, duration: Duration) -> bool {
        let cancelled = self.cancelled.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (cancelled, _) = self
            .cv
            .wait_timeout_while(cancelled, duration, |cancelled| !*cancelled)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cancelled
    }
}

enum SessionCommand {
    Append(Vec<u8>),
    Marker(String),
    Read(Sender<io::Result<Box<dyn Read + Send>>>),
    Paths(Sender<Vec<PathBuf>>),
    Stop(Sender<()>),
}

/// The buffer is owned by this loop alone; everything else talks to it by message.
fn run_session(mut buffer: LogBuffer, commands: Receiver<SessionCommand>) {
    let serial = buffer.serial.clone();
    let mut stopped_by = None;
    for command in commands.iter() {
        match command {
            SessionCommand::Append(data) => {
                if let Err(err) = buffer.append(&data) {
                    warn!(serial = %serial, error = %err, "failed to write logcat data");
                }
            }
            SessionCommand::Marker(message) => {
                if let Err(err) = buffer.append_marker(&message) {
                    warn!(serial = %serial, error = %err, "failed to write logcat marker");
                }
            }
            SessionCommand::Read(reply) => {
                let _ = reply.send(buffer.reader());
            }
            SessionCommand::Paths(reply) => {
                let _ = reply.send(buffer.paths());
            }
            SessionCommand::Stop(done) => {
                stopped_by = Some(done);
                break;
            }
        }
    }
    if let Err(err) = buffer.close() {
        warn!(serial = %serial, error = %err, "failed to clean up logcat files");
    }
    if let Some(done) = stopped_by {
        let _ = done.send(());
    }
}

struct CaptureReceiver {
    commands: Sender<SessionCommand>,
    cancel: Arc<CancelToken>,
}

impl ShellOutputReceiver for CaptureReceiver {
    fn add_output(&mut self, data: &[u8]) {
        let _ = self.commands.send(SessionCommand::Append(data.to_vec()));
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct CaptureLoop {
    serial: String,
    handle: Arc<DeviceHandle>,
    monitor: Arc<dyn StateMonitor>,
    commands: Sender<SessionCommand>,
    cancel: Arc<CancelToken>,
    start_delay: Duration,
    settle: Duration,
    reconnect_wait: Duration,
}

impl CaptureLoop {
    fn run(self) {
        while !self.cancel.is_cancelled() {
            // starting logcat right as the device comes online destabilises adb
            if !self.start_delay.is_zero() {
                debug!(serial = %self.serial, delay_ms = self.start_delay.as_millis() as u64, "delaying logcat start");
                if self.cancel.sleep(self.start_delay) {
                    break;
                }
            }

            debug!(serial = %self.serial, "starting logcat");
            let device = self.handle.get();
            let mut receiver = CaptureReceiver {
                commands: self.commands.clone(),
                cancel: Arc::clone(&self.cancel),
            };
            let outcome = device.execute_shell(LOGCAT_CMD, &mut receiver, None);
            if self.cancel.is_cancelled() {
                break;
            }

            match outcome {
                Err(err) => debug!(serial = %self.serial, error = %err, "logcat capture interrupted"),
                Ok(()) => debug!(serial = %self.serial, "logcat stream ended"),
            }
            let message = format!(
                "logcat capture interrupted for {}. Waiting for device to be back online. May see duplicate content in log.",
                self.serial
            );
            if self.commands.send(SessionCommand::Marker(message)).is_err() {
                break;
            }
            if self.cancel.sleep(self.settle) {
                break;
            }
            self.wait_for_online();
        }
        debug!(serial = %self.serial, "logcat capture loop exited");
    }

    fn wait_for_online(&self) {
        let deadline = Instant::now() + self.reconnect_wait;
        while !self.cancel.is_cancelled() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(serial = %self.serial, "device not back online; restarting logcat anyway");
                return;
            }
            if self.monitor.wait_for_device_online(remaining.min(RECONNECT_POLL)) {
                return;
            }
        }
    }
}

/// Background logcat capture: a capture thread streaming from the device
/// and a session thread owning the [`LogBuffer`].
pub struct LogcatCapture {
    serial: String,
    commands: Sender<SessionCommand>,
    cancel: Arc<CancelToken>,
    session: Option<JoinHandle<()>>,
    capture: Option<JoinHandle<()>>,
}

impl LogcatCapture {
    pub fn start(
        handle: Arc<DeviceHandle>,
        monitor: Arc<dyn StateMonitor>,
        settings: &LogcatSettings,
    ) -> io::Result<Self> {
        let serial = handle.serial();
        let buffer = LogBuffer::new(&serial, settings.max_tmp_file_size)?;
        let (commands, inbox) = mpsc::channel();
        let cancel = Arc::new(CancelToken::default());

        let session = thread::Builder::new()
            .name(format!("logcat-buffer-{serial}"))
            .spawn(move || run_session(buffer, inbox))?;

        let capture_loop = CaptureLoop {
            serial: serial.clone(),
            handle,
            monitor,
            commands: commands.clone(),
            cancel: Arc::clone(&cancel),
            start_delay: Duration::from_millis(settings.start_delay_ms),
            settle: Duration::from_millis(settings.reconnect_settle_ms),
            reconnect_wait: Duration::from_millis(settings.reconnect_wait_ms),
        };
        let capture = thread::Builder::new()
            .name(format!("logcat-{serial}"))
            .spawn(move || capture_loop.run())?;

        info!(serial = %serial, "logcat capture started");
        Ok(Self {
            serial,
            commands,
            cancel,
            session: Some(session),
            capture: Some(capture),
        })
    }

    /// Everything captured so far; empty when the buffer cannot be read.
    pub fn read(&self) -> Box<dyn Read + Send> {
        let (reply, response) = mpsc::channel();
        if self.commands.send(SessionCommand::Read(reply)).is_err() {
            warn!(serial = %self.serial, "logcat session closed");
            return Box::new(io::empty());
        }
        match response.recv() {
            Ok(Ok(reader)) => reader,
            Ok(Err(err)) => {
                error!(serial = %self.serial, error = %err, "failed to read logcat data");
                Box::new(io::empty())
            }
            Err(_) => Box::new(io::empty()),
        }
    }

    pub fn buffer_paths(&self) -> Vec<PathBuf> {
        let (reply, response) = mpsc::channel();
        if self.commands.send(SessionCommand::Paths(reply)).is_err() {
            return Vec::new();
        }
        response.recv().unwrap_or_default()
    }

    /// Ends capture and deletes both buffer files before returning.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        let (done, ack) = mpsc::channel();
        if self.commands.send(SessionCommand::Stop(done)).is_ok() {
            let _ = ack.recv();
        }
        for worker in [self.session.take(), self.capture.take()].into_iter().flatten() {
            if worker.join().is_err() {
                warn!(serial = %self.serial, "logcat worker panicked");
            }
        }
        info!(serial = %self.serial, "logcat capture stopped");
    }
}

impl Drop for LogcatCapture {
    fn drop(&mut self) {
        if self.session.is_some() || self.capture.is_some() {
            self.shutdown();
        }
    }
}

impl DeviceController {
    pub fn start_logcat(&self) -> Result<(), DeviceError> {
        let mut slot = self.logcat.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            debug!(serial = %self.serial(), "already capturing logcat; ignoring");
            return Ok(());
        }
        let capture = LogcatCapture::start(Arc::clone(&self.handle), Arc::clone(&self.monitor), &self.config.logcat)
            .map_err(|err| DeviceError::system(format!("failed to start logcat capture: {err}")))?;
        *slot = Some(capture);
        Ok(())
    }

    /// Background capture contents, or a one-shot dump when not capturing.
    pub fn get_logcat(&self) -> Box<dyn Read + Send> {
        {
            let slot = self.logcat.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(capture) = slot.as_ref() {
                return capture.read();
            }
        }
        warn!(serial = %self.serial(), "not capturing logcat in background; returning a dump");
        self.logcat_dump()
    }

    pub fn logcat_paths(&self) -> Vec<PathBuf> {
        let slot = self.logcat.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.as_ref().map(LogcatCapture::buffer_paths).unwrap_or_default()
    }

    pub fn stop_logcat(&self) {
        let capture = self
            .logcat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match capture {
            Some(capture) => capture.stop(),
            None => warn!(serial = %self.serial(), "stop requested but logcat is not being captured"),
        }
    }

    // Bypasses the retry executor so callers never see device errors here.
    fn logcat_dump(&self) -> Box<dyn Read + Send> {
        let mut receiver = CollectingReceiver::new();
        let device = self.remote_device();
        match device.execute_shell(LOGCAT_DUMP_CMD, &mut receiver, Some(self.config.command.timeout())) {
            Ok(()) => Box::new(io::Cursor::new(receiver.output().into_bytes())),
            Err(err) => {
                warn!(serial = %device.serial(), error = %err, "failed to get logcat dump");
                Box::new(io::empty())
            }
        }
    }
}

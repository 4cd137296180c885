use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::baud::BaudRate;
use crate::error::{Result, TransportError};
use crate::traits::{ByteSink, Link};

/// How long the reader waits for readability before re-checking for close.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest chunk handed to the sink per read.
pub const DEFAULT_READ_CHUNK: usize = 200;

/// Serial device settings.
///
/// Line framing is always 8N1 without hardware or software flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0`.
    pub path: PathBuf,
    /// Line speed.
    pub baud: BaudRate,
    /// Bound on each readiness wait; also the latency of observing `close`.
    pub poll_timeout: Duration,
    /// Maximum bytes read per chunk.
    pub read_chunk: usize,
}

impl SerialConfig {
    /// Settings for `path` at `baud` with default timing.
    pub fn new(path: impl Into<PathBuf>, baud: BaudRate) -> Self {
        Self {
            path: path.into(),
            baud,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

/// State shared by the port, its write halves, and the reader thread.
struct LinkState {
    path: PathBuf,
    active: AtomicBool,
    writer: Mutex<Option<File>>,
    write_wait: Duration,
}

impl LinkState {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Mark inactive and close the write handle. Returns whether this call
    /// performed the transition.
    fn deactivate(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.writer.lock() {
            guard.take();
        }
        was_active
    }

    /// Write every byte. A device failure closes the link for all users.
    fn write_all(&self, bytes: &[u8]) -> Result<usize> {
        if !self.is_active() {
            return Err(TransportError::Inactive);
        }
        let result = {
            let mut guard = self.writer.lock().map_err(|_| {
                TransportError::Disconnected("serial writer lock poisoned".to_string())
            })?;
            let file = guard.as_mut().ok_or(TransportError::Inactive)?;
            self.write_to(file, bytes)
        };
        if let Err(err @ (TransportError::Io(_) | TransportError::Disconnected(_))) = &result {
            warn!(path = ?self.path, error = %err, "write failed, closing serial device");
            self.deactivate();
        }
        result
    }

    fn write_to(&self, file: &mut File, bytes: &[u8]) -> Result<usize> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match file.write(&bytes[offset..]) {
                Ok(0) => {
                    return Err(TransportError::Disconnected(
                        "device accepted no bytes".to_string(),
                    ))
                }
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if !self.is_active() {
                        return Err(TransportError::Inactive);
                    }
                    match poll_fd(file.as_raw_fd(), libc::POLLOUT, self.write_wait) {
                        Ok(_) => continue,
                        Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                        Err(err) => return Err(TransportError::Io(err)),
                    }
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        trace!(path = ?self.path, bytes = offset, "wrote to device");
        Ok(offset)
    }
}

/// An opened and configured serial device whose reader has not started yet.
///
/// Splitting open from start lets the layer above obtain the write half
/// ([`SerialDevice::link`]) before it hands over the sink the reader feeds.
pub struct SerialDevice {
    config: SerialConfig,
    file: File,
    state: Arc<LinkState>,
}

impl SerialDevice {
    /// Open `config.path` and apply 8N1 raw-mode settings at `config.baud`.
    pub fn open(config: SerialConfig) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&config.path)
            .map_err(|source| TransportError::DeviceUnavailable {
                path: config.path.clone(),
                source,
            })?;

        configure_line(&file, config.baud).map_err(|source| TransportError::Configure {
            path: config.path.clone(),
            source,
        })?;

        let writer = file.try_clone()?;
        info!(path = ?config.path, baud = %config.baud, "serial device opened (8N1)");

        let state = Arc::new(LinkState {
            path: config.path.clone(),
            active: AtomicBool::new(true),
            writer: Mutex::new(Some(writer)),
            write_wait: config.poll_timeout,
        });

        Ok(Self {
            config,
            file,
            state,
        })
    }

    /// A write half for this device.
    pub fn link(&self) -> SerialLink {
        SerialLink {
            state: Arc::clone(&self.state),
        }
    }

    /// The settings this device was opened with.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Spawn the reader thread, forwarding every chunk read to `sink`.
    pub fn start<S>(self, sink: S) -> Result<SerialPort>
    where
        S: ByteSink + 'static,
    {
        let reader = ReaderLoop {
            file: self.file,
            state: Arc::clone(&self.state),
            sink,
            poll_timeout: self.config.poll_timeout,
            read_chunk: self.config.read_chunk.max(1),
        };

        let handle = std::thread::Builder::new()
            .name("groundlink-serial-rx".to_string())
            .spawn(move || reader.run())
            .map_err(|err| {
                self.state.deactivate();
                TransportError::Io(err)
            })?;

        Ok(SerialPort {
            config: self.config,
            state: self.state,
            reader: Some(handle),
        })
    }
}

impl std::fmt::Debug for SerialDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDevice")
            .field("path", &self.config.path)
            .field("baud", &self.config.baud)
            .field("active", &self.state.is_active())
            .finish()
    }
}

/// An open serial transport with a running reader thread.
pub struct SerialPort {
    config: SerialConfig,
    state: Arc<LinkState>,
    reader: Option<JoinHandle<Option<TransportError>>>,
}

impl SerialPort {
    /// Open, configure, and start reading from a serial device.
    ///
    /// Fails with [`TransportError::DeviceUnavailable`] if the path cannot be
    /// opened.
    pub fn open<S>(config: SerialConfig, sink: S) -> Result<Self>
    where
        S: ByteSink + 'static,
    {
        SerialDevice::open(config)?.start(sink)
    }

    /// Blocking write of exactly `bytes`. Only valid while the port is active.
    pub fn write(&self, bytes: &[u8]) -> Result<usize> {
        self.state.write_all(bytes)
    }

    /// A write half that can be shared with other threads.
    pub fn link(&self) -> SerialLink {
        SerialLink {
            state: Arc::clone(&self.state),
        }
    }

    /// Whether the port still accepts writes and the reader is running.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// The device path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// The configured line speed.
    pub fn baud(&self) -> BaudRate {
        self.config.baud
    }

    /// Mark inactive, close the device, and wait for the reader to exit.
    ///
    /// After this returns no further `ingest` calls reach the sink. Returns
    /// the error that stopped the reader, if it stopped on its own. Calling
    /// `close` again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.state.deactivate() {
            debug!(path = ?self.config.path, "closing serial device");
        }
        let Some(handle) = self.reader.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err),
            Err(_) => Err(TransportError::Disconnected(
                "serial reader thread panicked".to_string(),
            )),
        }
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("path", &self.config.path)
            .field("baud", &self.config.baud)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Cloneable write half of a serial device.
#[derive(Clone)]
pub struct SerialLink {
    state: Arc<LinkState>,
}

impl Link for SerialLink {
    fn write(&self, bytes: &[u8]) -> Result<usize> {
        self.state.write_all(bytes)
    }

    fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("path", &self.state.path)
            .field("active", &self.state.is_active())
            .finish()
    }
}

struct ReaderLoop<S> {
    file: File,
    state: Arc<LinkState>,
    sink: S,
    poll_timeout: Duration,
    read_chunk: usize,
}

impl<S: ByteSink> ReaderLoop<S> {
    fn run(mut self) -> Option<TransportError> {
        let fd = self.file.as_raw_fd();
        let mut buf = vec![0u8; self.read_chunk];
        debug!(path = ?self.state.path, "serial reader started");

        // The timeout doubles as the only point where a close request is seen.
        while self.state.is_active() {
            let revents = match poll_fd(fd, libc::POLLIN, self.poll_timeout) {
                Ok(None) => continue,
                Ok(Some(revents)) => revents,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return self.fail(TransportError::Io(err)),
            };

            let hangup = libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;
            if revents & libc::POLLIN == 0 && revents & hangup != 0 {
                return self.fail(TransportError::Disconnected(format!(
                    "poll reported revents {revents:#x}"
                )));
            }

            match self.file.read(&mut buf) {
                Ok(0) => {
                    return self.fail(TransportError::Disconnected(
                        "end of stream".to_string(),
                    ))
                }
                Ok(n) => {
                    trace!(bytes = n, "read chunk from device");
                    self.sink.ingest(&buf[..n]);
                }
                Err(err)
                    if err.kind() == ErrorKind::Interrupted
                        || err.kind() == ErrorKind::WouldBlock =>
                {
                    continue
                }
                Err(err) => return self.fail(TransportError::Io(err)),
            }
        }

        debug!(path = ?self.state.path, "serial reader stopped");
        None
    }

    fn fail(&self, err: TransportError) -> Option<TransportError> {
        if !self.state.deactivate() {
            // Closed concurrently; the failure is a side effect of closing.
            debug!(path = ?self.state.path, error = %err, "serial reader stopped during close");
            return None;
        }
        error!(path = ?self.state.path, error = %err, "serial reader failed; transport closed");
        self.sink.link_closed(&err);
        Some(err)
    }
}

/// Wait for `events` on `fd`. Returns `None` on timeout.
fn poll_fd(
    fd: RawFd,
    events: libc::c_short,
    timeout: Duration,
) -> std::io::Result<Option<libc::c_short>> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

    // SAFETY: `pfd` is a valid, initialized pollfd and we pass a count of one.
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    match rc {
        0 => Ok(None),
        n if n > 0 => Ok(Some(pfd.revents)),
        _ => Err(std::io::Error::last_os_error()),
    }
}

/// Put the line into raw 8N1 mode at `baud` with no flow control.
fn configure_line(file: &File, baud: BaudRate) -> std::io::Result<()> {
    let fd = file.as_raw_fd();

    // SAFETY: termios is plain data; an all-zero value is valid and is fully
    // overwritten by tcgetattr below.
    let mut options: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` stays open for the lifetime of `file`, and `options` is a
    // valid, writable termios.
    if unsafe { libc::tcgetattr(fd, &mut options) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let speed = baud.as_speed();
    // SAFETY: `options` is a valid termios obtained from tcgetattr.
    if unsafe { libc::cfsetispeed(&mut options, speed) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::cfsetospeed(&mut options, speed) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    options.c_cflag |= libc::CLOCAL | libc::CREAD;
    options.c_cflag &= !(libc::PARENB | libc::CSTOPB | libc::CSIZE);
    options.c_cflag |= libc::CS8;
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        options.c_cflag &= !libc::CRTSCTS;
    }
    options.c_lflag &= !(libc::ICANON | libc::ECHO | libc::ECHOE | libc::ISIG);
    options.c_iflag &= !(libc::IXON
        | libc::IXOFF
        | libc::IXANY
        | libc::ICRNL
        | libc::INLCR
        | libc::IGNCR
        | libc::ISTRIP);
    options.c_oflag &= !libc::OPOST;
    options.c_cc[libc::VMIN] = 0;
    options.c_cc[libc::VTIME] = 0;

    // SAFETY: `fd` is open and `options` is a fully initialized termios.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &options) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

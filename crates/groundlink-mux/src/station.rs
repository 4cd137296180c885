use std::path::{Path, PathBuf};
use std::time::Duration;

use groundlink_frame::{Packet, PacketType};
use groundlink_transport::{BaudRate, SerialConfig, SerialDevice, SerialPort, TransportError};
use tracing::{debug, info};

use crate::error::Result;
use crate::multiplexer::{Multiplexer, MuxConfig};
use crate::registry::HandlerRef;
use crate::stats::StatsSnapshot;

/// How long [`Station::close`] waits for queued packets to go out.
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything needed to bring up a serial station.
#[derive(Debug, Clone)]
pub struct StationConfig {
    pub serial: SerialConfig,
    pub mux: MuxConfig,
}

impl StationConfig {
    pub fn new(path: impl Into<PathBuf>, baud: BaudRate) -> Self {
        Self {
            serial: SerialConfig::new(path, baud),
            mux: MuxConfig::default(),
        }
    }
}

/// A serial device wired to a [`Multiplexer`].
///
/// The multiplexer writes through the device's write half and the device's
/// reader thread feeds the multiplexer. Dropping the station closes both.
pub struct Station {
    port: SerialPort,
    mux: Multiplexer,
}

impl Station {
    /// Open the device, start the multiplexer, then start the reader.
    pub fn open(config: StationConfig) -> Result<Self> {
        let device = SerialDevice::open(config.serial)?;
        let mux = Multiplexer::start(device.link(), config.mux)?;
        let port = device.start(mux.clone())?;
        info!(path = ?port.path(), baud = %port.baud(), "station open");
        Ok(Self { port, mux })
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    pub fn register(&self, kind: PacketType, handler: HandlerRef) -> bool {
        self.mux.register(kind, handler)
    }

    pub fn register_fn<F>(&self, kind: PacketType, handler: F) -> HandlerRef
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        self.mux.register_fn(kind, handler)
    }

    pub fn unregister(&self, kind: PacketType, handler: &HandlerRef) -> bool {
        self.mux.unregister(kind, handler)
    }

    pub fn transmit(&self, packet: Packet) -> Result<()> {
        self.mux.transmit(packet)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.mux.stats()
    }

    /// Whether the device is open and both multiplexer workers are alive.
    pub fn is_healthy(&self) -> bool {
        self.port.is_active() && self.mux.is_running()
    }

    pub fn path(&self) -> &Path {
        self.port.path()
    }

    pub fn baud(&self) -> BaudRate {
        self.port.baud()
    }

    /// Close the device, then stop the multiplexer.
    ///
    /// Queued packets get up to [`CLOSE_FLUSH_TIMEOUT`] to be written first.
    /// No handler runs for data read after this returns. Reports the first
    /// transport failure seen, if any.
    pub fn close(&mut self) -> Result<()> {
        if !self.mux.flush(CLOSE_FLUSH_TIMEOUT) {
            debug!("closing with packets still queued");
        }
        let closed = self.port.close();
        self.mux.shutdown();
        closed?;
        match self.mux.take_link_error() {
            Some(TransportError::Inactive) | None => Ok(()),
            Some(err) => Err(err.into()),
        }
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Station")
            .field("port", &self.port)
            .field("mux", &self.mux)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MuxError;

    #[test]
    fn missing_device_is_unavailable() {
        let config = StationConfig::new("/dev/groundlink-does-not-exist", BaudRate::B57600);
        let err = Station::open(config).unwrap_err();
        assert!(matches!(
            err,
            MuxError::Transport(TransportError::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn config_defaults() {
        let config = StationConfig::new("/dev/ttyUSB0", BaudRate::B115200);
        assert_eq!(config.serial.baud, BaudRate::B115200);
        assert_eq!(config.serial.poll_timeout, Duration::from_secs(1));
        assert_eq!(config.mux, MuxConfig::default());
    }

    #[cfg(target_os = "linux")]
    mod pty {
        use std::ffi::CStr;
        use std::fs::File;
        use std::io::{Read, Write};
        use std::os::fd::FromRawFd;
        use std::sync::mpsc;
        use std::sync::Mutex;

        use groundlink_frame::encode;

        use super::*;

        fn open_pty() -> (File, PathBuf) {
            // SAFETY: posix_openpt has no pointer arguments.
            let master = unsafe { libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY) };
            assert!(master >= 0, "posix_openpt failed");
            // SAFETY: `master` is a valid pty master descriptor.
            unsafe {
                assert_eq!(libc::grantpt(master), 0);
                assert_eq!(libc::unlockpt(master), 0);
            }
            let mut name = [0 as libc::c_char; 128];
            // SAFETY: `name` is writable for its full length.
            let rc = unsafe { libc::ptsname_r(master, name.as_mut_ptr(), name.len()) };
            assert_eq!(rc, 0, "ptsname_r failed");
            // SAFETY: ptsname_r wrote a NUL-terminated string into `name`.
            let slave = unsafe { CStr::from_ptr(name.as_ptr()) }
                .to_str()
                .unwrap()
                .to_owned();
            // SAFETY: we own `master` and hand it to exactly one File.
            let master = unsafe { File::from_raw_fd(master) };
            (master, PathBuf::from(slave))
        }

        fn open_station(path: PathBuf) -> Station {
            let mut config = StationConfig::new(path, BaudRate::B57600);
            config.serial.poll_timeout = Duration::from_millis(50);
            Station::open(config).unwrap()
        }

        #[test]
        fn device_frames_reach_handlers() {
            let (mut master, slave) = open_pty();
            let mut station = open_station(slave);
            let (tx, rx) = mpsc::channel();
            let tx = Mutex::new(tx);
            station.register_fn(PacketType::AnalogDataResponse, move |packet: &Packet| {
                let _ = tx.lock().unwrap().send(packet.clone());
            });

            master.write_all(b"junk(D=sM=p").unwrap();
            master.write_all(b"ly=====MA)").unwrap();

            let packet = rx.recv_timeout(Duration::from_secs(3)).unwrap();
            assert_eq!(packet, Packet::analog_data(vec![100, -50, 0]).unwrap());
            assert!(station.is_healthy());
            station.close().unwrap();
            assert!(!station.is_healthy());
        }

        #[test]
        fn transmitted_packets_reach_device() {
            let (mut master, slave) = open_pty();
            let mut station = open_station(slave);

            station
                .transmit(Packet::request(PacketType::AnalogDataRequest).unwrap())
                .unwrap();
            let mut buf = [0u8; 5];
            master.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"(C>@)");

            let sample = Packet::analog_data(vec![1, 2, 3]).unwrap();
            station.transmit(sample.clone()).unwrap();
            let expected = encode(&sample).unwrap();
            let mut buf = vec![0u8; expected.len()];
            master.read_exact(&mut buf).unwrap();
            assert_eq!(buf, expected.to_vec());

            station.close().unwrap();
            assert_eq!(station.stats().packets_sent, 2);
        }

        #[test]
        fn hangup_surfaces_on_close() {
            let (master, slave) = open_pty();
            let mut station = open_station(slave);
            drop(master);

            let deadline = std::time::Instant::now() + Duration::from_secs(3);
            while station.is_healthy() {
                assert!(std::time::Instant::now() < deadline, "hang-up not detected");
                std::thread::sleep(Duration::from_millis(10));
            }
            assert!(station.close().is_err());
        }
    }
}

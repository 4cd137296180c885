use std::sync::{Arc, Mutex};

use crate::error::{Result, TransportError};

/// Receives raw byte chunks from a transport reader.
///
/// The reader thread calls [`ByteSink::ingest`] once per successful read, in
/// arrival order. Implementations must not block for long: the reader does
/// not poll the device again until `ingest` returns.
pub trait ByteSink: Send + Sync {
    /// Accept one chunk of bytes read from the device.
    fn ingest(&self, bytes: &[u8]);

    /// Called once when the reader stops because of a device failure.
    ///
    /// Not called on an orderly `close`.
    fn link_closed(&self, _reason: &TransportError) {}
}

impl<S: ByteSink + ?Sized> ByteSink for Arc<S> {
    fn ingest(&self, bytes: &[u8]) {
        (**self).ingest(bytes);
    }

    fn link_closed(&self, reason: &TransportError) {
        (**self).link_closed(reason);
    }
}

/// The write half of a transport.
///
/// `write` blocks until every byte has been handed to the device, and returns
/// the number of bytes written.
pub trait Link: Send + Sync {
    fn write(&self, bytes: &[u8]) -> Result<usize>;

    /// Whether the link still accepts writes.
    fn is_active(&self) -> bool {
        true
    }
}

impl<L: Link + ?Sized> Link for Arc<L> {
    fn write(&self, bytes: &[u8]) -> Result<usize> {
        (**self).write(bytes)
    }

    fn is_active(&self) -> bool {
        (**self).is_active()
    }
}

/// Collects written bytes in memory. Useful for tests and offline encoding.
impl Link for Mutex<Vec<u8>> {
    fn write(&self, bytes: &[u8]) -> Result<usize> {
        let mut guard = self
            .lock()
            .map_err(|_| TransportError::Disconnected("memory link lock poisoned".to_string()))?;
        guard.extend_from_slice(bytes);
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSink {
        chunks: Mutex<Vec<Vec<u8>>>,
    }

    impl ByteSink for CountingSink {
        fn ingest(&self, bytes: &[u8]) {
            self.chunks.lock().unwrap().push(bytes.to_vec());
        }
    }

    #[test]
    fn memory_link_appends_in_order() {
        let link = Mutex::new(Vec::new());
        assert_eq!(link.write(b"(C").unwrap(), 2);
        assert_eq!(link.write(b"==)").unwrap(), 3);
        assert_eq!(link.into_inner().unwrap(), b"(C==)".to_vec());
    }

    #[test]
    fn arc_forwards_to_inner_sink() {
        let sink = Arc::new(CountingSink {
            chunks: Mutex::new(Vec::new()),
        });
        let shared: Arc<dyn ByteSink> = sink.clone();
        shared.ingest(b"abc");
        shared.link_closed(&TransportError::Inactive);

        assert_eq!(sink.chunks.lock().unwrap().as_slice(), &[b"abc".to_vec()]);
    }

    #[test]
    fn arc_link_reports_active_by_default() {
        let link: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        assert!(link.is_active());
        assert_eq!(link.write(b"x").unwrap(), 1);
    }
}

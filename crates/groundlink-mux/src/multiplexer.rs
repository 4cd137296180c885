use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use groundlink_frame::{
    encode, FrameError, FrameScanner, Packet, PacketType, MIN_ACCUMULATION_CAPACITY,
};
use groundlink_transport::{ByteSink, Link, TransportError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::error::{MuxError, Result};
use crate::registry::{HandlerRef, HandlerRegistry, PacketHandler};
use crate::ring::{OverflowPolicy, PacketRing, Push, DEFAULT_RING_CAPACITY};
use crate::stats::{add, bump, MuxStats, StatsSnapshot};

const WORKERS: usize = 2;

/// Buffer sizing and overflow behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Slots for decoded packets awaiting dispatch.
    pub inbound_capacity: usize,
    /// Slots for packets awaiting transmission.
    pub outbound_capacity: usize,
    /// Bytes of not-yet-framed input retained across reads.
    pub accumulation_capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_RING_CAPACITY,
            outbound_capacity: DEFAULT_RING_CAPACITY,
            accumulation_capacity: MIN_ACCUMULATION_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn wait<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

struct Accumulation {
    scanner: FrameScanner,
    /// Set by ingest, cleared once the scan worker has consumed every frame.
    pending: bool,
    stopping: bool,
}

struct Outbound {
    ring: PacketRing<Packet>,
    in_flight: bool,
    stopping: bool,
    /// The link failed; nothing further will be written.
    failed: bool,
}

struct Shared {
    config: MuxConfig,
    accumulation: Mutex<Accumulation>,
    bytes_ready: Condvar,
    inbound: Mutex<PacketRing<Packet>>,
    outbound: Mutex<Outbound>,
    packets_ready: Condvar,
    outbound_idle: Condvar,
    registry: HandlerRegistry,
    stats: MuxStats,
    link_error: Mutex<Option<TransportError>>,
    live_workers: AtomicUsize,
}

impl Shared {
    fn ingest(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut acc = lock(&self.accumulation);
        if acc.stopping {
            return;
        }
        add(&self.stats.bytes_ingested, bytes.len() as u64);
        let before = acc.scanner.overflows();
        if let Err(err) = acc.scanner.push(bytes) {
            warn!(error = %err, "dropping oversize input chunk");
        }
        let overflows = acc.scanner.overflows() - before;
        if overflows > 0 {
            add(&self.stats.accumulation_overflows, overflows);
        }
        acc.pending = true;
        drop(acc);
        self.bytes_ready.notify_one();
    }

    /// Decode buffered frames into the inbound ring while it has room.
    ///
    /// Returns `true` if the ring filled up before the scanner ran dry.
    fn decode_frames(&self, scanner: &mut FrameScanner) -> bool {
        loop {
            if lock(&self.inbound).is_full() {
                return true;
            }
            let Some(result) = scanner.next_packet() else {
                return false;
            };
            match result {
                Ok(packet) => {
                    bump(&self.stats.frames_decoded);
                    self.push_inbound(packet);
                }
                Err(err) => self.record_decode_error(&err),
            }
        }
    }

    fn push_inbound(&self, packet: Packet) {
        let mut inbound = lock(&self.inbound);
        let capacity = inbound.capacity();
        match inbound.push(packet, self.config.overflow_policy) {
            Push::Stored => {}
            Push::Rejected(packet) => {
                bump(&self.stats.inbound_dropped);
                warn!(kind = %packet.kind(), capacity, "inbound ring full, dropping packet");
            }
            Push::Evicted(old) => {
                bump(&self.stats.inbound_dropped);
                warn!(kind = %old.kind(), capacity, "inbound ring full, evicted oldest packet");
            }
        }
    }

    fn record_decode_error(&self, err: &FrameError) {
        match err {
            FrameError::ChecksumMismatch { .. } => {
                bump(&self.stats.checksum_failures);
                debug!(error = %err, "discarding frame");
            }
            FrameError::UnsupportedType(tag) => {
                bump(&self.stats.unsupported_types);
                warn!(tag = %char::from(*tag), "discarding frame of unsupported type");
            }
            _ => {
                bump(&self.stats.malformed_frames);
                debug!(error = %err, "discarding malformed frame");
            }
        }
    }

    fn dispatch_inbound(&self) {
        loop {
            let next = lock(&self.inbound).pop();
            let Some(packet) = next else {
                break;
            };
            let kind = packet.kind();
            for handler in self.registry.handlers_for(kind) {
                let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(&packet)));
                if outcome.is_err() {
                    bump(&self.stats.handler_panics);
                    error!(%kind, "packet handler panicked");
                }
            }
            bump(&self.stats.packets_dispatched);
            trace!(%kind, "packet dispatched");
        }
    }

    /// Block until a packet is queued for transmission, or the ring is empty
    /// and shutdown was requested.
    fn next_outbound(&self) -> Option<Packet> {
        let mut outbound = lock(&self.outbound);
        loop {
            if let Some(packet) = outbound.ring.pop() {
                outbound.in_flight = true;
                return Some(packet);
            }
            if outbound.stopping {
                return None;
            }
            outbound = wait(&self.packets_ready, outbound);
        }
    }

    fn finish_outbound(&self) {
        lock(&self.outbound).in_flight = false;
        self.outbound_idle.notify_all();
    }

    /// Refuse further transmits and count whatever is still queued as lost.
    fn abandon_outbound(&self) {
        let mut outbound = lock(&self.outbound);
        outbound.stopping = true;
        outbound.failed = true;
        outbound.in_flight = false;
        let mut abandoned = 0u64;
        while outbound.ring.pop().is_some() {
            abandoned += 1;
        }
        drop(outbound);
        if abandoned > 0 {
            add(&self.stats.outbound_dropped, abandoned);
            warn!(abandoned, "discarding queued packets after link failure");
        }
        self.outbound_idle.notify_all();
    }

    fn record_link_error(&self, err: TransportError) {
        let mut slot = lock(&self.link_error);
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

/// Decrements the live-worker count when a worker exits, even by panic.
struct LiveWorker<'a>(&'a AtomicUsize);

impl Drop for LiveWorker<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn scan_worker(shared: &Shared) {
    let _live = LiveWorker(&shared.live_workers);
    loop {
        {
            let mut acc = lock(&shared.accumulation);
            while !acc.pending && !acc.stopping {
                acc = wait(&shared.bytes_ready, acc);
            }
            if acc.stopping {
                break;
            }
            let more = shared.decode_frames(&mut acc.scanner);
            acc.pending = more;
        }
        shared.dispatch_inbound();
    }
    debug!("scan worker stopped");
}

fn transmit_worker<L: Link>(shared: &Shared, link: L) {
    let _live = LiveWorker(&shared.live_workers);
    while let Some(packet) = shared.next_outbound() {
        let kind = packet.kind();
        let frame = match encode(&packet) {
            Ok(frame) => frame,
            Err(err) => {
                bump(&shared.stats.outbound_dropped);
                warn!(%kind, error = %err, "dropping unencodable packet");
                shared.finish_outbound();
                continue;
            }
        };
        match link.write(&frame) {
            Ok(written) => {
                bump(&shared.stats.packets_sent);
                add(&shared.stats.bytes_written, written as u64);
                trace!(%kind, bytes = written, "packet sent");
                shared.finish_outbound();
            }
            Err(err) => {
                bump(&shared.stats.outbound_dropped);
                error!(%kind, error = %err, "link write failed, stopping transmit worker");
                shared.record_link_error(err);
                shared.abandon_outbound();
                break;
            }
        }
    }
    debug!("transmit worker stopped");
}

struct Inner {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn shutdown(&self) {
        let workers = std::mem::take(&mut *lock(&self.workers));
        if workers.is_empty() {
            return;
        }
        info!("multiplexer shutting down");
        lock(&self.shared.accumulation).stopping = true;
        self.shared.bytes_ready.notify_all();
        lock(&self.shared.outbound).stopping = true;
        self.shared.packets_ready.notify_all();

        let current = thread::current().id();
        for worker in workers {
            // Shutdown from inside a handler: that worker exits on its own.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("multiplexer worker panicked");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Turns raw link bytes into dispatched packets and queued packets into
/// link writes.
///
/// Two worker threads run for the multiplexer's lifetime:
/// - the scan worker frames and decodes ingested bytes into the inbound
///   ring, then invokes the registered handlers for each packet in order;
/// - the transmit worker drains the outbound ring, encodes each packet and
///   writes it to the link.
///
/// Both sleep on condition variables when idle. The handle is cheap to
/// clone; the workers stop when [`shutdown`](Multiplexer::shutdown) is
/// called or the last clone is dropped.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

impl Multiplexer {
    /// Start the workers, writing outbound frames to `link`.
    pub fn start<L>(link: L, config: MuxConfig) -> Result<Self>
    where
        L: Link + 'static,
    {
        let shared = Arc::new(Shared {
            config,
            accumulation: Mutex::new(Accumulation {
                scanner: FrameScanner::with_capacity(config.accumulation_capacity),
                pending: false,
                stopping: false,
            }),
            bytes_ready: Condvar::new(),
            inbound: Mutex::new(PacketRing::with_capacity(config.inbound_capacity)),
            outbound: Mutex::new(Outbound {
                ring: PacketRing::with_capacity(config.outbound_capacity),
                in_flight: false,
                stopping: false,
                failed: false,
            }),
            packets_ready: Condvar::new(),
            outbound_idle: Condvar::new(),
            registry: HandlerRegistry::new(),
            stats: MuxStats::default(),
            link_error: Mutex::new(None),
            live_workers: AtomicUsize::new(0),
        });
        let inner = Arc::new(Inner {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Vec::with_capacity(WORKERS)),
        });

        let scan_shared = Arc::clone(&shared);
        shared.live_workers.fetch_add(1, Ordering::SeqCst);
        let scan = thread::Builder::new()
            .name("groundlink-scan".to_string())
            .spawn(move || scan_worker(&scan_shared))
            .map_err(|err| {
                shared.live_workers.fetch_sub(1, Ordering::SeqCst);
                MuxError::Spawn(err)
            })?;
        lock(&inner.workers).push(scan);

        let tx_shared = Arc::clone(&shared);
        shared.live_workers.fetch_add(1, Ordering::SeqCst);
        let transmit = thread::Builder::new()
            .name("groundlink-transmit".to_string())
            .spawn(move || transmit_worker(&tx_shared, link))
            .map_err(|err| {
                shared.live_workers.fetch_sub(1, Ordering::SeqCst);
                MuxError::Spawn(err)
            })?;
        lock(&inner.workers).push(transmit);

        info!(
            inbound = config.inbound_capacity,
            outbound = config.outbound_capacity,
            policy = ?config.overflow_policy,
            "multiplexer started"
        );
        Ok(Self { inner })
    }

    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    /// Append bytes received from the link.
    ///
    /// Frames are extracted and dispatched asynchronously by the scan
    /// worker. Bytes arriving after shutdown are ignored.
    pub fn ingest(&self, bytes: &[u8]) {
        self.shared().ingest(bytes);
    }

    /// Queue a packet for transmission.
    ///
    /// Packets that cannot be encoded are refused with [`MuxError::Frame`].
    /// Fails with [`MuxError::BufferOverflow`] when the outbound ring is
    /// full under [`OverflowPolicy::DropNewest`], and with
    /// [`MuxError::Stopped`] after shutdown or a link failure.
    pub fn transmit(&self, packet: Packet) -> Result<()> {
        packet.validate()?;

        let shared = self.shared();
        let mut outbound = lock(&shared.outbound);
        if outbound.stopping {
            return Err(MuxError::Stopped);
        }
        let capacity = outbound.ring.capacity();
        match outbound.ring.push(packet, shared.config.overflow_policy) {
            Push::Stored => {}
            Push::Rejected(packet) => {
                bump(&shared.stats.outbound_dropped);
                warn!(kind = %packet.kind(), capacity, "outbound ring full, dropping packet");
                return Err(MuxError::BufferOverflow {
                    queue: "outbound",
                    capacity,
                });
            }
            Push::Evicted(old) => {
                bump(&shared.stats.outbound_dropped);
                warn!(kind = %old.kind(), capacity, "outbound ring full, evicted oldest packet");
            }
        }
        drop(outbound);
        shared.packets_ready.notify_one();
        Ok(())
    }

    /// Wait until every queued packet has been written, up to `timeout`.
    ///
    /// Returns `true` if the outbound ring drained in time, `false` on
    /// timeout or if the link failed.
    pub fn flush(&self, timeout: Duration) -> bool {
        let shared = self.shared();
        let deadline = Instant::now() + timeout;
        let mut outbound = lock(&shared.outbound);
        while !outbound.failed && (!outbound.ring.is_empty() || outbound.in_flight) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            outbound = shared
                .outbound_idle
                .wait_timeout(outbound, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        !outbound.failed
    }

    /// Subscribe `handler` to packets of `kind`.
    ///
    /// Registering the same handle for the same type again replaces the
    /// earlier registration. Returns `true` in that case.
    pub fn register(&self, kind: PacketType, handler: HandlerRef) -> bool {
        self.shared().registry.register(kind, handler)
    }

    /// Register a closure and return its handle for a later
    /// [`unregister`](Multiplexer::unregister).
    pub fn register_fn<F>(&self, kind: PacketType, handler: F) -> HandlerRef
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        let handler: HandlerRef = Arc::new(handler);
        self.register(kind, Arc::clone(&handler));
        handler
    }

    /// Remove a registration. Unknown registrations are ignored.
    pub fn unregister(&self, kind: PacketType, handler: &HandlerRef) -> bool {
        self.shared().registry.unregister(kind, handler)
    }

    /// Number of live registrations.
    pub fn handler_count(&self) -> usize {
        self.shared().registry.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared().stats.snapshot()
    }

    /// Take the first link failure seen by the transmit worker or reported
    /// by the transport reader.
    pub fn take_link_error(&self) -> Option<TransportError> {
        lock(&self.shared().link_error).take()
    }

    /// Whether both workers are still running.
    pub fn is_running(&self) -> bool {
        self.shared().live_workers.load(Ordering::SeqCst) == WORKERS
    }

    /// Stop both workers and wait for them to exit.
    ///
    /// Packets already queued for transmission are written first. Bytes not
    /// yet framed are discarded. Calling this more than once is harmless.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl ByteSink for Multiplexer {
    fn ingest(&self, bytes: &[u8]) {
        Multiplexer::ingest(self, bytes);
    }

    fn link_closed(&self, reason: &TransportError) {
        error!(error = %reason, "transport reader stopped");
        self.shared().record_link_error(detach(reason));
    }
}

/// Rebuild a transport error the reader still owns.
fn detach(err: &TransportError) -> TransportError {
    match err {
        TransportError::Inactive => TransportError::Inactive,
        TransportError::Disconnected(reason) => TransportError::Disconnected(reason.clone()),
        TransportError::Io(io) => TransportError::Io(std::io::Error::new(io.kind(), io.to_string())),
        other => TransportError::Disconnected(other.to_string()),
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("config", &self.shared().config)
            .field("running", &self.is_running())
            .field("handlers", &self.handler_count())
            .finish()
    }
}

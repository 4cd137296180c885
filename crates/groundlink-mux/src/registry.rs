use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use groundlink_frame::{Packet, PacketType};
use tracing::debug;

/// Receives decoded packets of the types it was registered for.
///
/// Handlers run on the multiplexer's dispatch worker, one packet at a time.
/// A slow handler delays later packets but never blocks registration.
pub trait PacketHandler: Send + Sync {
    fn handle(&self, packet: &Packet);
}

impl<F> PacketHandler for F
where
    F: Fn(&Packet) + Send + Sync,
{
    fn handle(&self, packet: &Packet) {
        self(packet)
    }
}

/// Shared handle to a registered handler.
///
/// Registrations are keyed by the handle's allocation: clones of one `Arc`
/// are the same handler, two separately allocated closures are not.
pub type HandlerRef = Arc<dyn PacketHandler>;

struct Entry {
    kind: PacketType,
    handler: HandlerRef,
}

impl Entry {
    fn matches(&self, kind: PacketType, handler: &HandlerRef) -> bool {
        self.kind == kind && std::ptr::addr_eq(Arc::as_ptr(&self.handler), Arc::as_ptr(handler))
    }
}

/// Ordered (packet type, handler) subscriptions.
///
/// Insertion order is dispatch order for handlers sharing a type. No two
/// entries share the same type and handler.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `handler` to packets of `kind`.
    ///
    /// An existing registration of the same pair is removed first, so the
    /// pair moves to the end of the dispatch order. Returns `true` when a
    /// previous registration was replaced.
    pub fn register(&self, kind: PacketType, handler: HandlerRef) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|entry| !entry.matches(kind, &handler));
        let replaced = entries.len() != before;
        entries.push(Entry { kind, handler });
        debug!(%kind, replaced, total = entries.len(), "handler registered");
        replaced
    }

    /// Remove the first registration of `handler` for `kind`.
    ///
    /// Returns `false` (and changes nothing) if there was none.
    pub fn unregister(&self, kind: PacketType, handler: &HandlerRef) -> bool {
        let mut entries = self.entries();
        match entries.iter().position(|entry| entry.matches(kind, handler)) {
            Some(index) => {
                entries.remove(index);
                debug!(%kind, total = entries.len(), "handler unregistered");
                true
            }
            None => false,
        }
    }

    /// Snapshot of the handlers for `kind`, in dispatch order.
    ///
    /// The registry lock is released before this returns, so callers may
    /// invoke the handlers while other threads register or unregister.
    pub fn handlers_for(&self, kind: PacketType) -> Vec<HandlerRef> {
        self.entries()
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| Arc::clone(&entry.handler))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<PacketType> = self.entries().iter().map(|entry| entry.kind).collect();
        f.debug_struct("HandlerRegistry").field("entries", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counter() -> (HandlerRef, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let handler: HandlerRef = Arc::new(move |_: &Packet| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (handler, hits)
    }

    fn dispatch(registry: &HandlerRegistry, packet: &Packet) {
        for handler in registry.handlers_for(packet.kind()) {
            handler.handle(packet);
        }
    }

    #[test]
    fn duplicate_registration_dispatches_once() {
        let registry = HandlerRegistry::new();
        let (handler, hits) = counter();

        assert!(!registry.register(PacketType::AnalogDataResponse, Arc::clone(&handler)));
        assert!(registry.register(PacketType::AnalogDataResponse, Arc::clone(&handler)));
        assert_eq!(registry.len(), 1);

        dispatch(&registry, &Packet::analog_data(vec![1]).unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn same_handler_on_two_types_is_two_entries() {
        let registry = HandlerRegistry::new();
        let (handler, hits) = counter();
        registry.register(PacketType::AnalogDataResponse, Arc::clone(&handler));
        registry.register(PacketType::DeviceInfoResponse, Arc::clone(&handler));
        assert_eq!(registry.len(), 2);

        dispatch(&registry, &Packet::request(PacketType::DeviceInfoResponse).unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let registry = HandlerRegistry::new();
        let (kept, kept_hits) = counter();
        let (stranger, _) = counter();
        registry.register(PacketType::AnalogDataResponse, Arc::clone(&kept));

        assert!(!registry.unregister(PacketType::AnalogDataResponse, &stranger));
        assert!(!registry.unregister(PacketType::ParamResponse, &kept));
        assert_eq!(registry.len(), 1);

        dispatch(&registry, &Packet::analog_data(vec![]).unwrap());
        assert_eq!(kept_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_removes_only_that_pair() {
        let registry = HandlerRegistry::new();
        let (first, first_hits) = counter();
        let (second, second_hits) = counter();
        registry.register(PacketType::AnalogDataResponse, Arc::clone(&first));
        registry.register(PacketType::AnalogDataResponse, Arc::clone(&second));

        assert!(registry.unregister(PacketType::AnalogDataResponse, &first));
        dispatch(&registry, &Packet::analog_data(vec![5]).unwrap());

        assert_eq!(first_hits.load(Ordering::SeqCst), 0);
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_follows_registration_order() {
        let registry = HandlerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handlers = Vec::new();
        for label in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            let handler: HandlerRef = Arc::new(move |_: &Packet| order.lock().unwrap().push(label));
            registry.register(PacketType::AnalogDataResponse, Arc::clone(&handler));
            handlers.push(handler);
        }
        // Re-registering moves "a" to the back.
        registry.register(PacketType::AnalogDataResponse, Arc::clone(&handlers[0]));

        dispatch(&registry, &Packet::analog_data(vec![0]).unwrap());
        assert_eq!(*order.lock().unwrap(), vec!["b", "c", "a"]);
    }

    #[test]
    fn handlers_can_register_during_dispatch() {
        let registry = Arc::new(HandlerRegistry::new());
        let (late, late_hits) = counter();
        let reg = Arc::clone(&registry);
        let late_clone = Arc::clone(&late);
        let installer: HandlerRef = Arc::new(move |_: &Packet| {
            reg.register(PacketType::ParamResponse, Arc::clone(&late_clone));
        });
        registry.register(PacketType::ParamResponse, installer);

        let packet = Packet::request(PacketType::ParamResponse).unwrap();
        dispatch(&registry, &packet);
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);
        dispatch(&registry, &packet);
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }
}

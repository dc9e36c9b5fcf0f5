//! Change-event dispatch.
//!
//! The poll loop signals "new data available" after every validated buffer
//! swap and re-derivation pass; the [`EventDispatcher`] wakes on that
//! signal, drains the changed attributes and pushes one notification per
//! change through the [`Notifier`] collaborator. Dispatch runs on its own
//! thread so a slow notification consumer never stalls PLC polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::attr::AttrRegistry;
use crate::hooks::Notifier;
use crate::stats::StatBuffer;

/// Coalescing wake-up signal between the poll loop and the dispatcher.
///
/// Multiple notifications before the dispatcher wakes collapse into one
/// pending flag; the dispatcher never queues repeat passes.
#[derive(Debug, Default)]
pub struct NewDataSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl NewDataSignal {
    /// Creates a signal with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks new data available and wakes one waiter.
    pub fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_one();
    }

    /// Waits until new data is signalled or `timeout` passes.
    ///
    /// Returns `true` when data was signalled; the pending flag is consumed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if !*pending {
            self.cond.wait_for(&mut pending, timeout);
        }
        std::mem::take(&mut *pending)
    }
}

/// How long the dispatcher sleeps between shutdown checks when idle.
const WAIT_SLICE: Duration = Duration::from_millis(500);

/// Drains changed attributes and emits notifications.
///
/// One pass per wake-up; passes never overlap because they all run on the
/// dispatcher's single thread. The wall-clock cost and event count of each
/// pass feed two [`StatBuffer`]s for self-observability.
pub struct EventDispatcher {
    registry: Arc<Mutex<AttrRegistry>>,
    signal: Arc<NewDataSignal>,
    notifier: Arc<dyn Notifier>,
    shutdown: Arc<AtomicBool>,
    latency: StatBuffer,
    volume: StatBuffer,
}

impl EventDispatcher {
    /// Creates a dispatcher over a shared registry.
    pub fn new(
        registry: Arc<Mutex<AttrRegistry>>,
        signal: Arc<NewDataSignal>,
        notifier: Arc<dyn Notifier>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            signal,
            notifier,
            shutdown,
            latency: StatBuffer::with_default_capacity(),
            volume: StatBuffer::with_default_capacity(),
        }
    }

    /// Runs the dispatch loop until the shutdown flag is raised.
    pub fn run(mut self) {
        debug!("event dispatcher started");
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            if self.signal.wait(WAIT_SLICE) {
                self.dispatch_pass();
            }
        }
        debug!("event dispatcher stopped");
    }

    /// One drain-and-notify pass.
    ///
    /// Events are collected under the registry lock and emitted outside it,
    /// so a slow notifier never blocks attribute reads or the poll loop.
    pub fn dispatch_pass(&mut self) {
        let start = Instant::now();
        let events = self.registry.lock().take_pending_events();
        for event in &events {
            self.notifier
                .notify(&event.name, &event.value, event.timestamp, event.quality);
        }
        self.latency.append(start.elapsed().as_secs_f64());
        self.volume.append(events.len() as f64);
        trace!(events = events.len(), "dispatch pass done");
    }

    /// Recent per-pass wall-clock cost, in seconds.
    pub fn latency(&self) -> &StatBuffer {
        &self.latency
    }

    /// Recent per-pass event counts.
    pub fn volume(&self) -> &StatBuffer {
        &self.volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::SystemTime;

    use crate::codec::Value;
    use crate::config::AttrSpec;
    use crate::quality::Quality;

    #[test]
    fn test_signal_roundtrip() {
        let sig = NewDataSignal::new();
        assert!(!sig.wait(Duration::from_millis(1)));
        sig.notify();
        assert!(sig.wait(Duration::from_millis(1)));
        assert!(!sig.wait(Duration::from_millis(1)), "flag is consumed");
    }

    #[test]
    fn test_signal_coalesces_repeats() {
        let sig = NewDataSignal::new();
        sig.notify();
        sig.notify();
        sig.notify();
        assert!(sig.wait(Duration::from_millis(1)));
        assert!(!sig.wait(Duration::from_millis(1)), "repeats collapse to one");
    }

    #[test]
    fn test_signal_wakes_waiting_thread() {
        let sig = Arc::new(NewDataSignal::new());
        let waiter = {
            let sig = Arc::clone(&sig);
            std::thread::spawn(move || sig.wait(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        sig.notify();
        assert!(waiter.join().unwrap());
    }

    struct RecordingNotifier(Mutex<Vec<(String, Value, Quality)>>);

    impl Notifier for RecordingNotifier {
        fn notify(&self, name: &str, value: &Value, _timestamp: SystemTime, quality: Quality) {
            self.0.lock().push((name.to_string(), value.clone(), quality));
        }
    }

    fn registry_with_pending() -> Arc<Mutex<AttrRegistry>> {
        use crate::channel::tests::MockTransport;
        use crate::channel::BlockChannel;

        let mut frame = vec![0u8; 8];
        frame[0] = 5;
        let ch =
            BlockChannel::new(Box::new(MockTransport::new(vec![frame])), 8, 2).unwrap();
        ch.readall().unwrap();
        let specs = [AttrSpec::from_json(
            r#"{ "name": "A", "type": "byte", "readAddr": 0, "events": {} }"#,
        )
        .unwrap()];
        let mut registry = AttrRegistry::build("li/ct/plc1", &specs, None);
        registry.refresh_from_plc(&ch, SystemTime::now());
        Arc::new(Mutex::new(registry))
    }

    #[test]
    fn test_dispatch_pass_notifies_and_self_observes() {
        let registry = registry_with_pending();
        let notifier = Arc::new(RecordingNotifier(Mutex::new(Vec::new())));
        let mut dispatcher = EventDispatcher::new(
            registry,
            Arc::new(NewDataSignal::new()),
            notifier.clone(),
            Arc::new(AtomicBool::new(false)),
        );

        dispatcher.dispatch_pass();
        let log = notifier.0.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, "A");
        assert_eq!(log[0].1, Value::Byte(5));
        assert_eq!(dispatcher.volume().last(), Some(1.0));
        assert_eq!(dispatcher.latency().len(), 1);
    }

    #[test]
    fn test_dispatch_pass_idles_cleanly_when_nothing_pending() {
        let registry = registry_with_pending();
        registry.lock().take_pending_events();
        let notifier = Arc::new(RecordingNotifier(Mutex::new(Vec::new())));
        let mut dispatcher = EventDispatcher::new(
            registry,
            Arc::new(NewDataSignal::new()),
            notifier.clone(),
            Arc::new(AtomicBool::new(false)),
        );
        dispatcher.dispatch_pass();
        assert!(notifier.0.lock().is_empty());
        assert_eq!(dispatcher.volume().last(), Some(0.0));
    }

    #[test]
    fn test_run_exits_on_shutdown() {
        let registry = registry_with_pending();
        let shutdown = Arc::new(AtomicBool::new(false));
        let signal = Arc::new(NewDataSignal::new());
        let dispatcher = EventDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&signal),
            Arc::new(crate::hooks::NullHooks),
            Arc::clone(&shutdown),
        );
        let handle = std::thread::spawn(move || dispatcher.run());
        shutdown.store(true, Ordering::Relaxed);
        signal.notify();
        handle.join().unwrap();
    }
}

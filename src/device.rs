//! Device front-end: one [`PlcDevice`] per PLC link.
//!
//! Construction takes a [`DeviceConfig`] and the declarative attribute map;
//! [`start`](PlcDevice::start) spawns the poll loop and the event
//! dispatcher on their own threads and [`stop`](PlcDevice::stop) winds them
//! down. Attribute reads come from the mirrored state, writes go through
//! lock arbitration to the live channel.
//!
//! # Example
//!
//! ```no_run
//! use plc_mirror::{AttrSpec, DeviceConfig, PlcDevice, Value};
//!
//! let specs = AttrSpec::map_from_json(r#"[
//!     { "name": "GUN_HV_V", "type": "float32", "readAddr": 4, "writeAddr": 0 }
//! ]"#).unwrap();
//!
//! let config = DeviceConfig::new("li/ct/plc1", "10.0.5.12", 1084, 100)
//!     .with_port(2010);
//! let mut device = PlcDevice::new(config, &specs);
//! device.start().unwrap();
//!
//! device.write("GUN_HV_V", Value::Float32(-70.0)).unwrap();
//! device.stop();
//! ```

use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::attr::AttrRegistry;
use crate::channel::BlockChannel;
use crate::codec::Value;
use crate::config::AttrSpec;
use crate::error::{PlcError, Result};
use crate::events::{EventDispatcher, NewDataSignal};
use crate::hooks::{Notifier, NullHooks, PropertyStore, StateSink};
use crate::poll::{
    AdaptivePeriod, ControlSeat, LockArbiter, LockConfig, PollScheduler, PollSettings,
};
use crate::quality::Quality;
use crate::transport::DEFAULT_PLC_PORT;

/// Static configuration of one PLC link.
///
/// Built with `with_*` methods; unset knobs keep conservative defaults.
///
/// | Knob | Default |
/// |------|---------|
/// | `port` | 2000 |
/// | `min_period` / `max_period` / `period_step` | 100 ms / 3 s / 100 ms |
/// | `alarm_after` / `fault_after` | 10 s / 60 s |
/// | `reconnect_wait` | 3 s |
/// | `seat` | local |
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device identifier, used for property-store keys and log context.
    pub device_id: String,
    /// PLC hostname or address.
    pub host: String,
    /// PLC port.
    pub port: u16,
    /// Full frame size in bytes.
    pub read_size: usize,
    /// Trailing write-region size in bytes.
    pub write_size: usize,
    /// Lower bound of the adaptive poll period.
    pub min_period: Duration,
    /// Upper bound (and starting value) of the adaptive poll period.
    pub max_period: Duration,
    /// Adaptation step of the poll period.
    pub period_step: Duration,
    /// Read silence before the device degrades to ALARM.
    pub alarm_after: Duration,
    /// Read silence before the device faults.
    pub fault_after: Duration,
    /// Wait between reconnect attempts.
    pub reconnect_wait: Duration,
    /// Control seat of this instance.
    pub seat: ControlSeat,
    /// Write-lock bit addresses; `None` disables arbitration.
    pub lock: Option<LockConfig>,
    /// Checker table entries, address to allowed byte values.
    pub checkers: Vec<(usize, Vec<u8>)>,
}

impl DeviceConfig {
    /// Creates a configuration with the defaults listed above.
    pub fn new(
        device_id: impl Into<String>,
        host: impl Into<String>,
        read_size: usize,
        write_size: usize,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            host: host.into(),
            port: DEFAULT_PLC_PORT,
            read_size,
            write_size,
            min_period: Duration::from_millis(100),
            max_period: Duration::from_secs(3),
            period_step: Duration::from_millis(100),
            alarm_after: Duration::from_secs(10),
            fault_after: Duration::from_secs(60),
            reconnect_wait: Duration::from_secs(3),
            seat: ControlSeat::Local,
            lock: None,
            checkers: Vec::new(),
        }
    }

    /// Sets the PLC port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the adaptive poll period bounds and step.
    pub fn with_period(mut self, min: Duration, max: Duration, step: Duration) -> Self {
        self.min_period = min;
        self.max_period = max;
        self.period_step = step;
        self
    }

    /// Sets the ALARM and FAULT read-silence thresholds.
    pub fn with_timeouts(mut self, alarm_after: Duration, fault_after: Duration) -> Self {
        self.alarm_after = alarm_after;
        self.fault_after = fault_after;
        self
    }

    /// Sets the wait between reconnect attempts.
    pub fn with_reconnect_wait(mut self, wait: Duration) -> Self {
        self.reconnect_wait = wait;
        self
    }

    /// Sets the control seat.
    pub fn with_seat(mut self, seat: ControlSeat) -> Self {
        self.seat = seat;
        self
    }

    /// Enables write-lock arbitration over the given bit addresses.
    ///
    /// The lock-status byte is also registered in the checker table with
    /// the two values the PLC is allowed to report there.
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.checkers
            .push((lock.status_addr, vec![0, 1 << lock.status_bit]));
        self.lock = Some(lock);
        self
    }

    /// Adds one checker table entry.
    pub fn with_checker(mut self, addr: usize, allowed: Vec<u8>) -> Self {
        self.checkers.push((addr, allowed));
        self
    }
}

/// External collaborators of one device.
///
/// All default to [`NullHooks`]; production wiring points them at the
/// control framework's event push, property database and state machine.
#[derive(Clone)]
pub struct DeviceHooks {
    /// Change-notification push.
    pub notifier: Arc<dyn Notifier>,
    /// Memorized-attribute persistence.
    pub store: Arc<dyn PropertyStore>,
    /// Device state/status sink.
    pub state_sink: Arc<dyn StateSink>,
}

impl Default for DeviceHooks {
    fn default() -> Self {
        let null = Arc::new(NullHooks);
        Self {
            notifier: null.clone(),
            store: null.clone(),
            state_sink: null,
        }
    }
}

/// One PLC link: mirrored memory, attribute registry and the two loops.
pub struct PlcDevice {
    config: DeviceConfig,
    registry: Arc<Mutex<AttrRegistry>>,
    channel: Arc<RwLock<Option<Arc<BlockChannel>>>>,
    signal: Arc<NewDataSignal>,
    shutdown: Arc<AtomicBool>,
    hooks: DeviceHooks,
    arbiter: LockArbiter,
    poll_handle: Option<JoinHandle<()>>,
    dispatch_handle: Option<JoinHandle<()>>,
}

impl PlcDevice {
    /// Creates a device with null collaborators.
    pub fn new(config: DeviceConfig, specs: &[AttrSpec]) -> Self {
        Self::with_hooks(config, specs, DeviceHooks::default())
    }

    /// Creates a device wired to external collaborators.
    pub fn with_hooks(config: DeviceConfig, specs: &[AttrSpec], hooks: DeviceHooks) -> Self {
        let registry = AttrRegistry::build(
            config.device_id.clone(),
            specs,
            Some(Arc::clone(&hooks.store)),
        );
        let arbiter = LockArbiter::new(config.seat, config.lock);
        Self {
            config,
            registry: Arc::new(Mutex::new(registry)),
            channel: Arc::new(RwLock::new(None)),
            signal: Arc::new(NewDataSignal::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            hooks,
            arbiter,
            poll_handle: None,
            dispatch_handle: None,
        }
    }

    /// Spawns the poll loop and the event dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::InvalidConfig` when the period bounds are
    /// inconsistent. Connection failures do not fail `start`; the poll loop
    /// retries them.
    pub fn start(&mut self) -> Result<()> {
        if self.poll_handle.is_some() {
            return Ok(());
        }
        self.shutdown.store(false, Ordering::Relaxed);

        let settings = PollSettings {
            period: AdaptivePeriod::new(
                self.config.min_period,
                self.config.max_period,
                self.config.period_step,
            )?,
            alarm_after: self.config.alarm_after,
            fault_after: self.config.fault_after,
            reconnect_wait: self.config.reconnect_wait,
        };

        let connect = {
            let host = self.config.host.clone();
            let port = self.config.port;
            let read_size = self.config.read_size;
            let write_size = self.config.write_size;
            let checkers = self.config.checkers.clone();
            Box::new(move || {
                let addr = (host.as_str(), port)
                    .to_socket_addrs()
                    .map_err(|e| PlcError::connection(format!("resolve {host}:{port}: {e}")))?
                    .next()
                    .ok_or_else(|| {
                        PlcError::connection(format!("{host}:{port} resolves to nothing"))
                    })?;
                let channel = BlockChannel::connect(addr, read_size, write_size)?;
                for (checked, allowed) in &checkers {
                    channel.set_checker(*checked, allowed.clone());
                }
                Ok(channel)
            })
        };

        let scheduler = PollScheduler::new(
            Arc::clone(&self.channel),
            Arc::clone(&self.registry),
            Arc::clone(&self.signal),
            Arc::clone(&self.hooks.state_sink),
            Arc::clone(&self.shutdown),
            self.arbiter.clone(),
            settings,
            connect,
        );
        let dispatcher = EventDispatcher::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.signal),
            Arc::clone(&self.hooks.notifier),
            Arc::clone(&self.shutdown),
        );

        info!(device = self.config.device_id.as_str(), "starting");
        self.poll_handle = Some(
            std::thread::Builder::new()
                .name(format!("{}-poll", self.config.device_id))
                .spawn(move || scheduler.run())
                .map_err(PlcError::Io)?,
        );
        self.dispatch_handle = Some(
            std::thread::Builder::new()
                .name(format!("{}-events", self.config.device_id))
                .spawn(move || dispatcher.run())
                .map_err(PlcError::Io)?,
        );
        Ok(())
    }

    /// Stops both loops and waits for them to exit.
    ///
    /// An in-flight block transfer completes or times out first.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.signal.notify();
        if let Some(handle) = self.poll_handle.take() {
            if handle.join().is_err() {
                warn!("poll thread panicked");
            }
        }
        if let Some(handle) = self.dispatch_handle.take() {
            if handle.join().is_err() {
                warn!("dispatch thread panicked");
            }
        }
        *self.channel.write() = None;
        info!(device = self.config.device_id.as_str(), "stopped");
    }

    /// Whether the loops are running.
    pub fn is_running(&self) -> bool {
        self.poll_handle.is_some()
    }

    /// Whether a live channel is currently up.
    pub fn is_connected(&self) -> bool {
        self.channel.read().is_some()
    }

    /// Reads an attribute's mirrored value, timestamp and quality.
    pub fn read(&self, name: &str) -> Result<(Value, SystemTime, Quality)> {
        self.registry.lock().read(name)
    }

    /// Writes a value to an attribute on the live channel.
    ///
    /// # Errors
    ///
    /// - `PlcError::Connection` when no channel is up
    /// - `PlcError::WriteNotPermitted` when the write lock is not held
    /// - `PlcError::WriteRejected` on a guard or range veto
    pub fn write(&self, name: &str, value: Value) -> Result<()> {
        let channel = self
            .channel
            .read()
            .clone()
            .ok_or_else(|| PlcError::connection("no plc link up"))?;
        let permitted = self.arbiter.holds_lock(&channel)?;
        self.registry.lock().write(name, value, &channel, permitted)
    }

    /// Shared handle to the attribute registry, for enumeration and
    /// auto-stop management.
    pub fn registry(&self) -> Arc<Mutex<AttrRegistry>> {
        Arc::clone(&self.registry)
    }

    /// The device identifier.
    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }
}

impl Drop for PlcDevice {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write as _;
    use std::net::TcpListener;

    use crate::poll::DeviceState;

    fn test_config(read: usize, write: usize) -> DeviceConfig {
        DeviceConfig::new("li/ct/plc1", "127.0.0.1", read, write)
            .with_period(
                Duration::from_millis(10),
                Duration::from_millis(50),
                Duration::from_millis(10),
            )
            .with_timeouts(Duration::from_millis(200), Duration::from_secs(1))
            .with_reconnect_wait(Duration::from_millis(20))
    }

    #[test]
    fn test_config_defaults() {
        let config = DeviceConfig::new("li/ct/plc1", "10.0.5.12", 1084, 100);
        assert_eq!(config.port, DEFAULT_PLC_PORT);
        assert_eq!(config.max_period, Duration::from_secs(3));
        assert_eq!(config.seat, ControlSeat::Local);
        assert!(config.lock.is_none());
    }

    #[test]
    fn test_with_lock_registers_status_checker() {
        let config = DeviceConfig::new("li/ct/plc1", "h", 16, 4).with_lock(LockConfig {
            status_addr: 3,
            status_bit: 2,
            request_addr: 1,
            request_bit: 0,
        });
        assert_eq!(config.checkers, vec![(3, vec![0, 0b100])]);
    }

    #[test]
    fn test_write_without_link_fails() {
        let specs = [AttrSpec::from_json(
            r#"{ "name": "SP", "type": "byte", "readAddr": 4, "writeAddr": 0 }"#,
        )
        .unwrap()];
        let device = PlcDevice::new(test_config(8, 4), &specs);
        assert!(matches!(
            device.write("SP", Value::Byte(1)),
            Err(PlcError::Connection { .. })
        ));
    }

    #[test]
    fn test_start_is_idempotent_and_stop_joins() {
        let mut device = PlcDevice::new(test_config(8, 2), &[]);
        device.start().unwrap();
        device.start().unwrap();
        assert!(device.is_running());
        device.stop();
        assert!(!device.is_running());
    }

    /// Fake PLC: accepts one connection and pushes the same frame forever.
    fn fake_plc(frame: Vec<u8>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut peer, _)) = listener.accept() {
                for _ in 0..200 {
                    if peer.write_all(&frame).is_err() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        });
        addr
    }

    #[test]
    fn test_device_polls_a_fake_plc_end_to_end() {
        let mut frame = vec![0u8; 8];
        frame[0] = 0x2A;
        let addr = fake_plc(frame);

        let specs = [AttrSpec::from_json(
            r#"{ "name": "Counter", "type": "byte", "readAddr": 0, "events": {} }"#,
        )
        .unwrap()];
        let config = test_config(8, 2).with_port(addr.port());

        struct LastState(Mutex<Option<DeviceState>>);
        impl StateSink for LastState {
            fn set_state(&self, state: DeviceState) {
                *self.0.lock() = Some(state);
            }
            fn set_status(&self, _status: &str) {}
        }
        let state = Arc::new(LastState(Mutex::new(None)));
        let hooks = DeviceHooks {
            state_sink: state.clone(),
            ..DeviceHooks::default()
        };

        let mut device = PlcDevice::with_hooks(config, &specs, hooks);
        device.start().unwrap();

        // Wait for the first validated poll to land.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let (value, _, quality) = device.read("Counter").unwrap();
            if value == Value::Byte(0x2A) && quality == Quality::Valid {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "poll never delivered the frame"
            );
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(device.is_connected());
        assert_eq!(*state.0.lock(), Some(DeviceState::On));
        device.stop();
    }
}

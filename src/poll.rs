//! Poll scheduling and control-lock arbitration.
//!
//! One [`PollScheduler`] per PLC link drives the whole read side: it keeps
//! the connection alive, fetches the mirrored frame on an adaptive period,
//! re-derives the attribute registry and signals the event dispatcher.
//! Timeout escalation moves the device through ON, ALARM and FAULT, and a
//! small per-cycle arbitration keeps the local control seat from being
//! starved of the write lock by a stale remote session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::attr::AttrRegistry;
use crate::channel::BlockChannel;
use crate::error::{PlcError, Result};
use crate::events::NewDataSignal;
use crate::hooks::StateSink;

/// Connection-level state of one PLC link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No socket; reconnect pending.
    Disconnected,
    /// Connection attempt in flight.
    Connecting,
    /// Polling normally.
    On,
    /// Reads are timing out but the link is still being retried.
    Alarm,
    /// Timeouts escalated past the fault threshold; link torn down.
    Fault,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DeviceState::Disconnected => "DISCONNECTED",
            DeviceState::Connecting => "CONNECTING",
            DeviceState::On => "ON",
            DeviceState::Alarm => "ALARM",
            DeviceState::Fault => "FAULT",
        })
    }
}

/// Poll period that tracks the link's actual cycle cost.
///
/// Starts at the configured maximum; cycles that overrun the current period
/// push it up one step (capped at the maximum), cycles that finish well
/// under pull it back down toward the minimum. This bounds polling load on
/// slow links while keeping latency low on fast ones.
#[derive(Debug, Clone)]
pub struct AdaptivePeriod {
    current: Duration,
    min: Duration,
    max: Duration,
    step: Duration,
}

impl AdaptivePeriod {
    /// Creates a period starting at `max`.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::InvalidConfig` when `min > max` or the step is
    /// zero.
    pub fn new(min: Duration, max: Duration, step: Duration) -> Result<Self> {
        if min > max {
            return Err(PlcError::invalid_config(format!(
                "period minimum {min:?} exceeds maximum {max:?}"
            )));
        }
        if step.is_zero() {
            return Err(PlcError::invalid_config("period step must be non-zero"));
        }
        Ok(Self {
            current: max,
            min,
            max,
            step,
        })
    }

    /// The period the next cycle should use.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Feeds one cycle's wall-clock cost into the adaptation.
    ///
    /// Returns `true` when the cycle overran with the period already at its
    /// cap, which the caller should surface as an error condition.
    pub fn account(&mut self, cycle: Duration) -> bool {
        if cycle > self.current {
            let at_cap = self.current >= self.max;
            self.current = (self.current + self.step).min(self.max);
            return at_cap;
        }
        // Well under: shrink toward the minimum one step at a time.
        if cycle * 2 < self.current {
            self.current = self.current.saturating_sub(self.step).max(self.min);
        }
        false
    }
}

/// Which console currently owns this device instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSeat {
    /// Control-room console; entitled to reclaim the write lock.
    Local,
    /// Remote session; never forces the lock.
    Remote,
}

/// Addresses of the write-lock bits in the frame.
#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    /// Frame offset of the lock-status byte (read region).
    pub status_addr: usize,
    /// Bit of the status byte that is set while we hold the lock.
    pub status_bit: u8,
    /// Write-region offset of the lock-request byte.
    pub request_addr: usize,
    /// Bit of the request byte that claims the lock.
    pub request_bit: u8,
}

/// Per-cycle write-lock arbitration.
///
/// A local seat that does not hold the lock claims it by raising the
/// request bit, waiting one poll period and re-reading; a remote seat only
/// ever observes. Links without a lock map treat every write as permitted.
#[derive(Debug, Clone)]
pub struct LockArbiter {
    seat: ControlSeat,
    config: Option<LockConfig>,
}

impl LockArbiter {
    /// Creates an arbiter; `config = None` disables arbitration.
    pub fn new(seat: ControlSeat, config: Option<LockConfig>) -> Self {
        Self { seat, config }
    }

    /// The configured control seat.
    pub fn seat(&self) -> ControlSeat {
        self.seat
    }

    /// Whether we currently hold the write lock.
    pub fn holds_lock(&self, channel: &BlockChannel) -> Result<bool> {
        match &self.config {
            None => Ok(true),
            Some(c) => channel.bit(c.status_addr, c.status_bit),
        }
    }

    /// Re-evaluates the lock, claiming it for a local seat if lost.
    ///
    /// The claim raises the request bit, waits one poll period for the PLC
    /// to grant it, then re-fetches the frame and re-reads the status bit.
    pub fn ensure(&self, channel: &BlockChannel, period: Duration) -> Result<bool> {
        let Some(config) = &self.config else {
            return Ok(true);
        };
        if self.holds_lock(channel)? {
            return Ok(true);
        }
        if self.seat == ControlSeat::Remote {
            return Ok(false);
        }
        info!("local seat lost the write lock, requesting it back");
        channel.write_bit(config.request_addr, config.request_bit, true, false)?;
        std::thread::sleep(period);
        channel.readall()?;
        let held = self.holds_lock(channel)?;
        if !held {
            warn!("lock request not granted within one period");
        }
        Ok(held)
    }
}

/// Escalation thresholds and period bounds of one poll loop.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Adaptive poll period.
    pub period: AdaptivePeriod,
    /// Read silence before the device degrades to ALARM.
    pub alarm_after: Duration,
    /// Read silence before the device faults and tears the link down.
    pub fault_after: Duration,
    /// Wait before a reconnect attempt.
    pub reconnect_wait: Duration,
}

/// Connection factory used by the poll loop on every (re)connect.
pub type Connector = dyn Fn() -> Result<BlockChannel> + Send;

/// The poll loop of one PLC link.
///
/// Owns the connection lifecycle; the channel slot is shared with the
/// device front-end so attribute writes go to the live channel.
pub struct PollScheduler {
    channel: Arc<RwLock<Option<Arc<BlockChannel>>>>,
    registry: Arc<Mutex<AttrRegistry>>,
    signal: Arc<NewDataSignal>,
    state_sink: Arc<dyn StateSink>,
    shutdown: Arc<AtomicBool>,
    arbiter: LockArbiter,
    settings: PollSettings,
    connect: Box<Connector>,
    state: DeviceState,
    last_good: Option<Instant>,
}

impl PollScheduler {
    /// Creates a scheduler; nothing runs until [`run`](Self::run).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: Arc<RwLock<Option<Arc<BlockChannel>>>>,
        registry: Arc<Mutex<AttrRegistry>>,
        signal: Arc<NewDataSignal>,
        state_sink: Arc<dyn StateSink>,
        shutdown: Arc<AtomicBool>,
        arbiter: LockArbiter,
        settings: PollSettings,
        connect: Box<Connector>,
    ) -> Self {
        Self {
            channel,
            registry,
            signal,
            state_sink,
            shutdown,
            arbiter,
            settings,
            connect,
            state: DeviceState::Disconnected,
            last_good: None,
        }
    }

    /// Runs the poll loop until the shutdown flag is raised.
    ///
    /// Shutdown is checked at the top of every iteration; an in-flight
    /// block transfer completes or times out before the loop exits.
    pub fn run(mut self) {
        debug!("poll loop started");
        while !self.shutdown.load(Ordering::Relaxed) {
            let Some(channel) = self.current_channel() else {
                if !self.reconnect() {
                    self.sleep(self.settings.reconnect_wait);
                }
                continue;
            };

            let started = Instant::now();
            self.cycle(&channel);
            let cycle = started.elapsed();
            if self.settings.period.account(cycle) {
                error!(
                    cycle_ms = cycle.as_millis() as u64,
                    "cycle overruns the maximum poll period"
                );
                self.status(&format!(
                    "poll cycle {}ms exceeds the maximum period",
                    cycle.as_millis()
                ));
            }
            self.sleep(self.settings.period.current().saturating_sub(cycle));
        }
        debug!("poll loop stopped");
    }

    fn current_channel(&self) -> Option<Arc<BlockChannel>> {
        self.channel.read().clone()
    }

    /// One connection attempt; returns whether the link came up.
    fn reconnect(&mut self) -> bool {
        self.transition(DeviceState::Connecting);
        match (self.connect)() {
            Ok(channel) => {
                let channel = Arc::new(channel);
                // Restore the PLC's write region from our cached setpoints;
                // a freshly booted PLC otherwise runs on stale values.
                if let Err(e) = self.registry.lock().force_full_write(&channel) {
                    warn!(error = %e, "setpoint restore after reconnect failed");
                }
                *self.channel.write() = Some(channel);
                self.last_good = Some(Instant::now());
                self.transition(DeviceState::On);
                self.status("connected");
                true
            }
            Err(e) => {
                info!(error = %e, "connect failed");
                self.transition(DeviceState::Disconnected);
                self.status(&format!("connect failed: {e}"));
                false
            }
        }
    }

    /// One poll cycle over a live channel: arbitration, fetch, re-derive,
    /// safety commands, signal.
    pub(crate) fn cycle(&mut self, channel: &Arc<BlockChannel>) {
        match self.arbiter.ensure(channel, self.settings.period.current()) {
            Ok(_) => {}
            Err(e) => warn!(error = %e, "lock arbitration failed"),
        }

        match channel.readall() {
            Ok(()) => {
                self.last_good = Some(Instant::now());
                let commands = {
                    let mut registry = self.registry.lock();
                    let commands = registry.refresh_from_plc(channel, SystemTime::now());
                    for command in &commands {
                        warn!(attr = command.attr.as_str(), "auto-stop switching off");
                        if let Err(e) =
                            registry.write(&command.attr, command.value.clone(), channel, true)
                        {
                            error!(attr = command.attr.as_str(), error = %e, "auto-stop write failed");
                        }
                    }
                    commands
                };
                for command in commands {
                    self.status(&format!("auto-stop switched {} off", command.attr));
                }
                if self.state != DeviceState::On {
                    self.transition(DeviceState::On);
                    self.status("reads recovered");
                }
                self.signal.notify();
            }
            Err(e) => self.classify_read_failure(e),
        }
    }

    /// Escalates a failed fetch: transport drops tear the link down at once,
    /// timeouts and desyncs escalate ON -> ALARM -> FAULT with the silence
    /// measured since the last good read.
    fn classify_read_failure(&mut self, e: PlcError) {
        let dropped = e.is_transport() && !matches!(e, PlcError::Timeout);
        if dropped {
            warn!(error = %e, "transport dropped");
            self.disconnect(DeviceState::Disconnected, &format!("link lost: {e}"));
            return;
        }
        let silence = self
            .last_good
            .map(|t| t.elapsed())
            .unwrap_or(self.settings.fault_after);
        if silence >= self.settings.fault_after {
            error!(error = %e, silence_ms = silence.as_millis() as u64, "read silence past fault threshold");
            self.disconnect(DeviceState::Fault, &format!("faulted: {e}"));
        } else if silence >= self.settings.alarm_after {
            warn!(error = %e, silence_ms = silence.as_millis() as u64, "read silence past alarm threshold");
            self.transition(DeviceState::Alarm);
            self.status(&format!("reads timing out: {e}"));
        } else {
            debug!(error = %e, "read failed, retrying");
        }
    }

    fn disconnect(&mut self, state: DeviceState, status: &str) {
        *self.channel.write() = None;
        self.transition(state);
        self.status(status);
    }

    fn transition(&mut self, state: DeviceState) {
        if self.state != state {
            info!(from = %self.state, to = %state, "device state");
            self.state = state;
            self.state_sink.set_state(state);
        }
    }

    fn status(&self, status: &str) {
        self.state_sink.set_status(status);
    }

    /// Sleeps in slices so shutdown stays responsive.
    fn sleep(&self, total: Duration) {
        const SLICE: Duration = Duration::from_millis(100);
        let deadline = Instant::now() + total;
        while Instant::now() < deadline {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(SLICE.min(deadline.saturating_duration_since(Instant::now())));
        }
    }
}

//! Safety auto-stop monitor.
//!
//! Some power supplies must be cut off automatically when their readback
//! drifts out of bounds — a klystron HV supply whose current collapses, a
//! filament overdriving. An [`AutoStopMonitor`] integrates the readback into
//! a statistics window and, when the windowed mean breaches the configured
//! bound while the associated switch is on, commands the switch off and
//! latches a triggered flag.
//!
//! State machine:
//!
//! ```text
//! DISABLED --enable--> ARMED --mean breach (window full, switch on)--> TRIGGERED
//!    ^                   ^                                                 |
//!    |                   +---- reset, or switch off->on transition --------+
//!    +-- disable (clears window and flag) from any state
//! ```
//!
//! Collection only runs while the switch reads on; a switch that drops out
//! stops collection but keeps the accumulated samples as evidence for
//! diagnosis.

use tracing::{info, warn};

use crate::stats::StatBuffer;

/// Outcome of feeding one readback sample into the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoStopEvent {
    /// Nothing to act on.
    None,
    /// Bound breached: the switch attribute must be commanded off.
    Trigger,
}

/// Auto-stop monitor over one readback attribute.
#[derive(Debug, Clone)]
pub struct AutoStopMonitor {
    enabled: bool,
    triggered: bool,
    below: Option<f64>,
    above: Option<f64>,
    buffer: StatBuffer,
    switch_attr: String,
    last_switch_on: bool,
}

impl AutoStopMonitor {
    /// Creates a disabled monitor.
    ///
    /// `integration` is the window length in samples; `below`/`above` are
    /// the mean bounds; `switch_attr` names the attribute gating collection
    /// and receiving the off command on trigger.
    pub fn new(
        integration: usize,
        below: Option<f64>,
        above: Option<f64>,
        switch_attr: impl Into<String>,
    ) -> Self {
        Self {
            enabled: false,
            triggered: false,
            below,
            above,
            buffer: StatBuffer::new(integration),
            switch_attr: switch_attr.into(),
            last_switch_on: false,
        }
    }

    /// Name of the gated switch attribute.
    pub fn switch_attr(&self) -> &str {
        &self.switch_attr
    }

    /// Returns whether the monitor is armed.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns whether the monitor has latched a trigger.
    pub fn triggered(&self) -> bool {
        self.triggered
    }

    /// Returns the integration window.
    pub fn buffer(&self) -> &StatBuffer {
        &self.buffer
    }

    /// Lower mean bound, if configured.
    pub fn below(&self) -> Option<f64> {
        self.below
    }

    /// Upper mean bound, if configured.
    pub fn above(&self) -> Option<f64> {
        self.above
    }

    /// Arms the monitor: clears the latch and starts collecting.
    pub fn enable(&mut self) {
        self.enabled = true;
        self.triggered = false;
        self.buffer.clear();
    }

    /// Disarms the monitor, clearing the window and the latch.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.triggered = false;
        self.buffer.clear();
    }

    /// Clears the latch without touching the window.
    pub fn reset(&mut self) {
        self.triggered = false;
    }

    /// Changes the integration window length.
    pub fn set_integration(&mut self, samples: usize) {
        self.buffer.resize(samples);
    }

    /// Feeds one readback sample with the current switch state.
    ///
    /// Collection runs only while the switch is on; a switch dropping out
    /// keeps the existing samples. A switch turning back on after an off
    /// period clears the latch and the stale window. Returns
    /// [`AutoStopEvent::Trigger`] exactly once per breach.
    pub fn integrate(&mut self, readback: f64, switch_on: bool) -> AutoStopEvent {
        if switch_on && !self.last_switch_on {
            // Off-to-on transition: stale evidence and latch are dropped.
            self.triggered = false;
            self.buffer.clear();
        }
        self.last_switch_on = switch_on;

        if !self.enabled || self.triggered || !switch_on {
            return AutoStopEvent::None;
        }

        self.buffer.append(readback);
        if !self.buffer.is_full() {
            return AutoStopEvent::None;
        }

        let Some(mean) = self.buffer.mean() else {
            return AutoStopEvent::None;
        };
        let breach = self.below.is_some_and(|b| mean < b)
            || self.above.is_some_and(|a| mean > a);
        if breach {
            self.triggered = true;
            warn!(
                switch = self.switch_attr.as_str(),
                mean, "auto-stop bound breached, commanding switch off"
            );
            return AutoStopEvent::Trigger;
        }
        AutoStopEvent::None
    }

    /// Logs the enable transition driven from the configuration surface.
    pub fn set_enabled(&mut self, on: bool) {
        if on == self.enabled {
            return;
        }
        if on {
            info!(switch = self.switch_attr.as_str(), "auto-stop armed");
            self.enable();
        } else {
            info!(switch = self.switch_attr.as_str(), "auto-stop disarmed");
            self.disable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed_monitor() -> AutoStopMonitor {
        let mut m = AutoStopMonitor::new(3, Some(0.02), None, "gun_hv_onc");
        m.enable();
        m
    }

    #[test]
    fn test_disabled_collects_nothing() {
        let mut m = AutoStopMonitor::new(3, Some(0.02), None, "sw");
        assert_eq!(m.integrate(0.0, true), AutoStopEvent::None);
        assert!(m.buffer().is_empty());
        assert!(!m.triggered());
    }

    #[test]
    fn test_trigger_on_mean_below_bound() {
        let mut m = armed_monitor();
        assert_eq!(m.integrate(0.001, true), AutoStopEvent::None);
        assert_eq!(m.integrate(0.001, true), AutoStopEvent::None);
        // Third sample fills the window; mean is under 0.02.
        assert_eq!(m.integrate(0.001, true), AutoStopEvent::Trigger);
        assert!(m.triggered());
        // Latched: no repeat trigger.
        assert_eq!(m.integrate(0.001, true), AutoStopEvent::None);
    }

    #[test]
    fn test_no_trigger_before_window_full() {
        let mut m = armed_monitor();
        assert_eq!(m.integrate(0.0, true), AutoStopEvent::None);
        assert_eq!(m.integrate(0.0, true), AutoStopEvent::None);
        assert!(!m.triggered());
    }

    #[test]
    fn test_healthy_mean_never_triggers() {
        let mut m = armed_monitor();
        for _ in 0..10 {
            assert_eq!(m.integrate(0.5, true), AutoStopEvent::None);
        }
        assert!(!m.triggered());
    }

    #[test]
    fn test_switch_off_pauses_but_preserves_evidence() {
        let mut m = armed_monitor();
        m.integrate(0.001, true);
        m.integrate(0.001, true);
        // Switch drops: collection stops, samples stay for diagnosis.
        assert_eq!(m.integrate(0.001, false), AutoStopEvent::None);
        assert_eq!(m.buffer().len(), 2);
    }

    #[test]
    fn test_switch_on_transition_clears_latch() {
        let mut m = armed_monitor();
        for _ in 0..3 {
            m.integrate(0.001, true);
        }
        assert!(m.triggered());

        m.integrate(0.0, false); // external switch-off lands
        assert!(m.triggered());
        m.integrate(0.5, true); // operator re-enables the supply
        assert!(!m.triggered());
        assert_eq!(m.buffer().len(), 1);
    }

    #[test]
    fn test_disable_clears_everything() {
        let mut m = armed_monitor();
        for _ in 0..3 {
            m.integrate(0.001, true);
        }
        m.disable();
        assert!(!m.triggered());
        assert!(m.buffer().is_empty());
        assert!(!m.enabled());
    }

    #[test]
    fn test_above_bound() {
        let mut m = AutoStopMonitor::new(2, None, Some(10.0), "sw");
        m.enable();
        assert_eq!(m.integrate(11.0, true), AutoStopEvent::None);
        assert_eq!(m.integrate(12.0, true), AutoStopEvent::Trigger);
    }

    #[test]
    fn test_resize_window() {
        let mut m = armed_monitor();
        m.set_integration(5);
        assert_eq!(m.buffer().capacity(), 5);
    }

    #[test]
    fn test_explicit_reset() {
        let mut m = armed_monitor();
        for _ in 0..3 {
            m.integrate(0.001, true);
        }
        assert!(m.triggered());
        m.reset();
        assert!(!m.triggered());
    }
}

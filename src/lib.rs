//! # PLC Memory-Mirror Bridge
//!
//! A Rust library bridging injector-control PLCs to a control framework
//! over a block-transfer protocol: one TCP stream per PLC, the PLC's memory
//! mirrored locally as a validated byte buffer, and typed attributes
//! layered on top with quality classification, change events, statistics
//! and a safety auto-stop.
//!
//! The crate runs **two loops per PLC link**: a poll loop that keeps the
//! mirror fresh on an adaptive period, and an event dispatcher that pushes
//! change notifications. Everything else - typed gets, formula evaluation,
//! quality bands, dependency propagation - happens against the mirror, so
//! attribute reads never wait on the wire.
//!
//! ## Features
//!
//! - **Mirrored memory** — readers always see the last fully-validated
//!   frame, never a partial receive
//! - **Typed attributes** — bool/byte/int16/float32/string registers,
//!   derived logic, bit groups and enumerations, built from a declarative
//!   JSON map
//! - **Quality engine** — VALID/CHANGING/WARNING/ALARM from discrete
//!   tables, absolute bands and standard-deviation rules
//! - **Safety auto-stop** — integrates a readback window and commands the
//!   associated switch off when its mean breaches a bound
//! - **Lock arbitration** — the local console reclaims the write lock from
//!   stale remote sessions every poll cycle
//! - **No panics** — all errors returned as [`Result<T, PlcError>`](Result)
//!
//! ## Quick Start
//!
//! ```no_run
//! use plc_mirror::{AttrSpec, DeviceConfig, PlcDevice, Value};
//!
//! fn main() -> plc_mirror::Result<()> {
//!     let specs = AttrSpec::map_from_json(r#"[
//!         { "name": "GUN_HV_V", "type": "float32", "readAddr": 4, "writeAddr": 0,
//!           "min": -90.0, "max": 0.0 },
//!         { "name": "GUN_READY", "type": "bool", "readAddr": 10, "readBit": 3 }
//!     ]"#)?;
//!
//!     // 1084-byte frame, trailing 100 bytes mirrored back as the write region.
//!     let config = DeviceConfig::new("li/ct/plc1", "10.0.5.12", 1084, 100);
//!     let mut device = PlcDevice::new(config, &specs);
//!     device.start()?;
//!
//!     device.write("GUN_HV_V", Value::Float32(-70.0))?;
//!     let (value, _timestamp, quality) = device.read("GUN_READY")?;
//!     println!("GUN_READY = {value} ({quality})");
//!
//!     device.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Wire Protocol
//!
//! PLC → host: exactly `readSize` bytes per frame, two regions fetched
//! together; the trailing `writeSize` bytes mirror the host's write region.
//! Host → PLC: exactly `writeSize` bytes per send — a modified byte or bit
//! is always folded into a full resend of the write region, never sent
//! partially. Scalars are big-endian; frames that arrive region-swapped
//! are detected via the checker table and corrected in place.
//!
//! | Scalar | Width | Encoding |
//! |--------|-------|----------|
//! | `bool` | 1 bit | bit of a byte |
//! | `byte` | 1     | as-is |
//! | `int16` | 2    | big-endian |
//! | `float32` | 4  | big-endian IEEE 754 |
//! | `str` | fixed  | ASCII, NUL-padded |
//!
//! ## Attribute Map
//!
//! Attributes are declared as data, not code (see [`config`]):
//!
//! ```
//! use plc_mirror::AttrSpec;
//!
//! let spec = AttrSpec::from_json(r#"{
//!     "name": "GUN_HV_I",
//!     "type": "float32",
//!     "readAddr": 24,
//!     "unit": "mA",
//!     "events": { "threshold": 0.005 },
//!     "qualities": { "warning": { "absolute": { "below": 0.0, "above": 90.0 } } },
//!     "statistics": 10,
//!     "autostop": { "below": 0.02, "integration": 10, "switchAttr": "GUN_HV_ONC" }
//! }"#).unwrap();
//! assert_eq!(spec.name, "GUN_HV_I");
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, PlcError>`](Result). Transport errors
//! are recovered by the poll loop's reconnect logic and surfaced as device
//! state; attribute-level errors stay isolated to the one attribute.
//!
//! ```no_run
//! use plc_mirror::{PlcError, PlcDevice, Value};
//! # fn demo(device: &PlcDevice) {
//! match device.write("GUN_HV_ONC", Value::Bool(true)) {
//!     Ok(()) => println!("switched on"),
//!     Err(PlcError::WriteNotPermitted { reason }) => println!("locked out: {reason}"),
//!     Err(PlcError::WriteRejected { message }) => println!("vetoed: {message}"),
//!     Err(e) => println!("error: {e}"),
//! }
//! # }
//! ```
//!
//! ## Collaborators
//!
//! The device pushes into three small traits (see [`hooks`]): a
//! [`Notifier`] for change events, a [`PropertyStore`] for memorized
//! attributes and a [`StateSink`] for the ON/ALARM/FAULT state machine.
//! All three default to no-ops, so the crate runs standalone.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod attr;
mod autostop;
mod channel;
pub mod codec;
pub mod config;
mod deps;
mod device;
mod error;
mod events;
pub mod formula;
pub mod hooks;
mod poll;
mod quality;
mod stats;
pub mod transport;

// Public re-exports
pub use attr::{AttrKind, AttrRegistry, Attribute, ChangeEvent, EnumSelect, PendingCommand};
pub use autostop::{AutoStopEvent, AutoStopMonitor};
pub use channel::BlockChannel;
pub use codec::{ScalarType, Value};
pub use config::AttrSpec;
pub use deps::ChangeReporter;
pub use device::{DeviceConfig, DeviceHooks, PlcDevice};
pub use error::{PlcError, Result};
pub use events::{EventDispatcher, NewDataSignal};
pub use formula::Formula;
pub use hooks::{Notifier, NullHooks, PropertyStore, StateSink};
pub use poll::{
    AdaptivePeriod, ControlSeat, DeviceState, LockArbiter, LockConfig, PollScheduler, PollSettings,
};
pub use quality::{AbsoluteThreshold, Quality, QualityDescriptor, RelativeThreshold};
pub use stats::{HistoryBuffer, StatBuffer};
pub use transport::{TcpTransport, Transport, DEFAULT_PLC_PORT};

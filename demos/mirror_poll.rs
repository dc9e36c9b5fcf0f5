//! Example: Polling a PLC and watching attribute changes
//!
//! Run with: cargo run --example mirror_poll
//!
//! This example demonstrates:
//! - Declaring an attribute map as JSON
//! - Starting the poll loop and event dispatcher
//! - Receiving change notifications through a Notifier
//! - Writing setpoints through the lock-arbitrated path

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use plc_mirror::{
    AttrSpec, DeviceConfig, DeviceHooks, Notifier, PlcDevice, Quality, Value,
};

/// Prints every change event the dispatcher emits.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, name: &str, value: &Value, _timestamp: SystemTime, quality: Quality) {
        println!("  event: {name} = {value} [{quality}]");
    }
}

fn main() -> plc_mirror::Result<()> {
    tracing_subscriber::fmt::init();

    // =========================================================================
    // Declare the attribute map
    // =========================================================================

    let specs = AttrSpec::map_from_json(
        r#"[
        { "name": "GUN_HV_V", "type": "float32", "readAddr": 4, "writeAddr": 0,
          "label": "gun HV setpoint", "unit": "kV",
          "min": -90.0, "max": 0.0, "memorized": true,
          "events": { "threshold": 0.1 } },

        { "name": "GUN_HV_I", "type": "float32", "readAddr": 24,
          "unit": "mA", "statistics": 10,
          "events": { "threshold": 0.005 },
          "qualities": {
              "warning": { "absolute": { "below": 0.0, "above": 90.0 } }
          },
          "autostop": { "below": 0.02, "integration": 10,
                        "switchAttr": "GUN_HV_ONC" } },

        { "name": "GUN_HV_ONC", "type": "bool", "readAddr": 40, "readBit": 0,
          "writeAddr": 8, "writeBit": 0, "events": {} },

        { "name": "VACUUM_OK", "type": "bool", "readAddr": 40, "readBit": 1,
          "events": {} },

        { "name": "GUN_READY", "type": "bool", "events": {},
          "logic": { "operands": { "VACUUM_OK": [1], "GUN_HV_ONC": [1] },
                     "operator": "and" } }
    ]"#,
    )?;

    // =========================================================================
    // Configure and start the device
    // =========================================================================

    let config = DeviceConfig::new("li/ct/plc1", "10.0.5.12", 1084, 100)
        .with_period(
            Duration::from_millis(100),
            Duration::from_secs(3),
            Duration::from_millis(100),
        )
        .with_timeouts(Duration::from_secs(10), Duration::from_secs(60));

    let hooks = DeviceHooks {
        notifier: Arc::new(ConsoleNotifier),
        ..DeviceHooks::default()
    };

    let mut device = PlcDevice::with_hooks(config, &specs, hooks);
    device.start()?;
    println!("polling {} ...", device.device_id());

    // =========================================================================
    // Read and write while the loops run
    // =========================================================================

    std::thread::sleep(Duration::from_secs(2));

    let (value, _, quality) = device.read("GUN_HV_V")?;
    println!("GUN_HV_V = {value} [{quality}]");

    match device.write("GUN_HV_V", Value::Float32(-70.0)) {
        Ok(()) => println!("setpoint written"),
        Err(e) => println!("write failed: {e}"),
    }

    std::thread::sleep(Duration::from_secs(5));
    device.stop();
    Ok(())
}

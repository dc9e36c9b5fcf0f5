//! Dependency edges between attributes.
//!
//! A value change on one attribute may require re-deriving others: a logic
//! attribute over interlock bits, a bit-group over its members, an autostop
//! monitor over its readback. Each source attribute carries a
//! [`ChangeReporter`] holding its "report to" edges; after the source's
//! value settles, destinations are refreshed synchronously in registration
//! order.
//!
//! A failing destination is logged and skipped — fan-out must never be
//! head-of-line-blocked by one bad consumer.

use tracing::warn;

use crate::error::Result;

/// One-way fan-out edges from a source attribute to its dependents.
#[derive(Debug, Clone, Default)]
pub struct ChangeReporter {
    destinations: Vec<String>,
}

impl ChangeReporter {
    /// Creates a reporter with no edges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a destination; re-registering the same name is a no-op so
    /// config-driven wiring stays idempotent.
    pub fn add_destination(&mut self, dest: impl Into<String>) {
        let dest = dest.into();
        if !self.destinations.contains(&dest) {
            self.destinations.push(dest);
        }
    }

    /// Returns the destinations in registration order.
    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    /// Returns whether any edges are registered.
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Invokes `refresh` for each destination in registration order.
    ///
    /// An error from one destination is logged against the source and does
    /// not prevent the remaining destinations from running.
    pub fn report<F>(&self, source: &str, mut refresh: F)
    where
        F: FnMut(&str) -> Result<()>,
    {
        for dest in &self.destinations {
            if let Err(e) = refresh(dest) {
                warn!(source, dest = dest.as_str(), error = %e, "dependent refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlcError;

    #[test]
    fn test_registration_order_and_dedup() {
        let mut rep = ChangeReporter::new();
        rep.add_destination("b");
        rep.add_destination("a");
        rep.add_destination("b");
        assert_eq!(rep.destinations(), ["b", "a"]);
    }

    #[test]
    fn test_failing_destination_does_not_block_fanout() {
        let mut rep = ChangeReporter::new();
        rep.add_destination("d1");
        rep.add_destination("d2");

        let mut visited = Vec::new();
        rep.report("src", |dest| {
            visited.push(dest.to_string());
            if dest == "d1" {
                Err(PlcError::formula("boom"))
            } else {
                Ok(())
            }
        });
        assert_eq!(visited, ["d1", "d2"]);
    }

    #[test]
    fn test_empty_reporter() {
        let rep = ChangeReporter::new();
        assert!(rep.is_empty());
        rep.report("src", |_| panic!("no destinations expected"));
    }
}

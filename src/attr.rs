//! Typed attributes over mirrored PLC memory.
//!
//! The attribute model turns raw buffer offsets into individually-typed,
//! quality-tagged, event-driven values. An [`AttrRegistry`] is built once
//! from the declarative per-PLC map ([`AttrSpec`](crate::config::AttrSpec))
//! and owns every attribute of one PLC link; all lookups go through the
//! registry's normalized-name index, never through reflection.
//!
//! Attribute kinds:
//!
//! - **register** — fixed read address (+ optional bit), optional write
//!   address, scalar type; refreshed from the mirrored buffer on every poll
//! - **logic** — derived boolean over named sibling attributes' discrete
//!   values, `and`/`or` combined, optionally inverted
//! - **group** — AND over member registers on read, broadcast on write
//! - **enumeration** — memorized ordered option list with an active
//!   selection, exposing numeric and human string views
//!
//! Rather than an inheritance lattice, one [`Attribute`] struct composes
//! optional components selected at construction: quality descriptor,
//! statistics window, interlock history, auto-stop monitor, read/write
//! formulas.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, error, warn};

use crate::autostop::{AutoStopEvent, AutoStopMonitor};
use crate::channel::BlockChannel;
use crate::codec::{ScalarType, Value};
use crate::config::{AttrSpec, LogicOperator, QualitiesSpec};
use crate::deps::ChangeReporter;
use crate::error::{PlcError, Result};
use crate::formula::Formula;
use crate::hooks::PropertyStore;
use crate::quality::{AbsoluteThreshold, Quality, QualityDescriptor, RelativeThreshold};
use crate::stats::{HistoryBuffer, StatBuffer};

/// Normalizes an attribute name for registry lookup.
fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Attribute kind and its addressing.
#[derive(Debug, Clone)]
pub enum AttrKind {
    /// PLC-backed register.
    Register {
        /// Read address within the frame.
        read_addr: usize,
        /// Bit index for bool reads.
        read_bit: Option<u8>,
        /// Write address within the write region.
        write_addr: Option<usize>,
        /// Bit index for bool writes.
        write_bit: Option<u8>,
    },
    /// Derived boolean over sibling attributes.
    Logic {
        /// Operands: attribute name with its truthy discrete values.
        operands: Vec<(String, Vec<f64>)>,
        /// Combination operator.
        operator: LogicOperator,
        /// Inverts the combined result.
        inverted: bool,
    },
    /// Bit group over member registers.
    Group {
        /// Member attribute names.
        members: Vec<String>,
    },
    /// Memorized option list with an active selection.
    Enumeration,
}

/// Enumeration state: ordered options plus the active selection.
#[derive(Debug, Clone, Default)]
struct EnumState {
    options: Vec<String>,
    active: Option<String>,
}

impl EnumState {
    /// Position of the active option, 0 when unset.
    ///
    /// The `active` setter takes 1-based indices but this view is 0-based,
    /// matching the wire encoding the operator panels expect.
    fn numeric(&self) -> usize {
        match &self.active {
            Some(active) => self.options.iter().position(|o| o == active).unwrap_or(0),
            None => 0,
        }
    }

    fn meaning(&self) -> String {
        format!(
            "{}:{}",
            self.numeric(),
            self.active.as_deref().unwrap_or("")
        )
    }
}

/// Selects the active enumeration option.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumSelect {
    /// 1-based option index.
    Index(usize),
    /// Case-insensitive option name; unknown names are appended as new
    /// options and flagged with a warning.
    Name(String),
}

/// Pending safety command produced during a refresh pass.
///
/// Auto-stop triggers are collected here and executed by the device layer
/// after the pass, so monitor evaluation never re-enters the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    /// Target attribute (the monitor's switch).
    pub attr: String,
    /// Value to write (the off value).
    pub value: Value,
}

/// One emitted change event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// External attribute name.
    pub name: String,
    /// Value after the change.
    pub value: Value,
    /// Timestamp of the change.
    pub timestamp: SystemTime,
    /// Quality after the change.
    pub quality: Quality,
}

/// One attribute: kind, optional components, and live state.
#[derive(Debug, Clone)]
pub struct Attribute {
    name: String,
    ty: ScalarType,
    kind: AttrKind,
    label: Option<String>,
    unit: Option<String>,
    format: Option<String>,
    min: Option<f64>,
    max: Option<f64>,
    quality_desc: Option<QualityDescriptor>,
    stats: Option<StatBuffer>,
    history: Option<HistoryBuffer>,
    autostop: Option<AutoStopMonitor>,
    read_formula: Option<Formula>,
    write_formula: Option<Formula>,
    write_guard: Option<(Formula, String)>,
    events: Option<crate::config::EventsSpec>,
    meanings: Option<HashMap<String, String>>,
    memorized: bool,
    reporter: ChangeReporter,
    enum_state: Option<EnumState>,
    // live state
    value: Option<Value>,
    timestamp: SystemTime,
    quality: Quality,
    pending_event: bool,
}

impl Attribute {
    /// External (display) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scalar type.
    pub fn scalar_type(&self) -> ScalarType {
        self.ty
    }

    /// Kind and addressing.
    pub fn kind(&self) -> &AttrKind {
        &self.kind
    }

    /// Last settled value, if any refresh has happened.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Quality of the last settled value.
    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Timestamp of the last value change.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Display label from the configuration.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Engineering unit from the configuration.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Display format hint from the configuration.
    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    /// Statistics window, when configured.
    pub fn stats(&self) -> Option<&StatBuffer> {
        self.stats.as_ref()
    }

    /// Interlock history, when configured.
    pub fn history(&self) -> Option<&HistoryBuffer> {
        self.history.as_ref()
    }

    /// Auto-stop monitor, when configured.
    pub fn autostop(&self) -> Option<&AutoStopMonitor> {
        self.autostop.as_ref()
    }

    /// Whether writes persist through the property store.
    pub fn is_memorized(&self) -> bool {
        self.memorized
    }

    /// Whether this attribute is refreshed from the PLC frame.
    pub fn is_hardware(&self) -> bool {
        matches!(self.kind, AttrKind::Register { .. })
    }

    /// Whether this attribute accepts writes.
    pub fn is_writable(&self) -> bool {
        match &self.kind {
            AttrKind::Register { write_addr, .. } => write_addr.is_some(),
            AttrKind::Group { .. } | AttrKind::Enumeration => true,
            AttrKind::Logic { .. } => false,
        }
    }

    /// Human meaning of the current value, when meanings are configured.
    ///
    /// Falls back to the bare value text.
    pub fn meaning(&self) -> Option<String> {
        if let Some(en) = &self.enum_state {
            return Some(en.meaning());
        }
        let value = self.value.as_ref()?;
        let key = match value {
            Value::Float32(v) => format!("{}", *v as i64),
            other => other.to_string(),
        };
        match &self.meanings {
            Some(map) => Some(
                map.get(&key)
                    .map(|label| format!("{key}:{label}"))
                    .unwrap_or(key),
            ),
            None => Some(key),
        }
    }
}

/// Registry of every attribute of one PLC link.
///
/// Built once from the declarative map; owned by the device instance and
/// passed by reference to the poll scheduler and event dispatcher.
pub struct AttrRegistry {
    device_id: String,
    attrs: HashMap<String, Attribute>,
    order: Vec<String>,
    store: Option<Arc<dyn PropertyStore>>,
}

impl std::fmt::Debug for AttrRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttrRegistry")
            .field("device_id", &self.device_id)
            .field("attrs", &self.order.len())
            .finish()
    }
}

impl AttrRegistry {
    /// Builds a registry from the declarative map.
    ///
    /// A malformed entry is logged loudly and skipped — one bad attribute
    /// must not prevent the rest of the map from loading. Overlapping write
    /// addresses between entries are treated as malformed.
    pub fn build(
        device_id: impl Into<String>,
        specs: &[AttrSpec],
        store: Option<Arc<dyn PropertyStore>>,
    ) -> Self {
        let mut registry = Self {
            device_id: device_id.into(),
            attrs: HashMap::new(),
            order: Vec::new(),
            store,
        };
        // Byte -> bits claimed (None = whole byte) for write-overlap checks.
        let mut write_claims: HashMap<usize, Option<Vec<u8>>> = HashMap::new();

        for spec in specs {
            match registry.build_one(spec, &mut write_claims) {
                Ok(attr) => {
                    let key = normalize(&spec.name);
                    if registry.attrs.contains_key(&key) {
                        error!(name = spec.name.as_str(), "duplicate attribute name, skipped");
                        continue;
                    }
                    registry.order.push(key.clone());
                    registry.attrs.insert(key, attr);
                }
                Err(e) => {
                    error!(name = spec.name.as_str(), error = %e, "attribute not built");
                }
            }
        }
        registry.wire_dependencies();
        registry.recover_memorized();
        registry
    }

    fn build_one(
        &self,
        spec: &AttrSpec,
        write_claims: &mut HashMap<usize, Option<Vec<u8>>>,
    ) -> Result<Attribute> {
        let ty = spec.ty.to_scalar(spec.str_len)?;

        if let (Some(min), Some(max)) = (spec.min, spec.max) {
            if min >= max {
                return Err(PlcError::invalid_config(format!(
                    "min ({min}) must be less than max ({max})"
                )));
            }
        }

        let kind = if let Some(read_addr) = spec.read_addr {
            if spec.logic.is_some() || spec.group.is_some() || spec.enumeration.is_some() {
                return Err(PlcError::invalid_config(
                    "register attribute cannot also be logic/group/enumeration",
                ));
            }
            if let Some(write_addr) = spec.write_addr {
                claim_write(write_claims, write_addr, ty, spec.write_bit)?;
            }
            AttrKind::Register {
                read_addr,
                read_bit: spec.read_bit,
                write_addr: spec.write_addr,
                write_bit: spec.write_bit,
            }
        } else if let Some(logic) = &spec.logic {
            AttrKind::Logic {
                operands: logic
                    .operands
                    .iter()
                    .map(|(name, values)| (normalize(name), values.clone()))
                    .collect(),
                operator: logic.operator,
                inverted: logic.inverted,
            }
        } else if let Some(members) = &spec.group {
            if members.is_empty() {
                return Err(PlcError::invalid_config("group needs at least one member"));
            }
            AttrKind::Group {
                members: members.iter().map(|m| normalize(m)).collect(),
            }
        } else if spec.enumeration.is_some() {
            AttrKind::Enumeration
        } else {
            return Err(PlcError::invalid_config(
                "attribute needs a readAddr, logic, group or enumeration definition",
            ));
        };

        let quality_desc = match &spec.qualities {
            Some(q) => Some(build_qualities(q, ty)?),
            None => None,
        };

        let needs_stats = quality_desc.as_ref().is_some_and(QualityDescriptor::needs_stats);
        let stats = match (spec.statistics, needs_stats, spec.autostop.is_some()) {
            (Some(n), _, _) => Some(StatBuffer::new(n)),
            (None, true, _) | (None, _, true) => Some(StatBuffer::with_default_capacity()),
            _ => None,
        };

        let history = spec
            .history
            .as_ref()
            .map(|h| HistoryBuffer::new(h.capacity.unwrap_or(crate::stats::DEFAULT_CAPACITY), h.base.clone()));

        let autostop = spec.autostop.as_ref().map(|a| {
            AutoStopMonitor::new(a.integration, a.below, a.above, normalize(&a.switch_attr))
        });

        let read_formula = spec
            .formula
            .as_ref()
            .and_then(|f| f.read.as_deref())
            .map(Formula::parse)
            .transpose()?;
        let write_formula = spec
            .formula
            .as_ref()
            .and_then(|f| f.write.as_deref())
            .map(Formula::parse)
            .transpose()?;
        let write_guard = match spec.formula.as_ref().and_then(|f| f.write_guard.as_deref()) {
            Some(text) => {
                let message = spec
                    .formula
                    .as_ref()
                    .and_then(|f| f.write_guard_message.clone())
                    .unwrap_or_else(|| format!("write to {} not allowed", spec.name));
                Some((Formula::parse(text)?, message))
            }
            None => None,
        };

        let enum_state = spec.enumeration.as_ref().map(|options| EnumState {
            options: options.iter().map(|o| normalize(o)).collect(),
            active: None,
        });
        // Enumeration state lives only in the mirror process, so it always
        // goes through the property store to survive restarts.
        let memorized = spec.memorized || enum_state.is_some();

        Ok(Attribute {
            name: spec.name.clone(),
            ty,
            kind,
            label: spec.label.clone(),
            unit: spec.unit.clone(),
            format: spec.format.clone(),
            min: spec.min,
            max: spec.max,
            quality_desc,
            stats,
            history,
            autostop,
            read_formula,
            write_formula,
            write_guard,
            events: spec.events,
            meanings: spec
                .meanings
                .as_ref()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            memorized,
            reporter: ChangeReporter::new(),
            enum_state,
            value: None,
            timestamp: SystemTime::UNIX_EPOCH,
            quality: Quality::Invalid,
            pending_event: false,
        })
    }

    /// Registers report-to edges: logic operands and group members report to
    /// the derived attribute; an auto-stop switch reports to its monitor's
    /// readback so a switch flip re-evaluates the latch promptly.
    fn wire_dependencies(&mut self) {
        let mut edges: Vec<(String, String)> = Vec::new();
        for (key, attr) in &self.attrs {
            match &attr.kind {
                AttrKind::Logic { operands, .. } => {
                    for (source, _) in operands {
                        edges.push((source.clone(), key.clone()));
                    }
                }
                AttrKind::Group { members } => {
                    for member in members {
                        edges.push((member.clone(), key.clone()));
                    }
                }
                AttrKind::Register { .. } | AttrKind::Enumeration => {}
            }
            if let Some(autostop) = &attr.autostop {
                edges.push((autostop.switch_attr().to_string(), key.clone()));
            }
        }
        for (source, dest) in edges {
            match self.attrs.get_mut(&source) {
                Some(attr) => attr.reporter.add_destination(dest),
                None => warn!(
                    source = source.as_str(),
                    dest = dest.as_str(),
                    "dependency source not in registry"
                ),
            }
        }
    }

    /// Recovers memorized enumeration state from the property store.
    fn recover_memorized(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let keys: Vec<String> = self.order.clone();
        for key in keys {
            let (name, memorized, is_enum) = {
                let attr = &self.attrs[&key];
                (
                    attr.name.clone(),
                    attr.memorized,
                    attr.enum_state.is_some(),
                )
            };
            if !memorized || !is_enum {
                continue;
            }
            let options = store.recover(&self.device_id, &name, "options");
            let active = store.recover(&self.device_id, &name, "active");
            if let Ok(Some(text)) = options {
                if let Err(e) = self.set_enum_options_text(&name, &text) {
                    warn!(name = name.as_str(), error = %e, "recovering options failed");
                }
            }
            if let Ok(Some(text)) = active {
                if let Err(e) = self.set_enum_active(&name, EnumSelect::Name(text)) {
                    warn!(name = name.as_str(), error = %e, "recovering active failed");
                }
            }
        }
    }

    /// Device identifier used for property-store keys.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Attribute names in configuration order.
    pub fn names(&self) -> Vec<String> {
        self.order
            .iter()
            .map(|k| self.attrs[k].name.clone())
            .collect()
    }

    /// Looks up an attribute, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::UnknownAttribute` when the name does not resolve.
    pub fn attr(&self, name: &str) -> Result<&Attribute> {
        self.attrs
            .get(&normalize(name))
            .ok_or_else(|| PlcError::unknown_attribute(name))
    }

    fn attr_mut(&mut self, name: &str) -> Result<&mut Attribute> {
        self.attrs
            .get_mut(&normalize(name))
            .ok_or_else(|| PlcError::unknown_attribute(name))
    }

    /// Reads an attribute's settled value, timestamp and quality.
    pub fn read(&self, name: &str) -> Result<(Value, SystemTime, Quality)> {
        let attr = self.attr(name)?;
        match &attr.value {
            Some(value) => Ok((value.clone(), attr.timestamp, attr.quality)),
            None => Ok((
                Value::Byte(0),
                attr.timestamp,
                Quality::Invalid,
            )),
        }
    }

    /// Numeric snapshot of every settled value, keyed by normalized name.
    fn snapshot(&self) -> HashMap<String, f64> {
        self.attrs
            .iter()
            .filter_map(|(key, attr)| {
                attr.value
                    .as_ref()
                    .and_then(Value::as_f64)
                    .map(|v| (key.clone(), v))
            })
            .collect()
    }

    /// Re-derives every PLC-backed attribute from the mirrored buffer.
    ///
    /// Runs once per poll cycle, after the buffer swap. Derived attributes
    /// are refreshed through dependency propagation as their sources settle.
    /// Returns the safety commands raised by auto-stop monitors during the
    /// pass, to be executed by the caller.
    pub fn refresh_from_plc(
        &mut self,
        channel: &BlockChannel,
        now: SystemTime,
    ) -> Vec<PendingCommand> {
        let mut snapshot = self.snapshot();
        let mut commands = Vec::new();
        let keys = self.order.clone();

        for key in keys {
            let raw = {
                let attr = &self.attrs[&key];
                let AttrKind::Register {
                    read_addr,
                    read_bit,
                    ..
                } = attr.kind
                else {
                    continue;
                };
                match read_bit {
                    Some(bit) => channel.bit(read_addr, bit).map(Value::Bool),
                    None => channel.get(read_addr, attr.ty),
                }
            };

            match raw {
                Ok(raw) => {
                    let value = self.apply_read_formula(&key, raw, &snapshot);
                    match value {
                        Ok(value) => {
                            if let Some(v) = value.as_f64() {
                                snapshot.insert(key.clone(), v);
                            }
                            self.settle(&key, value, now, &mut snapshot, &mut commands, 0, true);
                        }
                        Err(e) => {
                            debug!(attr = key.as_str(), error = %e, "read formula failed");
                            self.degrade(&key, now);
                        }
                    }
                }
                Err(e) => {
                    warn!(attr = key.as_str(), error = %e, "hardware read failed");
                    self.degrade(&key, now);
                }
            }
        }
        commands
    }

    fn apply_read_formula(
        &self,
        key: &str,
        raw: Value,
        snapshot: &HashMap<String, f64>,
    ) -> Result<Value> {
        let attr = &self.attrs[key];
        let Some(formula) = &attr.read_formula else {
            return Ok(raw);
        };
        let input = raw
            .as_f64()
            .ok_or_else(|| PlcError::formula("read formula over non-numeric value"))?;
        let resolve = |name: &str| -> Result<f64> {
            snapshot
                .get(&normalize(name))
                .copied()
                .ok_or_else(|| PlcError::unknown_attribute(name))
        };
        let out = formula.eval(input, &resolve)?;
        Ok(renumber(&raw, out))
    }

    /// Commits a settled value: statistics, quality, timestamp, events,
    /// auto-stop, then dependency propagation.
    ///
    /// `fresh` is false when a register is re-settled through a dependency
    /// edge within the same cycle; its sample was already recorded and must
    /// not enter the statistics and history buffers twice.
    fn settle(
        &mut self,
        key: &str,
        value: Value,
        now: SystemTime,
        snapshot: &mut HashMap<String, f64>,
        commands: &mut Vec<PendingCommand>,
        depth: usize,
        fresh: bool,
    ) {
        // A dependency lattice deeper than this is a config defect.
        const MAX_DEPTH: usize = 8;
        if depth > MAX_DEPTH {
            warn!(attr = key, "dependency chain too deep, propagation stopped");
            return;
        }

        let changed;
        let reporter;
        {
            let Some(attr) = self.attrs.get_mut(key) else {
                return;
            };
            let numeric = value.as_f64();
            if fresh {
                if let (Some(stats), Some(v)) = (attr.stats.as_mut(), numeric) {
                    stats.append(v);
                }
                if let (Some(history), Some(v)) = (attr.history.as_mut(), numeric) {
                    history.append(v);
                }
            }

            let quality = match &attr.quality_desc {
                Some(desc) => desc.classify(&value, attr.stats.as_ref()),
                None => Quality::Valid,
            };
            let quality_changed = attr.quality != quality;

            changed = attr.value.as_ref() != Some(&value) || quality_changed;
            if changed {
                // Timestamps never go backwards, even under clock slew.
                attr.timestamp = attr.timestamp.max(now);
                attr.quality = quality;
                let emit = match (&attr.events, attr.value.as_ref().and_then(Value::as_f64), numeric)
                {
                    (None, _, _) => false,
                    (Some(ev), Some(old), Some(new)) => match ev.threshold {
                        Some(th) => (new - old).abs() > th || quality_changed,
                        None => true,
                    },
                    (Some(_), _, _) => true,
                };
                attr.value = Some(value);
                if emit {
                    attr.pending_event = true;
                }
            }

            // Auto-stop integration happens on every fresh readback, changed
            // or not, while the switch is on.
            if let (Some(autostop), Some(v)) = (attr.autostop.as_mut(), numeric) {
                let switch_key = normalize(autostop.switch_attr());
                let switch_on = snapshot.get(&switch_key).copied().unwrap_or(0.0) != 0.0;
                if autostop.integrate(v, switch_on) == AutoStopEvent::Trigger {
                    commands.push(PendingCommand {
                        attr: switch_key,
                        value: Value::Bool(false),
                    });
                }
            }

            reporter = if changed {
                attr.reporter.clone()
            } else {
                ChangeReporter::new()
            };
        }

        if changed {
            reporter.report(key, |dest| {
                self.refresh_derived(dest, now, snapshot, commands, depth + 1)
            });
        }
    }

    /// Marks an attribute INVALID without touching its cached value.
    fn degrade(&mut self, key: &str, now: SystemTime) {
        if let Some(attr) = self.attrs.get_mut(key) {
            if attr.quality != Quality::Invalid {
                attr.quality = Quality::Invalid;
                attr.timestamp = attr.timestamp.max(now);
                if attr.events.is_some() {
                    attr.pending_event = true;
                }
            }
        }
    }

    /// Re-derives one logic/group/autostop-dependent attribute.
    fn refresh_derived(
        &mut self,
        name: &str,
        now: SystemTime,
        snapshot: &mut HashMap<String, f64>,
        commands: &mut Vec<PendingCommand>,
        depth: usize,
    ) -> Result<()> {
        let key = normalize(name);
        let (derived, fresh) = {
            let attr = self
                .attrs
                .get(&key)
                .ok_or_else(|| PlcError::unknown_attribute(name))?;
            match &attr.kind {
                AttrKind::Logic {
                    operands,
                    operator,
                    inverted,
                } => {
                    let mut bits = operands.iter().map(|(source, allowed)| {
                        let v = snapshot
                            .get(source)
                            .copied()
                            .ok_or_else(|| PlcError::unknown_attribute(source))?;
                        Ok(allowed.contains(&v))
                    });
                    let combined = match operator {
                        LogicOperator::And => bits.try_fold(true, |acc, b: Result<bool>| {
                            b.map(|b| acc && b)
                        })?,
                        LogicOperator::Or => bits.try_fold(false, |acc, b: Result<bool>| {
                            b.map(|b| acc || b)
                        })?,
                    };
                    (Some(Value::Bool(combined != *inverted)), true)
                }
                AttrKind::Group { members } => {
                    let mut all = true;
                    for member in members {
                        let v = snapshot
                            .get(member)
                            .copied()
                            .ok_or_else(|| PlcError::unknown_attribute(member))?;
                        all &= v != 0.0;
                    }
                    (Some(Value::Bool(all)), true)
                }
                // Registers reached through an edge (autostop switch flips)
                // re-run their settle path with the cached value. That value
                // was already sampled this cycle, so it is not fresh.
                AttrKind::Register { .. } => (attr.value.clone(), false),
                AttrKind::Enumeration => (None, true),
            }
        };
        if let Some(value) = derived {
            if let Some(v) = value.as_f64() {
                snapshot.insert(key.clone(), v);
            }
            self.settle(&key, value, now, snapshot, commands, depth, fresh);
        }
        Ok(())
    }

    /// Writes a value to an attribute, translating it into PLC memory.
    ///
    /// `permitted` reflects the caller's hold on the control lock; a write
    /// without it fails synchronously. Guard formulas may veto the write
    /// with a user-facing message; write formulas transform the value before
    /// encoding. Group writes broadcast to every member.
    pub fn write(
        &mut self,
        name: &str,
        value: Value,
        channel: &BlockChannel,
        permitted: bool,
    ) -> Result<()> {
        let key = normalize(name);
        let attr = self
            .attrs
            .get(&key)
            .ok_or_else(|| PlcError::unknown_attribute(name))?;

        if !attr.is_writable() {
            return Err(PlcError::write_not_permitted(format!(
                "{name} is read-only"
            )));
        }
        if !permitted {
            return Err(PlcError::write_not_permitted(format!(
                "control lock not held, write to {name} refused"
            )));
        }

        if let AttrKind::Group { members } = &attr.kind {
            let members = members.clone();
            for member in &members {
                self.write(member, value.clone(), channel, true)?;
            }
            return Ok(());
        }

        let snapshot = self.snapshot();
        let resolve = |n: &str| -> Result<f64> {
            snapshot
                .get(&normalize(n))
                .copied()
                .ok_or_else(|| PlcError::unknown_attribute(n))
        };

        let attr = &self.attrs[&key];
        let numeric = value.as_f64();

        if let Some((guard, message)) = &attr.write_guard {
            let input = numeric
                .ok_or_else(|| PlcError::formula("write guard over non-numeric value"))?;
            if !guard.eval_bool(input, &resolve)? {
                return Err(PlcError::write_rejected(message.clone()));
            }
        }

        if let (Some(min), Some(v)) = (attr.min, numeric) {
            if v < min {
                return Err(PlcError::write_rejected(format!(
                    "{name}: {v} below minimum {min}"
                )));
            }
        }
        if let (Some(max), Some(v)) = (attr.max, numeric) {
            if v > max {
                return Err(PlcError::write_rejected(format!(
                    "{name}: {v} above maximum {max}"
                )));
            }
        }

        let outgoing = match (&attr.write_formula, numeric) {
            (Some(formula), Some(v)) => renumber(&value, formula.eval(v, &resolve)?),
            _ => value.clone(),
        };

        let AttrKind::Register {
            write_addr,
            write_bit,
            ..
        } = attr.kind
        else {
            // Enumeration writes route through the active selection.
            return match value {
                Value::Str(s) => self.set_enum_active(name, EnumSelect::Name(s)),
                other => match other.as_f64() {
                    Some(v) => self.set_enum_active(name, EnumSelect::Index(v as usize)),
                    None => Err(PlcError::write_rejected(format!(
                        "{name}: unsupported enumeration selector"
                    ))),
                },
            };
        };
        let write_addr = write_addr.ok_or_else(|| {
            PlcError::write_not_permitted(format!("{name} has no write address"))
        })?;

        match (&outgoing, write_bit) {
            (Value::Bool(b), bit) => channel.write_bit(write_addr, bit.unwrap_or(0), *b, false)?,
            (other, _) => channel.write(write_addr, other, false)?,
        }
        debug!(attr = name, value = %outgoing, "written to plc");

        if attr.memorized {
            if let Some(store) = &self.store {
                if let Err(e) =
                    store.store(&self.device_id, &attr.name, "value", &outgoing.to_string())
                {
                    warn!(attr = name, error = %e, "memorized persist failed");
                }
            }
        }
        Ok(())
    }

    /// Replays every writable register's cached value into the write region
    /// as one batched resend — the recovery path after a PLC dropout.
    ///
    /// The whole batch goes through [`BlockChannel::force_rewrite`], which
    /// holds the write gate until the region is back on the wire; a
    /// concurrent attribute write cannot flush a half-restored region.
    pub fn force_full_write(&self, channel: &BlockChannel) -> Result<()> {
        let mut entries = Vec::new();
        for key in &self.order {
            let attr = &self.attrs[key];
            let AttrKind::Register {
                write_addr: Some(write_addr),
                write_bit,
                ..
            } = attr.kind
            else {
                continue;
            };
            let Some(value) = &attr.value else { continue };
            entries.push((write_addr, write_bit, value.clone()));
        }
        channel.force_rewrite(&entries)
    }

    /// Drains the attributes marked for event emission, in config order.
    pub fn take_pending_events(&mut self) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        for key in &self.order {
            let Some(attr) = self.attrs.get_mut(key) else {
                continue;
            };
            if !attr.pending_event {
                continue;
            }
            attr.pending_event = false;
            if let Some(value) = &attr.value {
                events.push(ChangeEvent {
                    name: attr.name.clone(),
                    value: value.clone(),
                    timestamp: attr.timestamp,
                    quality: attr.quality,
                });
            }
        }
        events
    }

    /// Replaces an enumeration's option list.
    ///
    /// Options are normalized to lowercase-trimmed strings. An active
    /// selection missing from the new set degrades to INVALID quality
    /// instead of erroring.
    pub fn set_enum_options(&mut self, name: &str, options: Vec<String>) -> Result<()> {
        let display_name;
        let memorized;
        let options_text;
        {
            let attr = self.attr_mut(name)?;
            let en = attr
                .enum_state
                .as_mut()
                .ok_or_else(|| PlcError::invalid_config(format!("{name} is not an enumeration")))?;
            en.options = options.iter().map(|o| normalize(o)).collect();
            if let Some(active) = &en.active {
                if !en.options.contains(active) {
                    en.active = None;
                    attr.quality = Quality::Invalid;
                }
            }
            display_name = attr.name.clone();
            memorized = attr.memorized;
            options_text = attr
                .enum_state
                .as_ref()
                .map(|e| e.options.join(","))
                .unwrap_or_default();
        }
        if memorized {
            self.persist(&display_name, "options", &options_text);
        }
        Ok(())
    }

    /// Replaces an enumeration's options from a string-encoded list, either
    /// `['a', 'b']` or a plain comma-separated form.
    pub fn set_enum_options_text(&mut self, name: &str, text: &str) -> Result<()> {
        let trimmed = text.trim().trim_start_matches('[').trim_end_matches(']');
        let options: Vec<String> = trimmed
            .split(',')
            .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
            .filter(|item| !item.is_empty())
            .collect();
        if options.is_empty() {
            return Err(PlcError::invalid_config(format!(
                "unparseable option list '{text}'"
            )));
        }
        self.set_enum_options(name, options)
    }

    /// Selects an enumeration's active option.
    ///
    /// Accepts a 1-based index or a case-insensitive name; an unknown name
    /// is appended as a new option and flagged with a warning rather than
    /// rejected.
    pub fn set_enum_active(&mut self, name: &str, select: EnumSelect) -> Result<()> {
        let now = SystemTime::now();
        let display_name;
        let memorized;
        let active_text;
        {
            let attr = self.attr_mut(name)?;
            let en = attr
                .enum_state
                .as_mut()
                .ok_or_else(|| PlcError::invalid_config(format!("{name} is not an enumeration")))?;
            let chosen = match select {
                EnumSelect::Index(i) => {
                    if i == 0 || i > en.options.len() {
                        return Err(PlcError::write_rejected(format!(
                            "index {i} outside 1..={}",
                            en.options.len()
                        )));
                    }
                    en.options[i - 1].clone()
                }
                EnumSelect::Name(text) => {
                    let norm = normalize(&text);
                    if !en.options.contains(&norm) {
                        warn!(attr = name, option = norm.as_str(), "unknown option observed, appending");
                        en.options.push(norm.clone());
                    }
                    norm
                }
            };
            en.active = Some(chosen.clone());
            attr.quality = Quality::Valid;
            attr.timestamp = attr.timestamp.max(now);
            attr.value = Some(Value::Str(chosen.clone()));
            if attr.events.is_some() {
                attr.pending_event = true;
            }
            display_name = attr.name.clone();
            memorized = attr.memorized;
            active_text = chosen;
        }
        if memorized {
            self.persist(&display_name, "active", &active_text);
        }
        Ok(())
    }

    /// 0-based position of an enumeration's active option, 0 when unset.
    pub fn enum_numeric(&self, name: &str) -> Result<usize> {
        let attr = self.attr(name)?;
        attr.enum_state
            .as_ref()
            .map(EnumState::numeric)
            .ok_or_else(|| PlcError::invalid_config(format!("{name} is not an enumeration")))
    }

    /// `"<numeric>:<active>"` view of an enumeration.
    pub fn enum_meaning(&self, name: &str) -> Result<String> {
        let attr = self.attr(name)?;
        attr.enum_state
            .as_ref()
            .map(EnumState::meaning)
            .ok_or_else(|| PlcError::invalid_config(format!("{name} is not an enumeration")))
    }

    /// Current option list of an enumeration.
    pub fn enum_options(&self, name: &str) -> Result<Vec<String>> {
        let attr = self.attr(name)?;
        attr.enum_state
            .as_ref()
            .map(|e| e.options.clone())
            .ok_or_else(|| PlcError::invalid_config(format!("{name} is not an enumeration")))
    }

    /// Arms or disarms an attribute's auto-stop monitor.
    pub fn set_autostop_enabled(&mut self, name: &str, on: bool) -> Result<()> {
        let attr = self.attr_mut(name)?;
        let autostop = attr
            .autostop
            .as_mut()
            .ok_or_else(|| PlcError::invalid_config(format!("{name} has no auto-stop")))?;
        autostop.set_enabled(on);
        Ok(())
    }

    /// Changes an auto-stop monitor's integration window.
    pub fn set_autostop_integration(&mut self, name: &str, samples: usize) -> Result<()> {
        let attr = self.attr_mut(name)?;
        let autostop = attr
            .autostop
            .as_mut()
            .ok_or_else(|| PlcError::invalid_config(format!("{name} has no auto-stop")))?;
        autostop.set_integration(samples);
        if let Some(stats) = attr.stats.as_mut() {
            stats.resize(samples);
        }
        Ok(())
    }

    /// Clears an auto-stop monitor's latch.
    pub fn reset_autostop(&mut self, name: &str) -> Result<()> {
        let attr = self.attr_mut(name)?;
        attr.autostop
            .as_mut()
            .ok_or_else(|| PlcError::invalid_config(format!("{name} has no auto-stop")))?
            .reset();
        Ok(())
    }

    fn persist(&self, attr_name: &str, field: &str, value: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.store(&self.device_id, attr_name, field, value) {
                warn!(attr = attr_name, field, error = %e, "memorized persist failed");
            }
        }
    }
}

/// Builds a quality descriptor from its declarative form.
fn build_qualities(spec: &QualitiesSpec, ty: ScalarType) -> Result<QualityDescriptor> {
    fn discrete(ty: ScalarType, values: &[f64]) -> Result<Vec<Value>> {
        values.iter().map(|&v| typed_value(ty, v)).collect()
    }
    fn absolute(spec: &crate::config::AbsoluteSpec) -> Result<AbsoluteThreshold> {
        AbsoluteThreshold::new(spec.below, spec.above, spec.under)
    }

    let mut desc = QualityDescriptor::new();
    if let Some(band) = &spec.alarm {
        if let Some(values) = &band.values {
            desc = desc.with_alarm_values(discrete(ty, values)?);
        }
        if let Some(abs) = &band.absolute {
            desc = desc.with_alarm_absolute(absolute(abs)?);
        }
        if let Some(rel) = &band.relative {
            desc = desc.with_alarm_relative(RelativeThreshold { std_dev: rel.std_dev });
        }
    }
    if let Some(band) = &spec.warning {
        if let Some(values) = &band.values {
            desc = desc.with_warning_values(discrete(ty, values)?);
        }
        if let Some(abs) = &band.absolute {
            desc = desc.with_warning_absolute(absolute(abs)?);
        }
        if let Some(rel) = &band.relative {
            desc = desc.with_warning_relative(RelativeThreshold { std_dev: rel.std_dev });
        }
    }
    if let Some(band) = &spec.changing {
        if let Some(values) = &band.values {
            desc = desc.with_changing_values(discrete(ty, values)?);
        }
        if let Some(abs) = &band.absolute {
            desc = desc.with_changing_absolute(absolute(abs)?);
        }
        if let Some(rel) = &band.relative {
            desc = desc.with_changing_relative(RelativeThreshold { std_dev: rel.std_dev });
        }
    }
    Ok(desc)
}

/// Converts a configured numeric literal into the attribute's scalar type.
fn typed_value(ty: ScalarType, v: f64) -> Result<Value> {
    Ok(match ty {
        ScalarType::Bool => Value::Bool(v != 0.0),
        ScalarType::Byte => Value::Byte(v as u8),
        ScalarType::Int16 => Value::Int16(v as i16),
        ScalarType::Float32 => Value::Float32(v as f32),
        ScalarType::Str(_) => {
            return Err(PlcError::invalid_config(
                "numeric quality values on a string attribute",
            ))
        }
    })
}

/// Re-types a numeric formula result back into the input's scalar type.
fn renumber(like: &Value, out: f64) -> Value {
    match like {
        Value::Bool(_) => Value::Bool(out != 0.0),
        Value::Byte(_) => Value::Byte(out as u8),
        Value::Int16(_) => Value::Int16(out as i16),
        Value::Float32(_) => Value::Float32(out as f32),
        Value::Str(_) => Value::Str(out.to_string()),
    }
}

/// Records a write-region claim, rejecting overlaps.
fn claim_write(
    claims: &mut HashMap<usize, Option<Vec<u8>>>,
    addr: usize,
    ty: ScalarType,
    bit: Option<u8>,
) -> Result<()> {
    if ty == ScalarType::Bool {
        let bit = bit.unwrap_or(0);
        match claims.entry(addr).or_insert_with(|| Some(Vec::new())) {
            Some(bits) => {
                if bits.contains(&bit) {
                    return Err(PlcError::invalid_config(format!(
                        "write bit {addr}.{bit} already claimed"
                    )));
                }
                bits.push(bit);
            }
            None => {
                return Err(PlcError::invalid_config(format!(
                    "write byte {addr} already claimed whole"
                )));
            }
        }
        return Ok(());
    }
    for offset in addr..addr + ty.width() {
        if claims.contains_key(&offset) {
            return Err(PlcError::invalid_config(format!(
                "write byte {offset} already claimed"
            )));
        }
        claims.insert(offset, None);
    }
    Ok(())
}

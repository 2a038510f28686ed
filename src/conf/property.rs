// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Live configuration values.
//!
//! [`RuntimeProperties`] is a cloneable handle shared between the application and the
//! connection. The application may change a value at any time, the connection copies all
//! values into a [`PropertySnapshot`] when a statement starts and uses that copy until the
//! statement is done.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    conf::{resolve_byte_limit, ByteLimit},
    error::ConfigError,
    events::EventSink,
};

pub const DEFAULT_MAX_ALLOWED_PACKET: usize = 4 * 1024 * 1024;
pub const MIN_MAX_ALLOWED_PACKET: usize = 1024;
pub const MAX_MAX_ALLOWED_PACKET: usize = 1_073_741_824;

const MAX_ALLOWED_PACKET_FORMAT: &str = "integer between 1024 and 1073741824";

/// Read access to a named property.
pub trait ReadableProperty<T> {
    fn name(&self) -> &'static str;
    fn value(&self) -> T;
    fn initial_value(&self) -> T;
    fn string_value(&self) -> String;
    /// `true` once the application (not the driver) has set the value.
    fn is_explicitly_set(&self) -> bool;
}

/// Read/write access to a named property.
pub trait ModifiableProperty<T>: ReadableProperty<T> {
    /// Validates and stores `value`. An invalid value leaves the previous one in place.
    fn set_value(&self, value: T) -> Result<(), ConfigError>;
    fn reset_value(&self);
}

#[derive(Debug, Clone)]
struct Slot<T> {
    initial: T,
    value: T,
    explicitly_set: bool,
}

impl<T: Clone> Slot<T> {
    fn new(initial: T, explicitly_set: bool) -> Self {
        Slot {
            value: initial.clone(),
            initial,
            explicitly_set,
        }
    }
}

struct Inner {
    max_allowed_packet: Slot<usize>,
    max_result_buffer: Slot<String>,
    resolved_limit: ByteLimit,
    max_heap_bytes: u64,
    events: Arc<dyn EventSink>,
}

/// Values of all properties at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySnapshot {
    pub max_allowed_packet: usize,
    pub max_result_buffer: ByteLimit,
}

/// Shared, mutable property store.
#[derive(Clone)]
pub struct RuntimeProperties {
    inner: Arc<RwLock<Inner>>,
}

impl RuntimeProperties {
    /// Creates the store, resolving `max_result_buffer` against `max_heap_bytes`.
    ///
    /// `max_allowed_packet` is `None` if the application did not set it, in which case the
    /// driver may later replace the default with the server's value.
    pub fn new(
        max_allowed_packet: Option<usize>,
        max_result_buffer: Option<&str>,
        max_heap_bytes: u64,
        events: Arc<dyn EventSink>,
    ) -> Result<RuntimeProperties, ConfigError> {
        if let Some(value) = max_allowed_packet {
            check_max_allowed_packet(value)?;
        }
        let resolved_limit = resolve_byte_limit(max_result_buffer, max_heap_bytes, &*events)?;
        let inner = Inner {
            max_allowed_packet: Slot::new(
                max_allowed_packet.unwrap_or(DEFAULT_MAX_ALLOWED_PACKET),
                max_allowed_packet.is_some(),
            ),
            max_result_buffer: Slot::new(
                max_result_buffer.unwrap_or_default().to_owned(),
                max_result_buffer.is_some(),
            ),
            resolved_limit,
            max_heap_bytes,
            events,
        };
        Ok(RuntimeProperties {
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies current values. Later changes do not affect the returned snapshot.
    pub fn snapshot(&self) -> PropertySnapshot {
        let inner = self.read();
        PropertySnapshot {
            max_allowed_packet: inner.max_allowed_packet.value,
            max_result_buffer: inner.resolved_limit,
        }
    }

    pub fn max_allowed_packet(&self) -> MaxAllowedPacket {
        MaxAllowedPacket(self.clone())
    }

    pub fn max_result_buffer(&self) -> MaxResultBuffer {
        MaxResultBuffer(self.clone())
    }

    /// Adopts the server's `@@max_allowed_packet` unless the application set its own.
    ///
    /// Returns the value in effect afterwards.
    pub(crate) fn adopt_server_max_allowed_packet(&self, server_value: usize) -> usize {
        let mut inner = self.write();
        let slot = &mut inner.max_allowed_packet;
        if !slot.explicitly_set {
            slot.value = server_value.clamp(MIN_MAX_ALLOWED_PACKET, MAX_MAX_ALLOWED_PACKET);
        }
        slot.value
    }
}

impl fmt::Debug for RuntimeProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("RuntimeProperties")
            .field("max_allowed_packet", &inner.max_allowed_packet.value)
            .field("max_result_buffer", &inner.max_result_buffer.value)
            .field("resolved_limit", &inner.resolved_limit)
            .field("max_heap_bytes", &inner.max_heap_bytes)
            .finish()
    }
}

fn check_max_allowed_packet(value: usize) -> Result<(), ConfigError> {
    if (MIN_MAX_ALLOWED_PACKET..=MAX_MAX_ALLOWED_PACKET).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidFormat {
            value: value.to_string(),
            expected: MAX_ALLOWED_PACKET_FORMAT,
        })
    }
}

/// Handle to the `max_allowed_packet` property.
#[derive(Debug, Clone)]
pub struct MaxAllowedPacket(RuntimeProperties);

impl ReadableProperty<usize> for MaxAllowedPacket {
    fn name(&self) -> &'static str {
        "max_allowed_packet"
    }

    fn value(&self) -> usize {
        self.0.read().max_allowed_packet.value
    }

    fn initial_value(&self) -> usize {
        self.0.read().max_allowed_packet.initial
    }

    fn string_value(&self) -> String {
        self.value().to_string()
    }

    fn is_explicitly_set(&self) -> bool {
        self.0.read().max_allowed_packet.explicitly_set
    }
}

impl ModifiableProperty<usize> for MaxAllowedPacket {
    fn set_value(&self, value: usize) -> Result<(), ConfigError> {
        check_max_allowed_packet(value)?;
        let mut inner = self.0.write();
        inner.max_allowed_packet.value = value;
        inner.max_allowed_packet.explicitly_set = true;
        Ok(())
    }

    fn reset_value(&self) {
        let mut inner = self.0.write();
        let slot = &mut inner.max_allowed_packet;
        slot.value = slot.initial;
    }
}

/// Handle to the `max_result_buffer` property.
#[derive(Debug, Clone)]
pub struct MaxResultBuffer(RuntimeProperties);

impl MaxResultBuffer {
    /// Byte limit the current value resolves to.
    pub fn resolved(&self) -> ByteLimit {
        self.0.read().resolved_limit
    }
}

impl ReadableProperty<String> for MaxResultBuffer {
    fn name(&self) -> &'static str {
        "max_result_buffer"
    }

    fn value(&self) -> String {
        self.0.read().max_result_buffer.value.clone()
    }

    fn initial_value(&self) -> String {
        self.0.read().max_result_buffer.initial.clone()
    }

    fn string_value(&self) -> String {
        self.value()
    }

    fn is_explicitly_set(&self) -> bool {
        self.0.read().max_result_buffer.explicitly_set
    }
}

impl ModifiableProperty<String> for MaxResultBuffer {
    fn set_value(&self, value: String) -> Result<(), ConfigError> {
        let mut inner = self.0.write();
        let limit = resolve_byte_limit(Some(value.as_str()), inner.max_heap_bytes, &*inner.events)?;
        inner.resolved_limit = limit;
        inner.max_result_buffer.value = value;
        inner.max_result_buffer.explicitly_set = true;
        Ok(())
    }

    fn reset_value(&self) {
        let mut inner = self.0.write();
        let initial = inner.max_result_buffer.initial.clone();
        // the initial value was resolved successfully when the store was created
        if let Ok(limit) = resolve_byte_limit(Some(initial.as_str()), inner.max_heap_bytes, &*inner.events)
        {
            inner.resolved_limit = limit;
        }
        inner.max_result_buffer.value = initial;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::events::{test::RecordingSink, Event, NoopSink};

    fn props(max_result_buffer: Option<&str>) -> RuntimeProperties {
        RuntimeProperties::new(None, max_result_buffer, 1_000_000_000, Arc::new(NoopSink)).unwrap()
    }

    #[test]
    fn should_isolate_snapshots_from_later_changes() {
        let props = props(Some("1K"));
        let snapshot = props.snapshot();

        props.max_result_buffer().set_value("2K".into()).unwrap();
        props.max_allowed_packet().set_value(2048).unwrap();

        assert_eq!(snapshot.max_result_buffer, ByteLimit::Bytes(1_000));
        assert_eq!(snapshot.max_allowed_packet, DEFAULT_MAX_ALLOWED_PACKET);
        assert_eq!(
            props.snapshot(),
            PropertySnapshot {
                max_allowed_packet: 2048,
                max_result_buffer: ByteLimit::Bytes(2_000),
            }
        );
    }

    #[test]
    fn should_keep_previous_value_on_invalid_update() {
        let props = props(Some("10M"));
        let prop = props.max_result_buffer();
        assert!(prop.set_value("lots".into()).is_err());
        assert_eq!(prop.value(), "10M");
        assert_eq!(prop.resolved(), ByteLimit::Bytes(10_000_000));

        let packet = props.max_allowed_packet();
        assert!(packet.set_value(10).is_err());
        assert_eq!(packet.value(), DEFAULT_MAX_ALLOWED_PACKET);
    }

    #[test]
    fn should_reset_to_initial_value() {
        let props = props(None);
        let prop = props.max_result_buffer();
        assert_eq!(prop.resolved(), ByteLimit::Unbounded);
        prop.set_value("5p".into()).unwrap();
        assert_eq!(prop.resolved(), ByteLimit::Bytes(50_000_000));
        assert!(prop.is_explicitly_set());
        prop.reset_value();
        assert_eq!(prop.value(), "");
        assert_eq!(prop.initial_value(), "");
        assert_eq!(prop.resolved(), ByteLimit::Unbounded);
        assert_eq!(prop.name(), "max_result_buffer");
    }

    #[test]
    fn should_adopt_server_packet_size_only_if_not_set() {
        let props = props(None);
        assert_eq!(props.adopt_server_max_allowed_packet(64 * 1024 * 1024), 64 * 1024 * 1024);
        assert!(!props.max_allowed_packet().is_explicitly_set());

        let props = RuntimeProperties::new(Some(4096), None, 1_000, Arc::new(NoopSink)).unwrap();
        assert_eq!(props.adopt_server_max_allowed_packet(64 * 1024 * 1024), 4096);
        assert_eq!(props.max_allowed_packet().string_value(), "4096");
    }

    #[test]
    fn should_report_clamping_through_injected_sink() {
        let sink = Arc::new(RecordingSink::default());
        let props = RuntimeProperties::new(None, Some("50p"), 1_000, sink.clone()).unwrap();
        props.max_result_buffer().set_value("100p".into()).unwrap();
        assert_eq!(props.snapshot().max_result_buffer, ByteLimit::Bytes(900));
        assert_eq!(
            sink.events(),
            vec![Event::BufferLimitClamped {
                requested: 1_000,
                clamped: 900,
            }]
        );
    }
}

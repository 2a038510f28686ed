// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! `max_result_buffer` parsing.
//!
//! Accepted values:
//!
//! * `10` - exact byte count;
//! * `10K`, `10M`, `10G`, `10T` (case-insensitive) - 1000-based multiples;
//! * `10p`, `10pct`, `10percent` (lowercase only) - percentage of the heap;
//! * empty - no limit.
//!
//! Whatever the value, the resolved limit never exceeds 90% of the heap.

use std::fmt;

use crate::{
    error::ConfigError,
    events::{Event, EventSink},
};

pub const BYTE_LIMIT_FORMAT: &str = "10 - bytes; 10K - kilobytes; 10M - megabytes; \
    10G - gigabytes; 10T - terabytes; 10p, 10pct, 10percent - percentage of heap memory";

// longest first, so that `10percent` is never read as `10percen` + `t`
const PERCENT_PHRASES: [&str; 3] = ["percent", "pct", "p"];

/// Upper bound on the bytes a single result set may stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteLimit {
    #[default]
    Unbounded,
    Bytes(u64),
}

impl ByteLimit {
    pub fn as_bytes(&self) -> Option<u64> {
        match *self {
            ByteLimit::Unbounded => None,
            ByteLimit::Bytes(bytes) => Some(bytes),
        }
    }

    pub fn is_exceeded_by(&self, observed: u64) -> bool {
        match *self {
            ByteLimit::Unbounded => false,
            ByteLimit::Bytes(limit) => observed > limit,
        }
    }
}

impl fmt::Display for ByteLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ByteLimit::Unbounded => f.write_str("unbounded"),
            ByteLimit::Bytes(bytes) => write!(f, "{} bytes", bytes),
        }
    }
}

/// Resolves a `max_result_buffer` value against the heap size.
///
/// Values above 90% of `max_heap_bytes` are lowered to exactly `floor(0.9 * max_heap_bytes)`
/// and reported to `events` as [`Event::BufferLimitClamped`].
pub fn resolve_byte_limit(
    value: Option<&str>,
    max_heap_bytes: u64,
    events: &dyn EventSink,
) -> Result<ByteLimit, ConfigError> {
    let value = match value.map(str::trim) {
        None | Some("") => return Ok(ByteLimit::Unbounded),
        Some(value) => value,
    };

    let requested = parse_byte_count(value, max_heap_bytes).ok_or_else(|| {
        ConfigError::InvalidFormat {
            value: value.to_owned(),
            expected: BYTE_LIMIT_FORMAT,
        }
    })?;

    let max = heap_ceiling(max_heap_bytes);
    if requested > max {
        events.emit(&Event::BufferLimitClamped {
            requested,
            clamped: max,
        });
        Ok(ByteLimit::Bytes(max))
    } else {
        Ok(ByteLimit::Bytes(requested))
    }
}

/// `floor(0.9 * max_heap_bytes)` without going through floating point.
fn heap_ceiling(max_heap_bytes: u64) -> u64 {
    max_heap_bytes / 10 * 9 + max_heap_bytes % 10 * 9 / 10
}

fn parse_byte_count(value: &str, max_heap_bytes: u64) -> Option<u64> {
    let percent_prefix = PERCENT_PHRASES
        .iter()
        .find_map(|phrase| value.strip_suffix(phrase));
    match percent_prefix {
        Some(prefix) => parse_percent(prefix, max_heap_bytes),
        None => parse_size(value),
    }
}

fn parse_percent(prefix: &str, max_heap_bytes: u64) -> Option<u64> {
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }
    let percent = prefix.parse::<f64>().ok()?;
    let bytes = (percent * max_heap_bytes as f64 / 100.0).round();
    if bytes.is_finite() && bytes <= u64::MAX as f64 {
        Some(bytes as u64)
    } else {
        None
    }
}

fn parse_size(value: &str) -> Option<u64> {
    let (digits, multiplier) = match value.as_bytes().last()? {
        b'k' | b'K' => (&value[..value.len() - 1], 1_000),
        b'm' | b'M' => (&value[..value.len() - 1], 1_000_000),
        b'g' | b'G' => (&value[..value.len() - 1], 1_000_000_000),
        b't' | b'T' => (&value[..value.len() - 1], 1_000_000_000_000),
        _ => (value, 1),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}

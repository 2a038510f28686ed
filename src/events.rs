// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Structured driver events.
//!
//! The driver never writes to stdout or a log file on its own. Everything worth reporting is
//! turned into an [`Event`] and handed to the [`EventSink`] configured via
//! [`OptsBuilder::event_sink`](crate::OptsBuilder::event_sink). The default sink forwards
//! events to [`tracing`].

use std::{fmt, sync::Arc};

/// Something the driver wants the application to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `max_result_buffer` asked for more than 90% of the heap and was lowered.
    BufferLimitClamped { requested: u64, clamped: u64 },
    /// A result set was abandoned because it outgrew `max_result_buffer`.
    BufferLimitExceeded { limit: u64, observed: u64 },
    /// The server asked to continue authentication with another plugin.
    AuthPluginSwitched { from: String, to: String, round: usize },
    /// A row could not be decoded and was reported to the caller as unusable.
    RowDiscarded { row_index: u64, reason: String },
}

impl Event {
    pub fn level(&self) -> tracing::Level {
        match self {
            Event::BufferLimitClamped { .. } | Event::RowDiscarded { .. } => tracing::Level::WARN,
            Event::BufferLimitExceeded { .. } => tracing::Level::ERROR,
            Event::AuthPluginSwitched { .. } => tracing::Level::DEBUG,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::BufferLimitClamped { requested, clamped } => write!(
                f,
                "Required to allocate {} bytes, which exceeded possible heap memory size. \
                 Assigned {} bytes as limit.",
                requested, clamped
            ),
            Event::BufferLimitExceeded { limit, observed } => write!(
                f,
                "Result set read {} bytes which exceeds max_result_buffer of {} bytes",
                observed, limit
            ),
            Event::AuthPluginSwitched { from, to, round } => write!(
                f,
                "Server switched authentication from `{}` to `{}` (round {})",
                from, to, round
            ),
            Event::RowDiscarded { row_index, reason } => {
                write!(f, "Row {} discarded: {}", row_index, reason)
            }
        }
    }
}

/// Receiver of driver events.
pub trait EventSink: fmt::Debug + Send + Sync {
    fn emit(&self, event: &Event);
}

/// Default sink, forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::BufferLimitClamped { requested, clamped } => {
                tracing::warn!(requested, clamped, "{}", event)
            }
            Event::BufferLimitExceeded { limit, observed } => {
                tracing::error!(limit, observed, "{}", event)
            }
            Event::AuthPluginSwitched { from, to, round } => {
                tracing::debug!(from = %from, to = %to, round, "{}", event)
            }
            Event::RowDiscarded { row_index, .. } => tracing::warn!(row_index, "{}", event),
        }
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &Event) {}
}

pub(crate) fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(TracingSink)
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::Mutex;

    use super::*;

    /// Keeps every event for later inspection.
    #[derive(Debug, Default)]
    pub struct RecordingSink(Mutex<Vec<Event>>);

    impl RecordingSink {
        pub fn events(&self) -> Vec<Event> {
            self.0.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &Event) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn should_render_clamp_warning() {
        let event = Event::BufferLimitClamped {
            requested: 950_000_000,
            clamped: 900_000_000,
        };
        assert_eq!(event.level(), tracing::Level::WARN);
        let text = event.to_string();
        assert!(text.contains("950000000"));
        assert!(text.contains("900000000"));
    }

    #[test]
    fn should_record_events() {
        let sink = RecordingSink::default();
        sink.emit(&Event::BufferLimitExceeded {
            limit: 10,
            observed: 11,
        });
        TracingSink.emit(&Event::BufferLimitExceeded {
            limit: 10,
            observed: 11,
        });
        assert_eq!(sink.events().len(), 1);
    }
}

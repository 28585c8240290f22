//! Render tracing events into plain parts for forwarding.

use std::fmt::Write as _;

use tracing::{Event, field::Field};

/// A rendered tracing event: level, target, and flattened message.
pub struct Rendered {
    /// Level name, lowercase (`info`, `warn`, ...).
    pub level: String,
    /// Emitting module path.
    pub target: String,
    /// The `message` field plus any other fields as `key=value` pairs.
    pub message: String,
}

struct MessageVisitor {
    message: String,
    fields: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            if !self.fields.is_empty() {
                self.fields.push(' ');
            }
            let _ = write!(self.fields, "{}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            if !self.fields.is_empty() {
                self.fields.push(' ');
            }
            let _ = write!(self.fields, "{}={}", field.name(), value);
        }
    }
}

/// Flatten an event into [`Rendered`] parts.
pub fn render_event(event: &Event<'_>) -> Rendered {
    let mut visitor = MessageVisitor {
        message: String::new(),
        fields: String::new(),
    };
    event.record(&mut visitor);

    let mut message = visitor.message;
    if !visitor.fields.is_empty() {
        if !message.is_empty() {
            message.push(' ');
        }
        message.push_str(&visitor.fields);
    }

    Rendered {
        level: event.metadata().level().to_string().to_ascii_lowercase(),
        target: event.metadata().target().to_string(),
        message,
    }
}

//! Events produced by spawned processes.
//!
//! Every event carries the logical name of the process it came from, which
//! is used to build the channel it is delivered on so that concurrent
//! processes never share a channel.

use serde_json::{json, Value};

/// Output or lifecycle notification from a managed child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A chunk of stdout, forwarded as it arrived.
    Stdout { name: String, pid: u32, chunk: String },
    /// The full stderr text, sent once after the stream ended and only if
    /// it held something other than whitespace.
    Stderr { name: String, pid: u32, text: String },
    /// The process exited. Always the last event for a given pid.
    Close {
        name: String,
        pid: u32,
        code: Option<i32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Stdout,
    Stderr,
    Close,
}

impl ChannelKind {
    fn prefix(&self) -> &'static str {
        match self {
            ChannelKind::Stdout => "process-stdout",
            ChannelKind::Stderr => "process-stderr",
            ChannelKind::Close => "process-close",
        }
    }
}

/// Channel name for one event class of one logical process.
pub fn channel_name(kind: ChannelKind, name: &str) -> String {
    format!("{}:{}", kind.prefix(), name)
}

impl Event {
    pub fn name(&self) -> &str {
        match self {
            Event::Stdout { name, .. } | Event::Stderr { name, .. } | Event::Close { name, .. } => {
                name
            }
        }
    }

    pub fn pid(&self) -> u32 {
        match self {
            Event::Stdout { pid, .. } | Event::Stderr { pid, .. } | Event::Close { pid, .. } => *pid,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Event::Stdout { .. } => ChannelKind::Stdout,
            Event::Stderr { .. } => ChannelKind::Stderr,
            Event::Close { .. } => ChannelKind::Close,
        }
    }

    pub fn channel(&self) -> String {
        channel_name(self.kind(), self.name())
    }

    /// Payload delivered to the UI alongside the channel name.
    pub fn payload(&self) -> Value {
        match self {
            Event::Stdout { chunk, .. } => Value::String(chunk.clone()),
            Event::Stderr { text, .. } => Value::String(text.clone()),
            Event::Close { pid, code, .. } => json!({ "pid": pid, "code": code }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_are_namespaced_by_process() {
        let a = Event::Stdout {
            name: "setup".into(),
            pid: 1,
            chunk: "x".into(),
        };
        let b = Event::Stdout {
            name: "run".into(),
            pid: 2,
            chunk: "x".into(),
        };
        assert_eq!(a.channel(), "process-stdout:setup");
        assert_ne!(a.channel(), b.channel());
        assert_eq!(channel_name(ChannelKind::Close, "run"), "process-close:run");
    }

    #[test]
    fn close_payload_carries_code() {
        let event = Event::Close {
            name: "run".into(),
            pid: 42,
            code: None,
        };
        assert_eq!(event.payload(), json!({ "pid": 42, "code": null }));
    }
}

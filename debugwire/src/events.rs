// debugwire event handling
//
// Events are sent from the debuggee to notify about breakpoints, watches and state changes.

use crate::protocol::{WireError, WireResult};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State transitions that can be subscribed to independently of any location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKind {
    ThreadStart,
    ThreadDeath,
    ClassPrepare,
    MonitorContendedEnter,
    MonitorContendedEntered,
    MonitorWait,
    MonitorWaited,
    GcStart,
    GcFinish,
    UsageThresholdExceeded,
}

impl StateKind {
    pub const ALL: [StateKind; 10] = [
        StateKind::ThreadStart,
        StateKind::ThreadDeath,
        StateKind::ClassPrepare,
        StateKind::MonitorContendedEnter,
        StateKind::MonitorContendedEntered,
        StateKind::MonitorWait,
        StateKind::MonitorWaited,
        StateKind::GcStart,
        StateKind::GcFinish,
        StateKind::UsageThresholdExceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::ThreadStart => "ThreadStart",
            StateKind::ThreadDeath => "ThreadDeath",
            StateKind::ClassPrepare => "ClassPrepare",
            StateKind::MonitorContendedEnter => "MonitorContendedEnter",
            StateKind::MonitorContendedEntered => "MonitorContendedEntered",
            StateKind::MonitorWait => "MonitorWait",
            StateKind::MonitorWaited => "MonitorWaited",
            StateKind::GcStart => "GcStart",
            StateKind::GcFinish => "GcFinish",
            StateKind::UsageThresholdExceeded => "UsageThresholdExceeded",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKind {
    type Err = WireError;

    fn from_str(s: &str) -> WireResult<Self> {
        StateKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| WireError::Protocol(format!("Unknown state kind: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Breakpoint,
    FieldAccess,
    FieldModification,
    MethodEntry,
    MethodExit,
    /// A thread parked at a checkpoint after a `suspend` command
    ThreadSuspended,
    State(StateKind),
}

impl From<EntryKind> for EventKind {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::Breakpoint => EventKind::Breakpoint,
            EntryKind::FieldAccess => EventKind::FieldAccess,
            EntryKind::FieldModification => EventKind::FieldModification,
            EntryKind::MethodEntry => EventKind::MethodEntry,
            EntryKind::MethodExit => EventKind::MethodExit,
        }
    }
}

impl From<StateKind> for EventKind {
    fn from(kind: StateKind) -> Self {
        EventKind::State(kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Breakpoint => f.write_str("Breakpoint hit"),
            EventKind::FieldAccess => f.write_str("Field access"),
            EventKind::FieldModification => f.write_str("Field modification"),
            EventKind::MethodEntry => f.write_str("Method entered"),
            EventKind::MethodExit => f.write_str("Method exited"),
            EventKind::ThreadSuspended => f.write_str("Thread suspended"),
            EventKind::State(state) => f.write_str(state.as_str()),
        }
    }
}

/// A single notification describing a fired trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub sequence_id: SequenceId,
    pub kind: EventKind,
    pub thread: ThreadId,
    pub location: Option<Location>,
    /// Ordered key/value pairs (captured locals, monitor names, byte counts)
    pub payload: Vec<(String, String)>,
}

impl EventFrame {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.payload
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_at(&self, location: &Location) -> bool {
        self.location.as_ref() == Some(location)
    }
}

impl fmt::Display for EventFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.sequence_id, self.kind)?;
        if let Some(location) = &self.location {
            write!(f, ": {}", location)?;
        }
        write!(f, " thread={}", self.thread)?;
        for (key, value) in &self.payload {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

// debugwire: breakpoint and watchpoint event protocol
//
// Two halves of a small debugging protocol over one framed channel:
// - Debuggee side: session, registry, runtime hook, agent
// - Driver side: connection, event loop, scripted driver
// - Shared: frame codec, command verbs, sync primitives

pub mod agent;
pub mod channel;
pub mod commands;
pub mod config;
pub mod connection;
pub mod driver;
pub mod eventloop;
pub mod eventrequest;
pub mod events;
pub mod hook;
pub mod monitor;
mod poison;
pub mod pool;
pub mod protocol;
pub mod reader;
pub mod registry;
pub mod session;
pub mod thread;
pub mod transcript;
pub mod types;
pub mod wicket;

pub use agent::DebuggeeAgent;
pub use commands::{Command, WatchMode};
pub use config::WireConfig;
pub use connection::DriverConnection;
pub use driver::Driver;
pub use events::{EventFrame, EventKind, StateKind};
pub use hook::{Decision, HitOutcome, RuntimeHook, ThreadGuard, TriggerListener};
pub use protocol::{ReplyFrame, ReplyStatus, WireError, WireResult};
pub use registry::{DuplicatePolicy, EventRegistry};
pub use session::DebugSession;
pub use types::{EntryKind, Location, SuspendPolicy, ThreadId, Value};
pub use wicket::{Wicket, WicketState};

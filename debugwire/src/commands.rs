// debugwire command set
//
// Every command has a single-line text form `<verb> <argument>`:
//   stop_at [go|thread] <Class:line | Class.method>
//   stop_exit [go|thread] <Class.method>
//   clear <location>
//   clearAll
//   cont [thread]
//   watch [go|thread] [access|all] <Class.field>
//   unwatch [access|all] <Class.field>
//   suspend <thread>
//   resume <thread>
//   popFrame <thread>
//   list
//   subscribe [go|thread] <StateKind>
//   unsubscribe <StateKind>

use crate::events::StateKind;
use crate::protocol::{WireError, WireResult};
use crate::types::{EntryKind, Location, SuspendPolicy, ThreadId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Command verbs
pub mod verbs {
    pub const STOP_AT: &str = "stop_at";
    pub const STOP_EXIT: &str = "stop_exit";
    pub const CLEAR: &str = "clear";
    pub const CLEAR_ALL: &str = "clearAll";
    pub const CONT: &str = "cont";
    pub const WATCH: &str = "watch";
    pub const UNWATCH: &str = "unwatch";
    pub const SUSPEND: &str = "suspend";
    pub const RESUME: &str = "resume";
    pub const POP_FRAME: &str = "popFrame";
    pub const LIST: &str = "list";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
}

// Policy and watch-mode modifiers
mod modifiers {
    pub const GO: &str = "go";
    pub const THREAD: &str = "thread";
    pub const ACCESS: &str = "access";
    pub const ALL: &str = "all";
}

/// Which field events a watch covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    #[default]
    Modification,
    Access,
    All,
}

impl WatchMode {
    pub fn kinds(&self) -> &'static [EntryKind] {
        match self {
            WatchMode::Modification => &[EntryKind::FieldModification],
            WatchMode::Access => &[EntryKind::FieldAccess],
            WatchMode::All => &[EntryKind::FieldAccess, EntryKind::FieldModification],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum Command {
    StopAt {
        location: Location,
        policy: SuspendPolicy,
    },
    StopExit {
        location: Location,
        policy: SuspendPolicy,
    },
    Clear {
        location: Location,
    },
    ClearAll,
    Cont {
        thread: Option<ThreadId>,
    },
    Watch {
        field: Location,
        mode: WatchMode,
        policy: SuspendPolicy,
    },
    Unwatch {
        field: Location,
        mode: WatchMode,
    },
    Suspend {
        thread: ThreadId,
    },
    Resume {
        thread: ThreadId,
    },
    PopFrame {
        thread: ThreadId,
    },
    List,
    Subscribe {
        kind: StateKind,
        policy: SuspendPolicy,
    },
    Unsubscribe {
        kind: StateKind,
    },
}

impl Command {
    pub fn stop_at(location: Location) -> Self {
        Command::StopAt {
            location,
            policy: SuspendPolicy::EventThread,
        }
    }

    pub fn clear(location: Location) -> Self {
        Command::Clear { location }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::StopAt { .. } => verbs::STOP_AT,
            Command::StopExit { .. } => verbs::STOP_EXIT,
            Command::Clear { .. } => verbs::CLEAR,
            Command::ClearAll => verbs::CLEAR_ALL,
            Command::Cont { .. } => verbs::CONT,
            Command::Watch { .. } => verbs::WATCH,
            Command::Unwatch { .. } => verbs::UNWATCH,
            Command::Suspend { .. } => verbs::SUSPEND,
            Command::Resume { .. } => verbs::RESUME,
            Command::PopFrame { .. } => verbs::POP_FRAME,
            Command::List => verbs::LIST,
            Command::Subscribe { .. } => verbs::SUBSCRIBE,
            Command::Unsubscribe { .. } => verbs::UNSUBSCRIBE,
        }
    }

    pub fn argument(&self) -> String {
        match self {
            Command::StopAt { location, policy } | Command::StopExit { location, policy } => {
                format!("{}{}", policy_prefix(*policy, SuspendPolicy::EventThread), location)
            }
            Command::Clear { location } => location.to_string(),
            Command::ClearAll | Command::List => String::new(),
            Command::Cont { thread } => thread.map(|t| t.to_string()).unwrap_or_default(),
            Command::Watch {
                field,
                mode,
                policy,
            } => format!(
                "{}{}{}",
                policy_prefix(*policy, SuspendPolicy::EventThread),
                mode_prefix(*mode),
                field_text(field)
            ),
            Command::Unwatch { field, mode } => {
                format!("{}{}", mode_prefix(*mode), field_text(field))
            }
            Command::Suspend { thread }
            | Command::Resume { thread }
            | Command::PopFrame { thread } => thread.to_string(),
            Command::Subscribe { kind, policy } => {
                format!("{}{}", policy_prefix(*policy, SuspendPolicy::None), kind)
            }
            Command::Unsubscribe { kind } => kind.to_string(),
        }
    }

    /// Parse a single command line
    pub fn parse(line: &str) -> WireResult<Self> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let mut tokens: Vec<&str> = rest.split_whitespace().collect();

        let command = match verb {
            verbs::STOP_AT | verbs::STOP_EXIT => {
                let policy = take_policy(&mut tokens, SuspendPolicy::EventThread);
                let location: Location = single(verb, &tokens)?.parse()?;
                if verb == verbs::STOP_AT {
                    if matches!(location, Location::Field { .. }) {
                        return Err(WireError::Protocol(format!(
                            "Use watch for field locations: {}",
                            location
                        )));
                    }
                    Command::StopAt { location, policy }
                } else {
                    if !matches!(location, Location::Method { .. }) {
                        return Err(WireError::Protocol(format!(
                            "stop_exit needs a <class>.<method_name> location: {}",
                            location
                        )));
                    }
                    Command::StopExit { location, policy }
                }
            }
            verbs::CLEAR => Command::Clear {
                location: single(verb, &tokens)?.parse()?,
            },
            verbs::CLEAR_ALL => {
                none(verb, &tokens)?;
                Command::ClearAll
            }
            verbs::LIST => {
                none(verb, &tokens)?;
                Command::List
            }
            verbs::CONT => match tokens.as_slice() {
                [] => Command::Cont { thread: None },
                [thread] => Command::Cont {
                    thread: Some(parse_thread(thread)?),
                },
                _ => return Err(extra_tokens(verb)),
            },
            verbs::WATCH => {
                let policy = take_policy(&mut tokens, SuspendPolicy::EventThread);
                let mode = take_mode(&mut tokens);
                Command::Watch {
                    field: Location::parse_field(single(verb, &tokens)?)?,
                    mode,
                    policy,
                }
            }
            verbs::UNWATCH => {
                let mode = take_mode(&mut tokens);
                Command::Unwatch {
                    field: Location::parse_field(single(verb, &tokens)?)?,
                    mode,
                }
            }
            verbs::SUSPEND => Command::Suspend {
                thread: parse_thread(single(verb, &tokens)?)?,
            },
            verbs::RESUME => Command::Resume {
                thread: parse_thread(single(verb, &tokens)?)?,
            },
            verbs::POP_FRAME => Command::PopFrame {
                thread: parse_thread(single(verb, &tokens)?)?,
            },
            verbs::SUBSCRIBE => {
                let policy = take_policy(&mut tokens, SuspendPolicy::None);
                Command::Subscribe {
                    kind: single(verb, &tokens)?.parse()?,
                    policy,
                }
            }
            verbs::UNSUBSCRIBE => Command::Unsubscribe {
                kind: single(verb, &tokens)?.parse()?,
            },
            "" => return Err(WireError::Protocol("Empty command".to_string())),
            other => return Err(WireError::Protocol(format!("Unrecognized command: {}", other))),
        };

        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let argument = self.argument();
        if argument.is_empty() {
            f.write_str(self.verb())
        } else {
            write!(f, "{} {}", self.verb(), argument)
        }
    }
}

impl FromStr for Command {
    type Err = WireError;

    fn from_str(s: &str) -> WireResult<Self> {
        Command::parse(s)
    }
}

fn policy_prefix(policy: SuspendPolicy, default: SuspendPolicy) -> &'static str {
    if policy == default {
        return "";
    }
    match policy {
        SuspendPolicy::None => "go ",
        SuspendPolicy::EventThread => "thread ",
    }
}

fn mode_prefix(mode: WatchMode) -> &'static str {
    match mode {
        WatchMode::Modification => "",
        WatchMode::Access => "access ",
        WatchMode::All => "all ",
    }
}

fn field_text(field: &Location) -> String {
    field.field_spec().unwrap_or_else(|| field.to_string())
}

// Leading modifiers are only taken when something follows them
fn take_policy(tokens: &mut Vec<&str>, default: SuspendPolicy) -> SuspendPolicy {
    if tokens.len() > 1 {
        match tokens[0] {
            modifiers::GO => {
                tokens.remove(0);
                return SuspendPolicy::None;
            }
            modifiers::THREAD => {
                tokens.remove(0);
                return SuspendPolicy::EventThread;
            }
            _ => {}
        }
    }
    default
}

fn take_mode(tokens: &mut Vec<&str>) -> WatchMode {
    if tokens.len() > 1 {
        match tokens[0] {
            modifiers::ACCESS => {
                tokens.remove(0);
                return WatchMode::Access;
            }
            modifiers::ALL => {
                tokens.remove(0);
                return WatchMode::All;
            }
            _ => {}
        }
    }
    WatchMode::Modification
}

fn single<'a>(verb: &str, tokens: &[&'a str]) -> WireResult<&'a str> {
    match tokens {
        [one] => Ok(*one),
        [] => Err(WireError::Protocol(format!("Missing argument for {}", verb))),
        _ => Err(extra_tokens(verb)),
    }
}

fn none(verb: &str, tokens: &[&str]) -> WireResult<()> {
    if tokens.is_empty() {
        Ok(())
    } else {
        Err(extra_tokens(verb))
    }
}

fn extra_tokens(verb: &str) -> WireError {
    WireError::Protocol(format!("Extra tokens after {}", verb))
}

fn parse_thread(token: &str) -> WireResult<ThreadId> {
    token
        .parse::<ThreadId>()
        .map_err(|_| WireError::Protocol(format!("Invalid <thread_id>: {}", token)))
}

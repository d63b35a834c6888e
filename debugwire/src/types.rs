// debugwire type definitions
//
// Common types shared by the debuggee and driver sides

use crate::protocol::{WireError, WireResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Thread ids are handed out by the debuggee session
pub type ThreadId = u64;
pub type SequenceId = u64;
pub type CommandId = u32;
pub type EntryId = u32;

/// A program point. Immutable once created; used as the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Location {
    Line { class: String, line: u32 },
    Method { class: String, method: String },
    Field { class: String, field: String },
}

impl Location {
    pub fn line(class: impl Into<String>, line: u32) -> Self {
        Location::Line {
            class: class.into(),
            line,
        }
    }

    pub fn method(class: impl Into<String>, method: impl Into<String>) -> Self {
        Location::Method {
            class: class.into(),
            method: method.into(),
        }
    }

    pub fn field(class: impl Into<String>, field: impl Into<String>) -> Self {
        Location::Field {
            class: class.into(),
            field: field.into(),
        }
    }

    pub fn class(&self) -> &str {
        match self {
            Location::Line { class, .. }
            | Location::Method { class, .. }
            | Location::Field { class, .. } => class,
        }
    }

    /// jdb-style `Class.field` form used by the watch verbs
    pub fn parse_field(spec: &str) -> WireResult<Self> {
        match spec.rsplit_once('.') {
            Some((class, field)) if !class.is_empty() && !field.is_empty() => {
                Ok(Location::field(class, field))
            }
            _ => Err(WireError::Protocol(format!(
                "Class containing field must be specified: {}",
                spec
            ))),
        }
    }

    pub fn field_spec(&self) -> Option<String> {
        match self {
            Location::Field { class, field } => Some(format!("{}.{}", class, field)),
            _ => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Line { class, line } => write!(f, "{}:{}", class, line),
            Location::Method { class, method } => write!(f, "{}.{}", class, method),
            Location::Field { class, field } => write!(f, "{}#{}", class, field),
        }
    }
}

impl FromStr for Location {
    type Err = WireError;

    /// Accepts `Class:42`, `Class.method` and `Class#field`
    fn from_str(s: &str) -> WireResult<Self> {
        let s = s.trim();

        if let Some((class, line)) = s.rsplit_once(':') {
            let line = line
                .parse::<u32>()
                .map_err(|_| WireError::Protocol(format!("Invalid line number specified: {}", line)))?;
            if class.is_empty() {
                return Err(WireError::Protocol(format!("Missing class in location: {}", s)));
            }
            return Ok(Location::line(class, line));
        }

        if let Some((class, field)) = s.split_once('#') {
            if class.is_empty() || field.is_empty() {
                return Err(WireError::Protocol(format!("Invalid field location: {}", s)));
            }
            return Ok(Location::field(class, field));
        }

        // No dot, dot in first char, or dot in last char are all rejected
        match s.rfind('.') {
            Some(idot) if idot > 0 && idot < s.len() - 1 => {
                Ok(Location::method(&s[..idot], &s[idot + 1..]))
            }
            _ => Err(WireError::Protocol(format!(
                "Invalid <class>.<method_name> specification: {}",
                s
            ))),
        }
    }
}

/// What a registry entry triggers on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Breakpoint,
    FieldAccess,
    FieldModification,
    MethodEntry,
    MethodExit,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Breakpoint => "breakpoint",
            EntryKind::FieldAccess => "access watch",
            EntryKind::FieldModification => "modification watch",
            EntryKind::MethodEntry => "method entry",
            EntryKind::MethodExit => "method exit",
        }
    }

    pub fn is_watch(&self) -> bool {
        matches!(self, EntryKind::FieldAccess | EntryKind::FieldModification)
    }

    /// The entry kind a `stop_at` on this location creates
    pub fn for_stop_at(location: &Location) -> Self {
        match location {
            Location::Method { .. } => EntryKind::MethodEntry,
            _ => EntryKind::Breakpoint,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suspend policy for triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendPolicy {
    /// Report the event and keep running (`go`)
    None,
    /// Park only the thread that hit the trigger
    #[default]
    EventThread,
}

// Captured local or field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Boolean(bool),
    Double(f64),
    Str(String),
    Null,
}

impl Value {
    /// Format value for display
    pub fn format(&self) -> String {
        match self {
            Value::Int(v) => format!("(int) {}", v),
            Value::Boolean(v) => format!("(boolean) {}", v),
            Value::Double(v) => format!("(double) {}", v),
            Value::Str(v) => format!("(string) \"{}\"", v),
            Value::Null => "(object) null".to_string(),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_parse_forms() {
        assert_eq!("Demo:63".parse::<Location>().unwrap(), Location::line("Demo", 63));
        assert_eq!(
            "nsk.jdb.clear.clear004a:67".parse::<Location>().unwrap(),
            Location::line("nsk.jdb.clear.clear004a", 67)
        );
        assert_eq!(
            "com.example.Demo.run".parse::<Location>().unwrap(),
            Location::method("com.example.Demo", "run")
        );
        assert_eq!(
            "Demo#counter".parse::<Location>().unwrap(),
            Location::field("Demo", "counter")
        );
    }

    #[test]
    fn test_location_parse_rejects_bad_specs() {
        assert!("Demo:abc".parse::<Location>().is_err());
        assert!(":12".parse::<Location>().is_err());
        assert!("Demo".parse::<Location>().is_err());
        assert!(".run".parse::<Location>().is_err());
        assert!("Demo.".parse::<Location>().is_err());
    }

    #[test]
    fn test_location_display_parses_back() {
        for loc in [
            Location::line("a.b.C", 1),
            Location::method("a.b.C", "m"),
            Location::field("a.b.C", "f"),
        ] {
            assert_eq!(loc.to_string().parse::<Location>().unwrap(), loc);
        }
    }

    #[test]
    fn test_field_spec() {
        let loc = Location::parse_field("pkg.Demo.counter").unwrap();
        assert_eq!(loc, Location::field("pkg.Demo", "counter"));
        assert_eq!(loc.field_spec().as_deref(), Some("pkg.Demo.counter"));
        assert!(Location::parse_field("counter").is_err());
    }

    #[test]
    fn test_value_format() {
        assert_eq!(Value::Int(3).format(), "(int) 3");
        assert_eq!(Value::Null.format(), "(object) null");
        assert_eq!(Value::from("x").format(), "(string) \"x\"");
    }
}

// Session transcript
//
// Everything a driver sent and received, in order. Dumped on failure so a
// failing scenario explains itself.

use crate::commands::Command;
use crate::events::{EventFrame, EventKind};
use crate::protocol::ReplyFrame;
use crate::types::Location;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEntry {
    Sent { id: u32, command: Command },
    Reply(ReplyFrame),
    Event(EventFrame),
    Note(String),
}

impl fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptEntry::Sent { id, command } => write!(f, "> #{} {}", id, command),
            TranscriptEntry::Reply(reply) => write!(f, "< {}", reply),
            TranscriptEntry::Event(event) => write!(f, "* {}", event),
            TranscriptEntry::Note(note) => write!(f, "# {}", note),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, id: u32, command: &Command) {
        self.entries.push(TranscriptEntry::Sent {
            id,
            command: command.clone(),
        });
    }

    pub fn record_reply(&mut self, reply: &ReplyFrame) {
        self.entries.push(TranscriptEntry::Reply(reply.clone()));
    }

    pub fn record_event(&mut self, event: &EventFrame) {
        self.entries.push(TranscriptEntry::Event(event.clone()));
    }

    pub fn note(&mut self, text: impl Into<String>) {
        self.entries.push(TranscriptEntry::Note(text.into()));
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn events(&self) -> impl Iterator<Item = &EventFrame> {
        self.entries.iter().filter_map(|entry| match entry {
            TranscriptEntry::Event(event) => Some(event),
            _ => None,
        })
    }

    /// Events of `kind`, optionally restricted to one location
    pub fn count_events(&self, kind: EventKind, location: Option<&Location>) -> usize {
        self.events()
            .filter(|e| e.kind == kind)
            .filter(|e| location.map_or(true, |loc| e.is_at(loc)))
            .count()
    }

    /// Lines of the rendered transcript containing `needle`
    pub fn count_matching(&self, needle: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.to_string().contains(needle))
            .count()
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breakpoint(sequence_id: u64, line: u32) -> EventFrame {
        EventFrame {
            sequence_id,
            kind: EventKind::Breakpoint,
            thread: 1,
            location: Some(Location::line("Demo", line)),
            payload: Vec::new(),
        }
    }

    #[test]
    fn test_counts_and_render() {
        let mut transcript = Transcript::new();
        transcript.record_sent(1, &Command::stop_at(Location::line("Demo", 63)));
        transcript.record_reply(&ReplyFrame::ack(1, "Set breakpoint Demo:63"));
        transcript.record_event(&breakpoint(1, 63));
        transcript.record_event(&breakpoint(2, 71));
        transcript.note("done");

        assert_eq!(transcript.count_events(EventKind::Breakpoint, None), 2);
        assert_eq!(
            transcript.count_events(EventKind::Breakpoint, Some(&Location::line("Demo", 71))),
            1
        );
        assert_eq!(
            transcript.count_events(EventKind::Breakpoint, Some(&Location::line("Demo", 67))),
            0
        );
        assert_eq!(transcript.count_matching("Demo:63"), 3);

        let rendered = transcript.render();
        assert!(rendered.starts_with("> #1 stop_at Demo:63\n< "));
        assert!(rendered.ends_with("# done"));
        assert_eq!(transcript.len(), 5);
    }
}

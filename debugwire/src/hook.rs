// Debuggee runtime hook
//
// The entry points instrumented code calls at program points. Calls block the
// calling OS thread while it is parked, so they must never run on an async
// runtime worker.

use crate::events::StateKind;
use crate::session::DebugSession;
use crate::types::{EntryKind, Location, ThreadId, Value};
use std::sync::Arc;
use tracing::trace;

/// What an instrumented point should do after reporting a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Suspend,
    Ignore,
}

/// Observer invoked at each instrumented program point
pub trait TriggerListener: Send + Sync {
    fn on_trigger(&self, location: &Location, thread: ThreadId) -> Decision;
}

/// How a hook call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOutcome {
    /// No entry or subscription matched
    Ignored,
    /// An event was sent and the thread kept running
    Notified,
    /// Parked, then resumed by `cont` or `resume`
    Continued,
    /// Parked, then resumed by `popFrame`; the caller should re-run the method
    FramePopped,
    /// Parked, then released by session close or the resume timeout
    Released,
}

impl HitOutcome {
    pub fn decision(&self) -> Decision {
        match self {
            HitOutcome::Ignored => Decision::Ignore,
            _ => Decision::Suspend,
        }
    }

    pub fn was_parked(&self) -> bool {
        matches!(
            self,
            HitOutcome::Continued | HitOutcome::FramePopped | HitOutcome::Released
        )
    }
}

fn capture(values: &[(&str, Value)]) -> Vec<(String, String)> {
    values
        .iter()
        .map(|(name, value)| (name.to_string(), value.format()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct RuntimeHook {
    session: Arc<DebugSession>,
}

impl RuntimeHook {
    pub(crate) fn new(session: Arc<DebugSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<DebugSession> {
        &self.session
    }

    /// Report that `thread` reached `location`; blocks while parked
    pub fn hit(&self, location: &Location, kind: EntryKind, thread: ThreadId) -> HitOutcome {
        self.session.trigger(location, kind, thread, Vec::new())
    }

    /// Line breakpoint check with captured locals
    pub fn breakpoint(
        &self,
        location: &Location,
        thread: ThreadId,
        locals: &[(&str, Value)],
    ) -> HitOutcome {
        trace!("Thread {} at {}", thread, location);
        self.session
            .trigger(location, EntryKind::Breakpoint, thread, capture(locals))
    }

    pub fn line(
        &self,
        class: &str,
        line: u32,
        thread: ThreadId,
        locals: &[(&str, Value)],
    ) -> HitOutcome {
        self.breakpoint(&Location::line(class, line), thread, locals)
    }

    pub fn method_entry(&self, class: &str, method: &str, thread: ThreadId) -> HitOutcome {
        self.hit(&Location::method(class, method), EntryKind::MethodEntry, thread)
    }

    pub fn method_exit(
        &self,
        class: &str,
        method: &str,
        thread: ThreadId,
        return_value: Value,
    ) -> HitOutcome {
        let payload = vec![("return".to_string(), return_value.format())];
        self.session.trigger(
            &Location::method(class, method),
            EntryKind::MethodExit,
            thread,
            payload,
        )
    }

    pub fn field_access(
        &self,
        class: &str,
        field: &str,
        thread: ThreadId,
        current: Value,
    ) -> HitOutcome {
        let payload = vec![("value".to_string(), current.format())];
        self.session.trigger(
            &Location::field(class, field),
            EntryKind::FieldAccess,
            thread,
            payload,
        )
    }

    pub fn field_modification(
        &self,
        class: &str,
        field: &str,
        thread: ThreadId,
        old: Value,
        new: Value,
    ) -> HitOutcome {
        let payload = vec![
            ("old".to_string(), old.format()),
            ("new".to_string(), new.format()),
        ];
        self.session.trigger(
            &Location::field(class, field),
            EntryKind::FieldModification,
            thread,
            payload,
        )
    }

    /// Emit a runtime state event if the driver subscribed to `kind`
    pub fn state(&self, kind: StateKind, thread: ThreadId, payload: &[(&str, String)]) -> HitOutcome {
        let payload = payload
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.session.state_event(kind, thread, payload)
    }

    pub fn class_prepare(&self, class: &str, thread: ThreadId) -> HitOutcome {
        self.state(StateKind::ClassPrepare, thread, &[("class", class.to_string())])
    }

    /// A point where a pending `suspend` takes effect
    pub fn checkpoint(&self, thread: ThreadId) -> HitOutcome {
        self.session.checkpoint(thread)
    }

    /// Park until the driver continues; used to hold a program at startup
    pub fn suspend_here(&self, thread: ThreadId) -> HitOutcome {
        self.session.suspend_here(thread, "start")
    }

    /// Register the calling thread. ThreadStart fires now, ThreadDeath on drop.
    pub fn register_thread(&self, name: &str) -> ThreadGuard {
        let id = self.session.register_thread(name);
        self.state(StateKind::ThreadStart, id, &[("name", name.to_string())]);
        ThreadGuard {
            hook: self.clone(),
            id,
        }
    }
}

impl TriggerListener for RuntimeHook {
    fn on_trigger(&self, location: &Location, thread: ThreadId) -> Decision {
        let kind = EntryKind::for_stop_at(location);
        self.hit(location, kind, thread).decision()
    }
}

/// A registered debuggee thread
#[derive(Debug)]
pub struct ThreadGuard {
    hook: RuntimeHook,
    id: ThreadId,
}

impl ThreadGuard {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn hook(&self) -> &RuntimeHook {
        &self.hook
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        self.hook.state(StateKind::ThreadDeath, self.id, &[]);
        self.hook.session.unregister_thread(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WireConfig;
    use crate::events::EventKind;
    use crate::protocol::Frame;
    use crate::types::SuspendPolicy;

    #[test]
    fn test_unmatched_point_is_ignored() {
        let session = DebugSession::new(WireConfig::default());
        let hook = session.hook();
        assert_eq!(hook.line("Demo", 10, 1, &[]), HitOutcome::Ignored);
        assert_eq!(hook.class_prepare("Demo", 1), HitOutcome::Ignored);
        assert_eq!(session.events_emitted(), 0);
    }

    #[test]
    fn test_listener_decision() {
        let session = DebugSession::new(WireConfig::default());
        session
            .registry()
            .add(Location::line("Demo", 5), EntryKind::Breakpoint, SuspendPolicy::None)
            .unwrap();

        let listener: &dyn TriggerListener = &session.hook();
        assert_eq!(listener.on_trigger(&Location::line("Demo", 5), 1), Decision::Suspend);
        assert_eq!(listener.on_trigger(&Location::line("Demo", 6), 1), Decision::Ignore);
    }

    #[test]
    fn test_locals_and_field_payloads() {
        let session = DebugSession::new(WireConfig::default());
        let mut rx = session.take_outbound().unwrap();
        let hook = session.hook();
        session
            .registry()
            .add(Location::line("Demo", 71), EntryKind::Breakpoint, SuspendPolicy::None)
            .unwrap();
        session
            .registry()
            .add(Location::field("Demo", "counter"), EntryKind::FieldModification, SuspendPolicy::None)
            .unwrap();

        hook.line("Demo", 71, 1, &[("i", Value::Int(2))]);
        hook.field_modification("Demo", "counter", 1, Value::Int(0), Value::Int(1));

        let Frame::Event(first) = rx.try_recv().unwrap() else {
            panic!("expected event");
        };
        assert_eq!(first.get("i"), Some("(int) 2"));

        let Frame::Event(second) = rx.try_recv().unwrap() else {
            panic!("expected event");
        };
        assert_eq!(second.kind, EventKind::FieldModification);
        assert_eq!(second.get("old"), Some("(int) 0"));
        assert_eq!(second.get("new"), Some("(int) 1"));
        assert_eq!(second.sequence_id, 2);
    }

    #[test]
    fn test_thread_guard_lifecycle_events() {
        let session = DebugSession::new(WireConfig::default());
        let mut rx = session.take_outbound().unwrap();
        session.registry().subscribe(StateKind::ThreadStart, SuspendPolicy::None);
        session.registry().subscribe(StateKind::ThreadDeath, SuspendPolicy::None);

        let id = {
            let guard = session.hook().register_thread("worker-1");
            assert_eq!(session.thread_name(guard.id()).as_deref(), Some("worker-1"));
            guard.id()
        };
        assert!(session.thread_name(id).is_none());

        let kinds: Vec<EventKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|frame| match frame {
                Frame::Event(event) => Some(event.kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::State(StateKind::ThreadStart),
                EventKind::State(StateKind::ThreadDeath)
            ]
        );
    }
}

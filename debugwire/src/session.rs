// Debuggee session
//
// Owns everything the debuggee side shares between instrumented threads and
// the agent: the registry, the event sequence counter, parked threads and the
// outbound frame queue. Lock order is registry, then threads.

use crate::commands::Command;
use crate::config::WireConfig;
use crate::events::{EventFrame, EventKind, StateKind};
use crate::hook::{HitOutcome, RuntimeHook};
use crate::poison;
use crate::protocol::{CommandFrame, Frame, ReplyFrame};
use crate::registry::{Entries, EventRegistry};
use crate::types::{CommandId, EntryKind, Location, SequenceId, SuspendPolicy, ThreadId};
use crate::wicket::Wicket;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParkReason {
    Event,
    Suspend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resumption {
    Continue,
    PopFrame,
}

#[derive(Debug)]
struct Parked {
    wicket: Arc<Wicket>,
    reason: ParkReason,
    resumption: Option<Resumption>,
}

impl Parked {
    fn release(&mut self, resumption: Resumption) -> bool {
        if self.resumption.is_some() {
            return false;
        }
        self.resumption = Some(resumption);
        self.wicket.unlock();
        true
    }
}

#[derive(Debug, Default)]
struct Threads {
    names: HashMap<ThreadId, String>,
    parked: HashMap<ThreadId, Parked>,
    pending_suspend: HashSet<ThreadId>,
    closed: bool,
}

#[derive(Debug)]
pub struct DebugSession {
    registry: EventRegistry,
    sequence: AtomicU64,
    next_thread: AtomicU64,
    pending_suspends: AtomicUsize,
    threads: Mutex<Threads>,
    outbound: mpsc::UnboundedSender<Frame>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    closed: CancellationToken,
    config: WireConfig,
}

impl DebugSession {
    pub fn new(config: WireConfig) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            registry: EventRegistry::new(config.duplicate_policy),
            sequence: AtomicU64::new(0),
            next_thread: AtomicU64::new(1),
            pending_suspends: AtomicUsize::new(0),
            threads: Mutex::new(Threads::default()),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            closed: CancellationToken::new(),
            config,
        })
    }

    /// Handle for instrumented code
    pub fn hook(self: &Arc<Self>) -> RuntimeHook {
        RuntimeHook::new(self.clone())
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn config(&self) -> &WireConfig {
        &self.config
    }

    /// Number of event frames emitted so far (the last sequence id)
    pub fn events_emitted(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// The queue of frames bound for the driver. Can be taken once.
    pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<Frame>> {
        poison::lock(&self.outbound_rx, "session.outbound").take()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Mark the session closed and release every parked thread
    pub fn close(&self) {
        let mut threads = poison::lock(&self.threads, "session.close");
        if threads.closed {
            return;
        }
        threads.closed = true;
        self.closed.cancel();

        threads.pending_suspend.clear();
        self.pending_suspends.store(0, Ordering::SeqCst);
        for parked in threads.parked.values() {
            parked.wicket.unlock_all();
        }
        info!(
            "Session closed; released {} parked thread(s)",
            threads.parked.len()
        );
    }

    pub fn register_thread(&self, name: &str) -> ThreadId {
        let id = self.next_thread.fetch_add(1, Ordering::SeqCst);
        poison::lock(&self.threads, "session.register_thread")
            .names
            .insert(id, name.to_string());
        debug!("Registered thread {} ({})", id, name);
        id
    }

    pub(crate) fn unregister_thread(&self, thread: ThreadId) {
        let mut threads = poison::lock(&self.threads, "session.unregister_thread");
        threads.names.remove(&thread);
        if threads.pending_suspend.remove(&thread) {
            self.pending_suspends.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn thread_name(&self, thread: ThreadId) -> Option<String> {
        poison::lock(&self.threads, "session.thread_name")
            .names
            .get(&thread)
            .cloned()
    }

    /// Threads currently parked, in id order
    pub fn suspended_threads(&self) -> Vec<ThreadId> {
        let threads = poison::lock(&self.threads, "session.suspended_threads");
        let mut ids: Vec<ThreadId> = threads.parked.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // ---- instrumentation side ----

    pub(crate) fn trigger(
        &self,
        location: &Location,
        kind: EntryKind,
        thread: ThreadId,
        payload: Vec<(String, String)>,
    ) -> HitOutcome {
        self.checkpoint(thread);

        let (sequence_id, wicket) = {
            let mut entries = self.registry.locked();
            let hit = match entries.hit(location, kind) {
                Some(hit) => hit,
                None => return HitOutcome::Ignored,
            };
            let wicket = self.park_slot(hit.policy, thread, ParkReason::Event);
            let sequence_id = self.emit_locked(
                &entries,
                kind.into(),
                thread,
                Some(location.clone()),
                payload,
            );
            (sequence_id, wicket)
        };

        self.finish(thread, sequence_id, wicket)
    }

    pub(crate) fn state_event(
        &self,
        kind: StateKind,
        thread: ThreadId,
        payload: Vec<(String, String)>,
    ) -> HitOutcome {
        self.checkpoint(thread);

        let (sequence_id, wicket) = {
            let entries = self.registry.locked();
            let policy = match entries.subscription(kind) {
                Some(policy) => policy,
                None => return HitOutcome::Ignored,
            };
            let wicket = self.park_slot(policy, thread, ParkReason::Event);
            let sequence_id = self.emit_locked(&entries, kind.into(), thread, None, payload);
            (sequence_id, wicket)
        };

        self.finish(thread, sequence_id, wicket)
    }

    /// Park here if a `suspend` is pending for this thread
    pub(crate) fn checkpoint(&self, thread: ThreadId) -> HitOutcome {
        if self.pending_suspends.load(Ordering::SeqCst) == 0 {
            return HitOutcome::Ignored;
        }

        let (sequence_id, wicket) = {
            let entries = self.registry.locked();
            {
                let mut threads = poison::lock(&self.threads, "session.checkpoint");
                if !threads.pending_suspend.remove(&thread) {
                    return HitOutcome::Ignored;
                }
                self.pending_suspends.fetch_sub(1, Ordering::SeqCst);
            }
            let wicket = self.park_slot(SuspendPolicy::EventThread, thread, ParkReason::Suspend);
            let payload = vec![("reason".to_string(), "suspend".to_string())];
            let sequence_id =
                self.emit_locked(&entries, EventKind::ThreadSuspended, thread, None, payload);
            (sequence_id, wicket)
        };

        self.finish(thread, sequence_id, wicket)
    }

    /// Park the calling thread unconditionally, announcing it to the driver
    pub(crate) fn suspend_here(&self, thread: ThreadId, reason: &str) -> HitOutcome {
        let (sequence_id, wicket) = {
            let entries = self.registry.locked();
            let wicket = self.park_slot(SuspendPolicy::EventThread, thread, ParkReason::Suspend);
            let payload = vec![("reason".to_string(), reason.to_string())];
            let sequence_id =
                self.emit_locked(&entries, EventKind::ThreadSuspended, thread, None, payload);
            (sequence_id, wicket)
        };

        self.finish(thread, sequence_id, wicket)
    }

    // The registry guard proves the caller holds the lock, so sequence order
    // is queue order and no event can slip past a removal reply.
    fn emit_locked(
        &self,
        _entries: &Entries,
        kind: EventKind,
        thread: ThreadId,
        location: Option<Location>,
        payload: Vec<(String, String)>,
    ) -> SequenceId {
        let sequence_id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = EventFrame {
            sequence_id,
            kind,
            thread,
            location,
            payload,
        };
        debug!("Emitting {}", event);
        self.send(Frame::Event(event));
        sequence_id
    }

    fn send(&self, frame: Frame) {
        if self.outbound.send(frame).is_err() {
            debug!("Outbound queue closed, dropping frame");
        }
    }

    fn park_slot(
        &self,
        policy: SuspendPolicy,
        thread: ThreadId,
        reason: ParkReason,
    ) -> Option<Arc<Wicket>> {
        if policy == SuspendPolicy::None {
            return None;
        }

        let mut threads = poison::lock(&self.threads, "session.park_slot");
        if threads.closed {
            return None;
        }

        let wicket = Arc::new(Wicket::new());
        threads.parked.insert(
            thread,
            Parked {
                wicket: wicket.clone(),
                reason,
                resumption: None,
            },
        );
        Some(wicket)
    }

    fn finish(
        &self,
        thread: ThreadId,
        sequence_id: SequenceId,
        wicket: Option<Arc<Wicket>>,
    ) -> HitOutcome {
        let wicket = match wicket {
            Some(wicket) => wicket,
            None => return HitOutcome::Notified,
        };

        debug!("Thread {} parked after event #{}", thread, sequence_id);
        let timeout = self.config.resume_timeout();
        let released = wicket.wait_for(timeout);

        let parked = poison::lock(&self.threads, "session.finish")
            .parked
            .remove(&thread);

        match parked.and_then(|p| p.resumption) {
            Some(Resumption::Continue) => HitOutcome::Continued,
            Some(Resumption::PopFrame) => HitOutcome::FramePopped,
            None => {
                if released {
                    debug!("Thread {} released by session close", thread);
                } else {
                    warn!(
                        "Thread {} not resumed within {:?} after event #{}; releasing",
                        thread, timeout, sequence_id
                    );
                }
                HitOutcome::Released
            }
        }
    }

    // ---- command side ----

    /// Execute one command and queue its reply. Commands run in receipt order.
    pub fn handle_command(&self, frame: CommandFrame) {
        let CommandFrame { id, command } = frame;
        info!("Command #{}: {}", id, command);

        let mut entries = self.registry.locked();
        let reply = self.execute(&mut entries, id, command);
        debug!("Reply {}", reply);
        self.send(Frame::Reply(reply));
    }

    fn execute(&self, entries: &mut Entries, id: CommandId, command: Command) -> ReplyFrame {
        match command {
            Command::StopAt { location, policy } => {
                let kind = EntryKind::for_stop_at(&location);
                self.set_entry(entries, id, location, kind, policy)
            }
            Command::StopExit { location, policy } => {
                self.set_entry(entries, id, location, EntryKind::MethodExit, policy)
            }
            Command::Clear { location } => {
                if entries.remove(&location).is_empty() {
                    ReplyFrame::ack(id, format!("Not found: {}", location))
                } else {
                    ReplyFrame::removed(id, format!("Removed: {}", location))
                }
            }
            Command::ClearAll => match entries.remove_all() {
                0 => ReplyFrame::ack(id, "No breakpoints set."),
                n => ReplyFrame::removed(id, format!("Removed: {} entries", n)),
            },
            Command::Cont { thread } => self.cont(id, thread),
            Command::Watch {
                field,
                mode,
                policy,
            } => {
                let spec = field.field_spec().unwrap_or_else(|| field.to_string());
                if self.registry.duplicate_policy() == crate::registry::DuplicatePolicy::Reject {
                    if let Some(kind) = mode.kinds().iter().find(|k| entries.contains(&field, **k)) {
                        return ReplyFrame::error(
                            id,
                            format!("Duplicate entry: {} at {}", kind, spec),
                        );
                    }
                }

                let mut lines = Vec::new();
                for kind in mode.kinds() {
                    if let Err(e) = self.registry.add_locked(entries, field.clone(), *kind, policy) {
                        return ReplyFrame::error(id, e.to_string());
                    }
                    lines.push(format!("Set {} {}", kind, spec));
                }
                ReplyFrame::ack(id, lines.join("\n"))
            }
            Command::Unwatch { field, mode } => {
                let spec = field.field_spec().unwrap_or_else(|| field.to_string());
                let removed: Vec<String> = mode
                    .kinds()
                    .iter()
                    .filter_map(|kind| entries.remove_kind(&field, *kind))
                    .map(|entry| format!("Removed: {} {}", entry.kind, spec))
                    .collect();
                if removed.is_empty() {
                    ReplyFrame::ack(id, format!("Not found: {}", spec))
                } else {
                    ReplyFrame::removed(id, removed.join("\n"))
                }
            }
            Command::Suspend { thread } => self.suspend(id, thread),
            Command::Resume { thread } => self.resume(id, thread),
            Command::PopFrame { thread } => self.pop_frame(id, thread),
            Command::List => ReplyFrame::ack(id, describe(entries)),
            Command::Subscribe { kind, policy } => {
                entries.subscribe(kind, policy);
                ReplyFrame::ack(id, format!("Subscribed to {}", kind))
            }
            Command::Unsubscribe { kind } => {
                if entries.unsubscribe(kind) {
                    ReplyFrame::removed(id, format!("Removed: {}", kind))
                } else {
                    ReplyFrame::ack(id, format!("Not found: {}", kind))
                }
            }
        }
    }

    fn set_entry(
        &self,
        entries: &mut Entries,
        id: CommandId,
        location: Location,
        kind: EntryKind,
        policy: SuspendPolicy,
    ) -> ReplyFrame {
        match self.registry.add_locked(entries, location, kind, policy) {
            Ok(handle) => ReplyFrame::ack(id, format!("Set {} {}", kind, handle.location)),
            Err(e) => ReplyFrame::error(id, e.to_string()),
        }
    }

    fn cont(&self, id: CommandId, thread: Option<ThreadId>) -> ReplyFrame {
        let mut threads = poison::lock(&self.threads, "session.cont");
        match thread {
            None => {
                let mut resumed = 0;
                for parked in threads.parked.values_mut() {
                    if parked.release(Resumption::Continue) {
                        resumed += 1;
                    }
                }
                if resumed == 0 {
                    ReplyFrame::ack(id, "Nothing suspended.")
                } else {
                    ReplyFrame::ack(id, format!("Resumed {} thread(s)", resumed))
                }
            }
            Some(thread) => match threads.parked.get_mut(&thread) {
                Some(parked) if parked.resumption.is_none() => {
                    parked.release(Resumption::Continue);
                    ReplyFrame::ack(id, format!("Resumed thread {}", thread))
                }
                _ => ReplyFrame::error(id, format!("Thread {} is not suspended", thread)),
            },
        }
    }

    fn suspend(&self, id: CommandId, thread: ThreadId) -> ReplyFrame {
        let mut threads = poison::lock(&self.threads, "session.suspend");
        if !threads.names.contains_key(&thread) {
            return ReplyFrame::error(id, format!("Invalid <thread_id>: {}", thread));
        }
        if threads.parked.contains_key(&thread) {
            return ReplyFrame::ack(id, format!("Thread {} already suspended", thread));
        }
        if threads.pending_suspend.insert(thread) {
            self.pending_suspends.fetch_add(1, Ordering::SeqCst);
        }
        ReplyFrame::ack(
            id,
            format!("Thread {} will suspend at its next checkpoint", thread),
        )
    }

    fn resume(&self, id: CommandId, thread: ThreadId) -> ReplyFrame {
        let mut threads = poison::lock(&self.threads, "session.resume");
        if !threads.names.contains_key(&thread) {
            return ReplyFrame::error(id, format!("Invalid <thread_id>: {}", thread));
        }
        if threads.pending_suspend.remove(&thread) {
            self.pending_suspends.fetch_sub(1, Ordering::SeqCst);
            return ReplyFrame::ack(id, format!("Cancelled pending suspend of thread {}", thread));
        }
        match threads.parked.get_mut(&thread) {
            Some(parked) if parked.resumption.is_none() => {
                parked.release(Resumption::Continue);
                let how = match parked.reason {
                    ParkReason::Suspend => "suspended",
                    ParkReason::Event => "stopped",
                };
                ReplyFrame::ack(id, format!("Resumed {} thread {}", how, thread))
            }
            _ => ReplyFrame::ack(id, format!("Thread {} is not suspended", thread)),
        }
    }

    fn pop_frame(&self, id: CommandId, thread: ThreadId) -> ReplyFrame {
        let mut threads = poison::lock(&self.threads, "session.pop_frame");
        match threads.parked.get_mut(&thread) {
            Some(parked) if parked.resumption.is_none() => {
                parked.release(Resumption::PopFrame);
                ReplyFrame::ack(id, format!("Popped frame on thread {}", thread))
            }
            _ => ReplyFrame::error(id, format!("Thread {} is not suspended", thread)),
        }
    }
}

fn describe(entries: &Entries) -> String {
    let list = entries.sorted();
    let subscriptions = entries.subscriptions();

    if list.is_empty() && subscriptions.is_empty() {
        return "No breakpoints set.".to_string();
    }

    let mut output = String::new();
    if !list.is_empty() {
        output.push_str("Breakpoints set:");
        for entry in &list {
            output.push_str(&format!("\n\t#{} {} {}", entry.id, entry.kind, entry.location));
            if !entry.enabled {
                output.push_str(" (disabled)");
            }
            if entry.policy == SuspendPolicy::None {
                output.push_str(" (go)");
            }
            if entry.hit_count > 0 {
                output.push_str(&format!(" hits={}", entry.hit_count));
            }
        }
    }
    if !subscriptions.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str("Subscriptions:");
        for (kind, policy) in subscriptions {
            output.push_str(&format!("\n\t{}", kind));
            if policy == SuspendPolicy::EventThread {
                output.push_str(" (thread)");
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ReplyStatus;
    use std::thread;
    use std::time::{Duration, Instant};

    fn session() -> (Arc<DebugSession>, mpsc::UnboundedReceiver<Frame>) {
        let session = DebugSession::new(WireConfig::default());
        let rx = session.take_outbound().unwrap();
        (session, rx)
    }

    fn command(session: &DebugSession, rx: &mut mpsc::UnboundedReceiver<Frame>, id: u32, line: &str) -> ReplyFrame {
        session.handle_command(CommandFrame {
            id,
            command: Command::parse(line).unwrap(),
        });
        match rx.try_recv().unwrap() {
            Frame::Reply(reply) => reply,
            other => panic!("expected reply, got {:?}", other),
        }
    }

    fn wait_parked(session: &DebugSession, thread: ThreadId) {
        let start = Instant::now();
        while !session.suspended_threads().contains(&thread) {
            assert!(start.elapsed() < Duration::from_secs(10), "thread never parked");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_outbound_taken_once() {
        let (session, _rx) = session();
        assert!(session.take_outbound().is_none());
    }

    #[test]
    fn test_clear_replies() {
        let (session, mut rx) = session();
        command(&session, &mut rx, 1, "stop_at Demo:67");

        let reply = command(&session, &mut rx, 2, "clear Demo:67");
        assert_eq!(reply.status, ReplyStatus::Removed);
        assert_eq!(reply.detail, "Removed: Demo:67");

        // Clearing again is not an error
        let reply = command(&session, &mut rx, 3, "clear Demo:67");
        assert_eq!(reply.status, ReplyStatus::Ack);
        assert_eq!(reply.detail, "Not found: Demo:67");
    }

    #[test]
    fn test_clear_all_twice() {
        let (session, mut rx) = session();
        command(&session, &mut rx, 1, "stop_at Demo:63");
        command(&session, &mut rx, 2, "stop_at Demo.run");

        let first = command(&session, &mut rx, 3, "clearAll");
        assert_eq!(first.status, ReplyStatus::Removed);
        let second = command(&session, &mut rx, 4, "clearAll");
        assert_eq!(second.status, ReplyStatus::Ack);
        assert_eq!(second.detail, "No breakpoints set.");
    }

    #[test]
    fn test_duplicate_stop_at_is_error_reply() {
        let (session, mut rx) = session();
        command(&session, &mut rx, 1, "stop_at Demo:63");
        let reply = command(&session, &mut rx, 2, "stop_at Demo:63");
        assert!(reply.is_error());
        assert!(reply.detail.contains("Demo:63"));
    }

    #[test]
    fn test_go_breakpoint_notifies_without_parking() {
        let (session, mut rx) = session();
        command(&session, &mut rx, 1, "stop_at go Demo:63");

        let hook = session.hook();
        let outcome = hook.breakpoint(&Location::line("Demo", 63), 1, &[]);
        assert_eq!(outcome, HitOutcome::Notified);

        match rx.try_recv().unwrap() {
            Frame::Event(event) => {
                assert_eq!(event.sequence_id, 1);
                assert_eq!(event.kind, EventKind::Breakpoint);
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_no_event_after_clear() {
        let (session, mut rx) = session();
        let hook = session.hook();
        let location = Location::line("Demo", 67);
        command(&session, &mut rx, 1, "stop_at go Demo:67");
        command(&session, &mut rx, 2, "clear Demo:67");

        assert_eq!(hook.breakpoint(&location, 1, &[]), HitOutcome::Ignored);
        assert!(rx.try_recv().is_err());
        assert_eq!(session.events_emitted(), 0);
    }

    #[test]
    fn test_cont_resumes_parked_thread() {
        let (session, mut rx) = session();
        command(&session, &mut rx, 1, "stop_at Demo:63");

        let tid = session.register_thread("worker");
        let worker = {
            let hook = session.hook();
            thread::spawn(move || hook.breakpoint(&Location::line("Demo", 63), tid, &[]))
        };

        wait_parked(&session, tid);
        assert!(matches!(rx.try_recv().unwrap(), Frame::Event(_)));

        let reply = command(&session, &mut rx, 2, &format!("cont {}", tid));
        assert_eq!(reply.detail, format!("Resumed thread {}", tid));
        assert_eq!(worker.join().unwrap(), HitOutcome::Continued);

        let reply = command(&session, &mut rx, 3, "cont");
        assert_eq!(reply.detail, "Nothing suspended.");
    }

    #[test]
    fn test_pop_frame() {
        let (session, mut rx) = session();
        command(&session, &mut rx, 1, "stop_at Demo.compute");
        let tid = session.register_thread("worker");

        let reply = command(&session, &mut rx, 2, &format!("popFrame {}", tid));
        assert!(reply.is_error());

        let worker = {
            let hook = session.hook();
            thread::spawn(move || hook.method_entry("Demo", "compute", tid))
        };
        wait_parked(&session, tid);

        let reply = command(&session, &mut rx, 3, &format!("popFrame {}", tid));
        assert!(!reply.is_error());
        assert_eq!(worker.join().unwrap(), HitOutcome::FramePopped);
    }

    #[test]
    fn test_suspend_parks_at_checkpoint() {
        let (session, mut rx) = session();
        let tid = session.register_thread("worker");

        assert!(command(&session, &mut rx, 1, "suspend 999").is_error());
        command(&session, &mut rx, 2, &format!("suspend {}", tid));

        let worker = {
            let hook = session.hook();
            thread::spawn(move || hook.checkpoint(tid))
        };
        wait_parked(&session, tid);
        match rx.try_recv().unwrap() {
            Frame::Event(event) => {
                assert_eq!(event.kind, EventKind::ThreadSuspended);
                assert_eq!(event.thread, tid);
            }
            other => panic!("expected event, got {:?}", other),
        }

        let reply = command(&session, &mut rx, 3, &format!("resume {}", tid));
        assert_eq!(reply.detail, format!("Resumed suspended thread {}", tid));
        assert_eq!(worker.join().unwrap(), HitOutcome::Continued);
    }

    #[test]
    fn test_resume_cancels_pending_suspend() {
        let (session, mut rx) = session();
        let tid = session.register_thread("worker");
        command(&session, &mut rx, 1, &format!("suspend {}", tid));
        command(&session, &mut rx, 2, &format!("resume {}", tid));
        assert_eq!(session.hook().checkpoint(tid), HitOutcome::Ignored);
    }

    #[test]
    fn test_close_releases_parked_threads() {
        let (session, mut rx) = session();
        command(&session, &mut rx, 1, "stop_at Demo:63");
        let tid = session.register_thread("worker");

        let worker = {
            let hook = session.hook();
            thread::spawn(move || hook.breakpoint(&Location::line("Demo", 63), tid, &[]))
        };
        wait_parked(&session, tid);

        session.close();
        assert_eq!(worker.join().unwrap(), HitOutcome::Released);

        // After close, hits still report but never park
        assert_eq!(
            session.hook().breakpoint(&Location::line("Demo", 63), tid, &[]),
            HitOutcome::Notified
        );
    }

    #[test]
    fn test_parked_thread_times_out() {
        let config = WireConfig {
            resume_timeout_ms: 20,
            ..WireConfig::default()
        };
        let session = DebugSession::new(config);
        session
            .registry()
            .add(Location::line("Demo", 63), EntryKind::Breakpoint, SuspendPolicy::EventThread)
            .unwrap();

        let outcome = session.hook().breakpoint(&Location::line("Demo", 63), 1, &[]);
        assert_eq!(outcome, HitOutcome::Released);
        assert!(session.suspended_threads().is_empty());
    }

    #[test]
    fn test_watch_and_list() {
        let (session, mut rx) = session();
        let reply = command(&session, &mut rx, 1, "watch all Demo.counter");
        assert_eq!(
            reply.detail,
            "Set access watch Demo.counter\nSet modification watch Demo.counter"
        );
        assert!(command(&session, &mut rx, 2, "watch access Demo.counter").is_error());

        command(&session, &mut rx, 3, "subscribe GcStart");
        let listing = command(&session, &mut rx, 4, "list");
        assert!(listing.detail.starts_with("Breakpoints set:"));
        assert!(listing.detail.contains("access watch Demo#counter"));
        assert!(listing.detail.contains("Subscriptions:\n\tGcStart"));

        let reply = command(&session, &mut rx, 5, "unwatch access Demo.counter");
        assert_eq!(reply.detail, "Removed: access watch Demo.counter");
        assert_eq!(session.registry().len(), 1);
    }
}

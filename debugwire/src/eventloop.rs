// Driver event loop
//
// Routes incoming frames from the debuggee: replies go to the waiting
// command, events go to the event queue. Reading runs in its own task so a
// command being sent never cancels a half-read frame.

use crate::channel::EventChannel;
use crate::events::EventFrame;
use crate::poison;
use crate::protocol::{CommandFrame, Frame, ReplyFrame, WireError, WireResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

type PendingReplies = Arc<Mutex<HashMap<u32, oneshot::Sender<WireResult<ReplyFrame>>>>>;

/// Request to send a command and get reply
#[derive(Debug)]
pub struct CommandRequest {
    pub frame: CommandFrame,
    pub reply_tx: oneshot::Sender<WireResult<ReplyFrame>>,
}

/// Handle to the event loop for sending commands and receiving events
#[derive(Clone, Debug)]
pub struct EventLoopHandle {
    command_tx: mpsc::Sender<CommandRequest>,
    // Unbounded so the reader never blocks on a slow consumer while a
    // reply is still in flight behind an event
    event_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<EventFrame>>>,
    channel: Arc<EventChannel>,
    pending: PendingReplies,
}

impl EventLoopHandle {
    /// Send a command and wait for its reply
    pub async fn send_command(&self, frame: CommandFrame) -> WireResult<ReplyFrame> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(CommandRequest { frame, reply_tx })
            .await
            .map_err(|_| WireError::ChannelClosed)?;

        reply_rx.await.map_err(|_| WireError::ChannelClosed)?
    }

    /// Try to receive an event (non-blocking)
    pub async fn try_recv_event(&self) -> Option<EventFrame> {
        let mut rx = self.event_rx.lock().await;
        rx.try_recv().ok()
    }

    /// Wait for the next event; `None` once the channel closed and the queue drained
    pub async fn recv_event(&self) -> Option<EventFrame> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }

    /// Stop waiting for the reply to `id`. Returns false if nothing was waiting.
    pub fn forget(&self, id: u32) -> bool {
        poison::lock(&self.pending, "eventloop.pending")
            .remove(&id)
            .is_some()
    }

    /// Number of commands still waiting for a reply
    pub fn pending_replies(&self) -> usize {
        poison::lock(&self.pending, "eventloop.pending").len()
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    pub async fn close(&self) {
        self.channel.close().await;
    }
}

/// Start the event loop tasks over an established channel
pub fn spawn_event_loop(channel: EventChannel) -> EventLoopHandle {
    let channel = Arc::new(channel);
    let (command_tx, command_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(command_task(channel.clone(), command_rx, pending.clone()));
    tokio::spawn(read_task(channel.clone(), pending.clone(), event_tx));

    EventLoopHandle {
        command_tx,
        event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
        channel,
        pending,
    }
}

async fn command_task(
    channel: Arc<EventChannel>,
    mut command_rx: mpsc::Receiver<CommandRequest>,
    pending: PendingReplies,
) {
    let closed = channel.closed_token();

    loop {
        let request = tokio::select! {
            _ = closed.cancelled() => break,
            request = command_rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let id = request.frame.id;
        debug!("Sending command id={}: {}", id, request.frame.command);

        // Register before writing; the reply can beat the write's return.
        // A caller that already gave up is checked under the same lock that
        // `forget` takes, so its entry never lingers.
        {
            let mut waiting = poison::lock(&pending, "eventloop.pending");
            if request.reply_tx.is_closed() {
                debug!("Dropping command id={}: caller stopped waiting", id);
                continue;
            }
            waiting.insert(id, request.reply_tx);
        }

        if let Err(e) = channel.send(&Frame::Command(request.frame)).await {
            error!("Failed to send command id={}: {}", id, e);
            if let Some(tx) = poison::lock(&pending, "eventloop.pending").remove(&id) {
                tx.send(Err(e)).ok();
            }
        }
    }

    debug!("Command task finished");
}

async fn read_task(
    channel: Arc<EventChannel>,
    pending: PendingReplies,
    event_tx: mpsc::UnboundedSender<EventFrame>,
) {
    info!("Event loop started");

    loop {
        match channel.receive_until_closed().await {
            Ok(Frame::Reply(reply)) => {
                debug!("Received reply id={}", reply.correlates_to);
                let waiter = poison::lock(&pending, "eventloop.pending").remove(&reply.correlates_to);
                match waiter {
                    Some(tx) => {
                        tx.send(Ok(reply)).ok();
                    }
                    None => warn!("Received reply for unknown command id={}", reply.correlates_to),
                }
            }
            Ok(Frame::Event(event)) => {
                info!("Event {}", event);
                if event_tx.send(event).is_err() {
                    warn!("Event receiver dropped, discarding event");
                }
            }
            Ok(Frame::Command(frame)) => {
                warn!("Ignoring command id={} sent by the debuggee", frame.id);
            }
            Err(WireError::ChannelClosed) => break,
            Err(e) => {
                error!("Failed to read frame: {}", e);
                if e.is_fatal() {
                    break;
                }
            }
        }
    }

    // Cancel first so a command registered after the drain fails on send
    channel.close().await;
    let waiters: Vec<_> = poison::lock(&pending, "eventloop.pending")
        .drain()
        .map(|(_, tx)| tx)
        .collect();
    for tx in waiters {
        tx.send(Err(WireError::ChannelClosed)).ok();
    }

    info!("Event loop shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Role;
    use crate::commands::Command;
    use crate::events::EventKind;
    use crate::types::Location;
    use std::time::Duration;

    async fn pair() -> (EventLoopHandle, EventChannel) {
        let (a, b) = tokio::io::duplex(4096);
        let timeout = Duration::from_secs(5);
        let (driver, debuggee) = tokio::join!(
            EventChannel::establish(a, Role::Initiator, timeout),
            EventChannel::establish(b, Role::Responder, timeout),
        );
        (spawn_event_loop(driver.unwrap()), debuggee.unwrap())
    }

    fn event(sequence_id: u64) -> Frame {
        Frame::Event(EventFrame {
            sequence_id,
            kind: EventKind::Breakpoint,
            thread: 1,
            location: Some(Location::line("Demo", 63)),
            payload: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_reply_routed_past_events() {
        let (handle, debuggee) = pair().await;

        let request = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .send_command(CommandFrame {
                        id: 7,
                        command: Command::List,
                    })
                    .await
            })
        };

        let Frame::Command(frame) = debuggee.receive().await.unwrap() else {
            panic!("expected command");
        };
        assert_eq!(frame.id, 7);

        debuggee.send(&event(1)).await.unwrap();
        debuggee.send(&Frame::Reply(ReplyFrame::ack(7, "ok"))).await.unwrap();

        let reply = request.await.unwrap().unwrap();
        assert_eq!(reply.detail, "ok");
        assert_eq!(handle.recv_event().await.unwrap().sequence_id, 1);
        assert!(handle.try_recv_event().await.is_none());
    }

    #[tokio::test]
    async fn test_pending_command_fails_on_close() {
        let (handle, debuggee) = pair().await;

        let request = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .send_command(CommandFrame {
                        id: 1,
                        command: Command::ClearAll,
                    })
                    .await
            })
        };
        debuggee.receive().await.unwrap();
        debuggee.close().await;

        let result = tokio::time::timeout(Duration::from_secs(5), request)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(WireError::ChannelClosed)));
        assert!(handle.recv_event().await.is_none());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_forget_drops_waiter() {
        let (handle, debuggee) = pair().await;

        let abandoned = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .send_command(CommandFrame {
                        id: 3,
                        command: Command::List,
                    })
                    .await
            })
        };
        debuggee.receive().await.unwrap();
        assert_eq!(handle.pending_replies(), 1);

        abandoned.abort();
        assert!(handle.forget(3));
        assert!(!handle.forget(3));
        assert_eq!(handle.pending_replies(), 0);

        // A late reply is logged and dropped; the loop keeps running
        debuggee.send(&Frame::Reply(ReplyFrame::ack(3, "late"))).await.unwrap();
        debuggee.send(&event(1)).await.unwrap();
        assert_eq!(handle.recv_event().await.unwrap().sequence_id, 1);
    }
}

// Driver connection management
//
// Handles TCP connection, handshake, and event loop startup

use crate::channel::{EventChannel, Role, Transport};
use crate::commands::Command;
use crate::config::WireConfig;
use crate::eventloop::{spawn_event_loop, EventLoopHandle};
use crate::events::EventFrame;
use crate::protocol::{CommandFrame, ReplyFrame, WireError, WireResult};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct DriverConnection {
    event_loop: EventLoopHandle,
    next_id: Arc<AtomicU32>,
    reply_timeout: Duration,
}

impl DriverConnection {
    /// Connect to a debuggee agent, retrying while it starts up
    pub async fn connect(addr: &str, config: &WireConfig) -> WireResult<Self> {
        info!("Connecting to debuggee at {}", addr);

        let mut attempt = 0;
        let stream = loop {
            attempt += 1;
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) if attempt < config.connect_attempts => {
                    debug!("Connect attempt {} failed: {}", attempt, e);
                    tokio::time::sleep(config.connect_retry_interval()).await;
                }
                Err(e) => {
                    warn!("Giving up on {} after {} attempts", addr, attempt);
                    return Err(WireError::Io(e));
                }
            }
        };
        stream.set_nodelay(true)?;

        Self::from_transport(stream, config).await
    }

    /// Handshake over an already-open stream and start the event loop
    pub async fn from_transport(stream: impl Transport, config: &WireConfig) -> WireResult<Self> {
        let channel = EventChannel::establish(stream, Role::Initiator, config.reply_timeout()).await?;

        Ok(Self {
            event_loop: spawn_event_loop(channel),
            next_id: Arc::new(AtomicU32::new(1)),
            reply_timeout: config.reply_timeout(),
        })
    }

    /// Send a command and wait for its reply, bounded by the reply timeout
    pub async fn send_command(&self, command: Command) -> WireResult<ReplyFrame> {
        let frame = CommandFrame {
            id: self.next_id(),
            command,
        };
        self.send_frame(frame).await
    }

    /// Like `send_command` with a caller-allocated id (see `next_id`)
    pub async fn send_frame(&self, frame: CommandFrame) -> WireResult<ReplyFrame> {
        debug!("Sending command id={}", frame.id);

        let start = Instant::now();
        let id = frame.id;
        let operation = format!("reply to {}", frame.command);
        match tokio::time::timeout(self.reply_timeout, self.event_loop.send_command(frame)).await {
            Ok(result) => result,
            Err(_) => {
                if self.event_loop.forget(id) {
                    debug!("Stopped waiting for reply id={}", id);
                }
                Err(WireError::timed_out(operation, start.elapsed()))
            }
        }
    }

    /// Try to receive an event (non-blocking)
    pub async fn try_recv_event(&self) -> Option<EventFrame> {
        self.event_loop.try_recv_event().await
    }

    /// Wait up to `timeout` for the next event
    pub async fn recv_event(&self, timeout: Duration) -> WireResult<EventFrame> {
        let start = Instant::now();
        match tokio::time::timeout(timeout, self.event_loop.recv_event()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(WireError::ChannelClosed),
            Err(_) => Err(WireError::timed_out("event", start.elapsed())),
        }
    }

    /// Generate next command ID
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.event_loop.is_closed()
    }

    pub async fn close(&self) {
        self.event_loop.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;

    async fn attach(config: &WireConfig) -> (DriverConnection, EventChannel) {
        let (a, b) = tokio::io::duplex(4096);
        let debuggee = tokio::spawn(async move {
            EventChannel::establish(b, Role::Responder, Duration::from_secs(5)).await
        });
        let connection = DriverConnection::from_transport(a, config).await.unwrap();
        (connection, debuggee.await.unwrap().unwrap())
    }

    #[tokio::test]
    async fn test_commands_take_the_next_id() {
        let (connection, debuggee) = attach(&WireConfig::default()).await;
        let connection = Arc::new(connection);
        assert_eq!(connection.next_id(), 1);
        assert_eq!(connection.next_id(), 2);

        let sent = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send_command(Command::List).await })
        };
        let Frame::Command(frame) = debuggee.receive().await.unwrap() else {
            panic!("expected command");
        };
        assert_eq!(frame.id, 3);
        debuggee
            .send(&Frame::Reply(ReplyFrame::ack(3, "No breakpoints set.")))
            .await
            .unwrap();

        assert_eq!(sent.await.unwrap().unwrap().detail, "No breakpoints set.");
    }

    #[tokio::test]
    async fn test_connect_gives_up() {
        let config = WireConfig {
            connect_attempts: 2,
            connect_retry_interval_ms: 1,
            ..WireConfig::default()
        };
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(DriverConnection::connect(&addr, &config).await.is_err());
    }

    #[tokio::test]
    async fn test_reply_timeout() {
        let config = WireConfig {
            reply_timeout_ms: 50,
            ..WireConfig::default()
        };
        let (connection, _debuggee) = attach(&config).await;

        match connection.send_command(Command::List).await {
            Err(WireError::TimedOut { operation, .. }) => assert_eq!(operation, "reply to list"),
            other => panic!("expected timeout, got {:?}", other),
        }
        // The abandoned command no longer waits for a reply
        assert_eq!(connection.event_loop.pending_replies(), 0);
    }
}

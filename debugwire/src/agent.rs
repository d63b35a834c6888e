// Debuggee agent
//
// Accepts one driver connection and bridges it to a DebugSession: commands
// are executed in receipt order, and every outbound frame goes through a
// single writer task so the wire order is the enqueue order.

use crate::channel::{EventChannel, Role, Transport};
use crate::protocol::{Frame, WireError, WireResult};
use crate::session::DebugSession;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct DebuggeeAgent {
    listener: TcpListener,
    session: Arc<DebugSession>,
}

impl DebuggeeAgent {
    pub async fn bind(addr: &str, session: Arc<DebugSession>) -> WireResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Debuggee agent listening on {}", listener.local_addr()?);
        Ok(Self { listener, session })
    }

    pub fn local_addr(&self) -> WireResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn session(&self) -> &Arc<DebugSession> {
        &self.session
    }

    /// Accept a single driver and serve it until either side closes
    pub async fn accept(self) -> WireResult<()> {
        let closed = self.session.closed_token();
        let accepted = tokio::select! {
            _ = closed.cancelled() => {
                info!("Session closed before a driver attached");
                return Ok(());
            }
            accepted = self.listener.accept() => accepted,
        };
        let (stream, peer) = accepted?;
        info!("Driver attached from {}", peer);
        stream.set_nodelay(true)?;

        serve(stream, self.session).await
    }
}

/// Run the responder side of a session over `stream`
pub async fn serve(stream: impl Transport, session: Arc<DebugSession>) -> WireResult<()> {
    let channel = match EventChannel::establish(stream, Role::Responder, session.config().reply_timeout()).await {
        Ok(channel) => Arc::new(channel),
        Err(e) => {
            session.close();
            return Err(e);
        }
    };

    let outbound = session
        .take_outbound()
        .ok_or_else(|| WireError::Protocol("Session is already being served".to_string()))?;
    let writer = tokio::spawn(write_task(
        channel.clone(),
        outbound,
        session.closed_token(),
    ));

    let result = read_loop(&channel, &session).await;

    // Release parked threads, let the writer flush what is queued, then hang up
    session.close();
    if let Err(e) = writer.await {
        error!("Writer task failed: {}", e);
    }
    channel.close().await;

    info!("Driver detached after {} event(s)", session.events_emitted());
    result
}

async fn read_loop(channel: &EventChannel, session: &DebugSession) -> WireResult<()> {
    let closed = session.closed_token();

    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => return Ok(()),
            frame = channel.receive_until_closed() => frame,
        };

        match frame {
            Ok(Frame::Command(command)) => session.handle_command(command),
            Ok(Frame::Reply(reply)) => warn!("Ignoring reply from driver: {}", reply),
            Ok(Frame::Event(event)) => warn!("Ignoring event from driver: {}", event),
            Err(WireError::ChannelClosed) => {
                info!("Driver hung up");
                return Ok(());
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => error!("Dropping malformed frame: {}", e),
        }
    }
}

async fn write_task(
    channel: Arc<EventChannel>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    closed: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => frame,
            _ = closed.cancelled() => break,
        };
        let Some(frame) = frame else { break };

        if let Err(e) = channel.send(&frame).await {
            warn!("Dropping outbound frames: {}", e);
            return;
        }
    }

    // Flush whatever was queued before the session closed
    while let Ok(frame) = outbound.try_recv() {
        if channel.send(&frame).await.is_err() {
            break;
        }
    }
    debug!("Writer task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::config::WireConfig;
    use crate::protocol::{CommandFrame, ReplyStatus};
    use crate::types::Location;
    use std::time::Duration;

    #[tokio::test]
    async fn test_commands_answered_in_order() {
        let session = DebugSession::new(WireConfig::default());
        let (a, b) = tokio::io::duplex(4096);
        let agent = tokio::spawn(serve(b, session.clone()));

        let driver = EventChannel::establish(a, Role::Initiator, Duration::from_secs(5))
            .await
            .unwrap();
        let lines = ["stop_at Demo:63", "stop_at Demo:67", "clear Demo:67", "clear Demo:67"];
        for (id, line) in lines.iter().enumerate() {
            let frame = Frame::Command(CommandFrame {
                id: id as u32 + 1,
                command: Command::parse(line).unwrap(),
            });
            driver.send(&frame).await.unwrap();
        }

        let mut statuses = Vec::new();
        for expected in 1..=4u32 {
            let Frame::Reply(reply) = driver.receive().await.unwrap() else {
                panic!("expected reply");
            };
            assert_eq!(reply.correlates_to, expected);
            statuses.push(reply.status);
        }
        assert_eq!(
            statuses,
            vec![ReplyStatus::Ack, ReplyStatus::Ack, ReplyStatus::Removed, ReplyStatus::Ack]
        );
        assert!(session.registry().lookup(&Location::line("Demo", 63)).is_some());

        driver.close().await;
        agent.await.unwrap().unwrap();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_session_close_ends_serve() {
        let session = DebugSession::new(WireConfig::default());
        let (a, b) = tokio::io::duplex(4096);
        let agent = tokio::spawn(serve(b, session.clone()));
        let driver = EventChannel::establish(a, Role::Initiator, Duration::from_secs(5))
            .await
            .unwrap();

        session.close();
        tokio::time::timeout(Duration::from_secs(5), agent)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(driver.receive().await, Err(WireError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_accept_over_tcp() {
        let session = DebugSession::new(WireConfig::default());
        let agent = DebuggeeAgent::bind("127.0.0.1:0", session.clone()).await.unwrap();
        let addr = agent.local_addr().unwrap();
        let served = tokio::spawn(agent.accept());

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let driver = EventChannel::establish(stream, Role::Initiator, Duration::from_secs(5))
            .await
            .unwrap();
        driver
            .send(&Frame::Command(CommandFrame {
                id: 1,
                command: Command::List,
            }))
            .await
            .unwrap();
        let Frame::Reply(reply) = driver.receive().await.unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(reply.detail, "No breakpoints set.");

        driver.close().await;
        served.await.unwrap().unwrap();
    }
}

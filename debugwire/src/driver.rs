// Debugger-side driver
//
// Scripts a debuggee: issues commands, waits for correlated replies and
// events, and asserts over everything it has seen. The first failure aborts
// the script; `report` dumps the transcript when that happens.

use crate::channel::Transport;
use crate::commands::Command;
use crate::config::WireConfig;
use crate::connection::DriverConnection;
use crate::events::{EventFrame, EventKind};
use crate::protocol::{CommandFrame, ReplyFrame, ReplyStatus, WireError, WireResult};
use crate::transcript::Transcript;
use crate::types::Location;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug)]
pub struct Driver {
    connection: DriverConnection,
    transcript: Transcript,
    config: WireConfig,
}

impl Driver {
    pub fn new(connection: DriverConnection, config: WireConfig) -> Self {
        Self {
            connection,
            transcript: Transcript::new(),
            config,
        }
    }

    pub async fn connect(addr: &str, config: WireConfig) -> WireResult<Self> {
        let connection = DriverConnection::connect(addr, &config).await?;
        Ok(Self::new(connection, config))
    }

    pub async fn from_transport(stream: impl Transport, config: WireConfig) -> WireResult<Self> {
        let connection = DriverConnection::from_transport(stream, &config).await?;
        Ok(Self::new(connection, config))
    }

    pub fn config(&self) -> &WireConfig {
        &self.config
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn note(&mut self, text: impl Into<String>) {
        self.transcript.note(text);
    }

    /// Send a command and return whatever reply comes back, `Error` included
    pub async fn command_raw(&mut self, command: Command) -> WireResult<ReplyFrame> {
        let id = self.connection.next_id();
        self.transcript.record_sent(id, &command);

        let reply = self.connection.send_frame(CommandFrame { id, command }).await?;
        self.transcript.record_reply(&reply);
        Ok(reply)
    }

    /// Send a command; an `Error` reply becomes `WireError::Command`
    pub async fn command(&mut self, command: Command) -> WireResult<ReplyFrame> {
        let reply = self.command_raw(command).await?;
        reply.check_error()?;
        Ok(reply)
    }

    /// Parse and send one command line
    pub async fn send_line(&mut self, line: &str) -> WireResult<ReplyFrame> {
        self.command(Command::parse(line)?).await
    }

    pub async fn next_event(&mut self, timeout: Duration) -> WireResult<EventFrame> {
        let event = self.connection.recv_event(timeout).await?;
        self.transcript.record_event(&event);
        Ok(event)
    }

    /// The next event must be of `kind`; waits up to the session wait budget
    pub async fn expect_event(&mut self, kind: EventKind) -> WireResult<EventFrame> {
        let event = self.next_event(self.config.wait_time()).await?;
        if event.kind != kind {
            return Err(WireError::mismatch(kind.to_string(), event.to_string()));
        }
        Ok(event)
    }

    pub async fn expect_event_at(
        &mut self,
        kind: EventKind,
        location: &Location,
    ) -> WireResult<EventFrame> {
        let event = self.expect_event(kind).await?;
        if !event.is_at(location) {
            return Err(WireError::mismatch(
                format!("{}: {}", kind, location),
                event.to_string(),
            ));
        }
        Ok(event)
    }

    /// A clear reply must acknowledge removal and name the location
    pub fn expect_removed(&self, reply: &ReplyFrame, location: &Location) -> WireResult<()> {
        let expected = format!("Removed: {}", location);
        if reply.status != ReplyStatus::Removed || !reply.detail.contains(&expected) {
            return Err(WireError::mismatch(expected, reply.to_string()));
        }
        Ok(())
    }

    /// Pull every event already queued into the transcript
    pub async fn drain_events(&mut self) -> Vec<EventFrame> {
        let mut drained = Vec::new();
        while let Some(event) = self.connection.try_recv_event().await {
            self.transcript.record_event(&event);
            drained.push(event);
        }
        drained
    }

    /// Record events until the debuggee hangs up
    pub async fn wait_for_disconnect(&mut self) -> WireResult<()> {
        loop {
            match self.next_event(self.config.wait_time()).await {
                Ok(_) => continue,
                Err(WireError::ChannelClosed) => {
                    self.transcript.note("debuggee disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drain events every poll interval until `done` holds over the transcript
    pub async fn poll_events_until(
        &mut self,
        what: &str,
        mut done: impl FnMut(&Transcript) -> bool,
    ) -> WireResult<()> {
        let start = Instant::now();
        for attempt in 0..=self.config.poll_attempts {
            self.drain_events().await;
            if done(&self.transcript) {
                debug!("{} after {} poll(s)", what, attempt);
                return Ok(());
            }
            if attempt < self.config.poll_attempts {
                tokio::time::sleep(self.config.poll_interval()).await;
            }
        }
        Err(WireError::timed_out(what, start.elapsed()))
    }

    pub fn assert_event_count(
        &self,
        kind: EventKind,
        location: Option<&Location>,
        expected: usize,
    ) -> WireResult<()> {
        let actual = self.transcript.count_events(kind, location);
        if actual != expected {
            let scope = location.map(|l| format!(" at {}", l)).unwrap_or_default();
            return Err(WireError::mismatch(
                format!("{} x {}{}", expected, kind, scope),
                format!("{} x {}{}", actual, kind, scope),
            ));
        }
        Ok(())
    }

    pub fn assert_no_event_at(&self, location: &Location) -> WireResult<()> {
        match self.transcript.events().find(|e| e.is_at(location)) {
            Some(event) => Err(WireError::mismatch(
                format!("no event at {}", location),
                event.to_string(),
            )),
            None => Ok(()),
        }
    }

    /// Log the outcome of a scenario; failures carry the full transcript
    pub fn report<T>(&self, name: &str, result: &WireResult<T>) {
        match result {
            Ok(_) => info!("Scenario {} passed ({} transcript entries)", name, self.transcript.len()),
            Err(e) => error!(
                "Scenario {} failed: {}\n{}",
                name,
                e,
                self.transcript.render()
            ),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::serve;
    use crate::events::StateKind;
    use crate::session::DebugSession;
    use crate::types::SuspendPolicy;
    use std::sync::Arc;

    async fn attach(config: WireConfig) -> (Driver, Arc<DebugSession>) {
        let session = DebugSession::new(config.clone());
        let (a, b) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(b, session.clone()));
        let driver = Driver::from_transport(a, config).await.unwrap();
        (driver, session)
    }

    #[tokio::test]
    async fn test_error_reply_fails_command() {
        let (mut driver, _session) = attach(WireConfig::default()).await;
        driver.send_line("stop_at Demo:63").await.unwrap();

        let err = driver.send_line("stop_at Demo:63").await.unwrap_err();
        assert!(matches!(err, WireError::Command(_)));

        // The raw form hands back the error reply instead
        let reply = driver
            .command_raw(Command::stop_at(Location::line("Demo", 63)))
            .await
            .unwrap();
        assert!(reply.is_error());
    }

    #[tokio::test]
    async fn test_expect_removed() {
        let (mut driver, _session) = attach(WireConfig::default()).await;
        let location = Location::line("Demo", 67);
        driver.command(Command::stop_at(location.clone())).await.unwrap();

        let reply = driver.command(Command::clear(location.clone())).await.unwrap();
        driver.expect_removed(&reply, &location).unwrap();

        let reply = driver.command(Command::clear(location.clone())).await.unwrap();
        assert!(matches!(
            driver.expect_removed(&reply, &location),
            Err(WireError::ProtocolMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        let config = WireConfig {
            poll_interval_ms: 1,
            poll_attempts: 3,
            ..WireConfig::default()
        };
        let (mut driver, _session) = attach(config).await;
        let result = driver
            .poll_events_until("GcStart", |t| t.count_events(StateKind::GcStart.into(), None) > 0)
            .await;
        assert!(matches!(result, Err(WireError::TimedOut { .. })));
    }

    #[tokio::test]
    async fn test_poll_sees_state_event() {
        let (mut driver, session) = attach(WireConfig::default()).await;
        driver.send_line("subscribe GcStart").await.unwrap();
        assert_eq!(session.registry().subscription(StateKind::GcStart), Some(SuspendPolicy::None));

        let hook = session.hook();
        std::thread::spawn(move || hook.state(StateKind::GcStart, 1, &[]));

        driver
            .poll_events_until("GcStart", |t| t.count_events(StateKind::GcStart.into(), None) == 1)
            .await
            .unwrap();
        driver.assert_event_count(StateKind::GcStart.into(), None, 1).unwrap();
        assert!(driver.assert_event_count(EventKind::Breakpoint, None, 1).is_err());
    }
}

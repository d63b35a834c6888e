// Event request commands
//
// Set up and tear down breakpoints, watchpoints and state subscriptions

use crate::commands::{Command, WatchMode};
use crate::driver::Driver;
use crate::events::StateKind;
use crate::protocol::{ReplyFrame, WireResult};
use crate::types::{Location, SuspendPolicy};

impl Driver {
    /// Set a breakpoint that suspends the hitting thread
    pub async fn stop_at(&mut self, location: Location) -> WireResult<ReplyFrame> {
        self.stop_at_with(location, SuspendPolicy::EventThread).await
    }

    pub async fn stop_at_with(
        &mut self,
        location: Location,
        policy: SuspendPolicy,
    ) -> WireResult<ReplyFrame> {
        self.command(Command::StopAt { location, policy }).await
    }

    /// Break when `location` (a method) returns
    pub async fn stop_exit(&mut self, location: Location) -> WireResult<ReplyFrame> {
        self.command(Command::StopExit {
            location,
            policy: SuspendPolicy::EventThread,
        })
        .await
    }

    /// Clear every entry at `location`. The reply is `Removed` or a
    /// `Not found` acknowledgement.
    pub async fn clear(&mut self, location: Location) -> WireResult<ReplyFrame> {
        self.command(Command::Clear { location }).await
    }

    pub async fn clear_all(&mut self) -> WireResult<ReplyFrame> {
        self.command(Command::ClearAll).await
    }

    pub async fn watch(
        &mut self,
        field: Location,
        mode: WatchMode,
        policy: SuspendPolicy,
    ) -> WireResult<ReplyFrame> {
        self.command(Command::Watch {
            field,
            mode,
            policy,
        })
        .await
    }

    pub async fn unwatch(&mut self, field: Location, mode: WatchMode) -> WireResult<ReplyFrame> {
        self.command(Command::Unwatch { field, mode }).await
    }

    pub async fn subscribe(
        &mut self,
        kind: StateKind,
        policy: SuspendPolicy,
    ) -> WireResult<ReplyFrame> {
        self.command(Command::Subscribe { kind, policy }).await
    }

    pub async fn unsubscribe(&mut self, kind: StateKind) -> WireResult<ReplyFrame> {
        self.command(Command::Unsubscribe { kind }).await
    }

    /// The debuggee's listing of active entries and subscriptions
    pub async fn list(&mut self) -> WireResult<String> {
        let reply = self.command(Command::List).await?;
        Ok(reply.detail)
    }
}

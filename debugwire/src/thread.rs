// Thread control commands
//
// Resume, suspend and frame-pop requests addressed to debuggee threads

use crate::commands::Command;
use crate::driver::Driver;
use crate::protocol::{ReplyFrame, WireResult};
use crate::types::ThreadId;

impl Driver {
    /// Resume every parked thread
    pub async fn cont(&mut self) -> WireResult<ReplyFrame> {
        self.command(Command::Cont { thread: None }).await
    }

    /// Resume one parked thread; fails if it is not parked
    pub async fn cont_thread(&mut self, thread: ThreadId) -> WireResult<ReplyFrame> {
        self.command(Command::Cont {
            thread: Some(thread),
        })
        .await
    }

    /// Ask `thread` to park at its next checkpoint
    pub async fn suspend(&mut self, thread: ThreadId) -> WireResult<ReplyFrame> {
        self.command(Command::Suspend { thread }).await
    }

    pub async fn resume(&mut self, thread: ThreadId) -> WireResult<ReplyFrame> {
        self.command(Command::Resume { thread }).await
    }

    /// Resume a parked thread so that it re-enters the current method
    pub async fn pop_frame(&mut self, thread: ThreadId) -> WireResult<ReplyFrame> {
        self.command(Command::PopFrame { thread }).await
    }
}

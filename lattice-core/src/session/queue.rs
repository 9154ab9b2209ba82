use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::LatticeError;
use crate::session::Command;

pub type CommandResult = Result<(), LatticeError>;

/// A command handler operating on the state `C` that owns the queue.
pub type Handler<C> = Arc<dyn Fn(&mut C, Command) -> CommandResult + Send + Sync>;

/// A command waiting on a queue together with the handler that will run it.
pub struct Queued<C> {
    command: Command,
    handler: Handler<C>,
}

impl<C> Queued<C> {
    pub(crate) fn new(command: Command, handler: Handler<C>) -> Self {
        Self { command, handler }
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Run the handler against `ctx`.
    pub fn invoke(self, ctx: &mut C) -> CommandResult {
        (self.handler)(ctx, self.command)
    }
}

impl<C> fmt::Debug for Queued<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queued")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// Cloneable posting end of a [`CommandQueue`].
pub struct QueueSender<C> {
    name: &'static str,
    tx: mpsc::UnboundedSender<Queued<C>>,
}

impl<C> QueueSender<C> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn post(&self, queued: Queued<C>) -> Result<(), LatticeError> {
        self.tx
            .send(queued)
            .map_err(|_| LatticeError::QueueClosed(self.name))
    }
}

impl<C> Clone for QueueSender<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<C> fmt::Debug for QueueSender<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSender").field("name", &self.name).finish()
    }
}

/// A serial execution queue, drained by exactly one owner.
///
/// Commands are handed out in the order they were posted.
pub struct CommandQueue<C> {
    sender: QueueSender<C>,
    rx: mpsc::UnboundedReceiver<Queued<C>>,
}

impl<C> CommandQueue<C> {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: QueueSender { name, tx },
            rx,
        }
    }

    pub fn name(&self) -> &'static str {
        self.sender.name
    }

    pub fn sender(&self) -> QueueSender<C> {
        self.sender.clone()
    }

    /// Wait for the next command.
    pub async fn recv(&mut self) -> Option<Queued<C>> {
        self.rx.recv().await
    }

    /// Take the next command if one is already queued.
    pub fn try_recv(&mut self) -> Option<Queued<C>> {
        self.rx.try_recv().ok()
    }
}

impl<C> fmt::Debug for CommandQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("name", &self.sender.name)
            .finish_non_exhaustive()
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace, warn};

use crate::error::LatticeError;
use crate::message::CommandType;
use crate::session::queue::{CommandResult, Handler, QueueSender, Queued};
use crate::session::Command;

/// Called for every command that has no registered handler.
pub type UnhandledHook = Box<dyn Fn(&Command) + Send + Sync>;

struct Binding<C> {
    handler: Handler<C>,
    queue: QueueSender<C>,
}

/// Routes inbound commands to the queue registered for their type.
///
/// Handlers are registered while the session is being built; once it is
/// shared behind an `Arc` the table is read-only and `dispatch` can be
/// called from any receive task.
pub struct Session<C> {
    name: String,
    bindings: HashMap<CommandType, Binding<C>>,
    on_unhandled: Option<UnhandledHook>,
    unhandled: AtomicU64,
}

impl<C: 'static> Session<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: HashMap::new(),
            on_unhandled: None,
            unhandled: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind `command` to `handler`, executed on `queue`.
    ///
    /// Registering the same type twice replaces the earlier binding.
    pub fn register_handler<F>(&mut self, command: CommandType, handler: F, queue: &QueueSender<C>)
    where
        F: Fn(&mut C, Command) -> CommandResult + Send + Sync + 'static,
    {
        let binding = Binding {
            handler: Arc::new(handler),
            queue: queue.clone(),
        };
        if self.bindings.insert(command, binding).is_some() {
            debug!("{}: replaced handler for {command}", self.name);
        }
    }

    /// Install a hook that observes commands without a handler.
    pub fn on_unhandled(&mut self, hook: impl Fn(&Command) + Send + Sync + 'static) {
        self.on_unhandled = Some(Box::new(hook));
    }

    pub fn is_registered(&self, command: CommandType) -> bool {
        self.bindings.contains_key(&command)
    }

    /// Number of commands that arrived without a handler.
    pub fn unhandled_count(&self) -> u64 {
        self.unhandled.load(Ordering::Relaxed)
    }

    /// Post `command` to the queue bound to its type.
    ///
    /// Never runs the handler inline. Fails with `UnhandledCommand` when no
    /// handler is registered and with `QueueClosed` when the bound queue has
    /// been dropped.
    pub fn dispatch(&self, command: Command) -> Result<(), LatticeError> {
        let binding = command
            .command_type()
            .ok()
            .and_then(|ty| self.bindings.get(&ty).map(|binding| (ty, binding)));

        let Some((ty, binding)) = binding else {
            return Err(self.unhandled(&command));
        };

        trace!(
            "{}: {ty} from peer {} -> queue '{}'",
            self.name,
            command.from(),
            binding.queue.name()
        );
        binding
            .queue
            .post(Queued::new(command, binding.handler.clone()))
            .inspect_err(|e| warn!("{}: dropping {ty}: {e}", self.name))
    }

    fn unhandled(&self, command: &Command) -> LatticeError {
        let id = command.packet().command_id();
        self.unhandled.fetch_add(1, Ordering::Relaxed);
        warn!(
            "{}: unhandled command {id:#x} from peer {}",
            self.name,
            command.from()
        );
        if let Some(hook) = &self.on_unhandled {
            hook(command);
        }
        LatticeError::UnhandledCommand(id)
    }
}

impl<C> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("handlers", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

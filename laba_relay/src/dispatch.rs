// Cross-thread dispatch queue.
//
// Network threads must not touch simulation state directly: the simulation is
// single-threaded and its setters are not thread-safe. Instead the client's
// receive loop enqueues deferred actions here, and the simulation loop drains
// the queue once per tick, running every action in enqueue order on its own
// thread.
//
// Actions receive the drain target as their only argument rather than
// capturing it, since the target (`&mut dyn Simulation`) cannot be sent across
// threads. Draining swaps the pending list out under the lock and runs the
// actions after releasing it, so an action may enqueue follow-up work without
// deadlocking; that work runs on the next drain.

use parking_lot::Mutex;

/// A deferred action run against the drain target.
pub type Action<T> = Box<dyn FnOnce(&mut T) + Send>;

/// Multi-producer, single-consumer queue of deferred actions.
pub struct DispatchQueue<T: ?Sized> {
    pending: Mutex<Vec<Action<T>>>,
}

impl<T: ?Sized> Default for DispatchQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> DispatchQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Queue an action for the next drain. Callable from any thread.
    pub fn enqueue<F>(&self, action: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.pending.lock().push(Box::new(action));
    }

    /// Run every queued action against `target`, oldest first. Returns how
    /// many ran. Call from the thread that owns `target`.
    pub fn drain(&self, target: &mut T) -> usize {
        let actions = std::mem::take(&mut *self.pending.lock());
        let count = actions.len();
        for action in actions {
            action(target);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

//! Confirmed-Request Transaction Registry
//!
//! Confirmed requests are correlated with their replies by an 8-bit
//! invocation id. [`Transactions`] owns the id space: it hands out the
//! smallest free id, maps each live id to the waiting caller's reply sink
//! and cancellation token, and takes both back when the exchange ends.
//!
//! Callers do not drive the allocator directly. [`Transactions::open`]
//! returns a [`TransactionHandle`] that owns the id and the registration
//! together; dropping the handle releases both, on success, error, and
//! cancellation alike.
//!
//! Reply delivery never blocks the reader: [`Transactions::dispatch`] uses
//! a bounded non-blocking send and reports a dropped reply instead of
//! waiting for a slow caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::app::Apdu;

/// Result type for registry operations
pub type Result<T> = core::result::Result<T, TransactionError>;

/// Number of invocation ids available per client.
const ID_SPACE: usize = 256;

/// Bounded capacity of a transaction's reply sink. One reply per id is
/// live at a time; the headroom absorbs duplicated datagrams.
const REPLY_CAPACITY: usize = 4;

/// Errors that can occur in registry operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// All 256 invocation ids are live
    #[error("all invocation ids are in use")]
    Exhausted,
    /// Id is not currently allocated
    #[error("invocation id {0} is not allocated")]
    UnknownId(u8),
}

/// Outcome of dispatching an inbound reply to its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Reply handed to the waiting caller
    Delivered,
    /// No transaction registered for the invocation id
    NoTransaction,
    /// Caller already cancelled; reply dropped
    Cancelled,
    /// Reply sink full or caller gone; reply dropped
    Dropped,
}

struct Entry {
    sink: mpsc::Sender<Apdu>,
    cancel: CancellationToken,
}

struct State {
    in_use: [bool; ID_SPACE],
    entries: HashMap<u8, Entry>,
}

/// Registry of live confirmed-request transactions.
pub struct Transactions {
    state: Mutex<State>,
}

impl Transactions {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                in_use: [false; ID_SPACE],
                entries: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoning panic cannot leave the allocator in an inconsistent
        // state; recover the guard.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Allocate the smallest free invocation id.
    pub fn get_id(&self) -> Result<u8> {
        let mut state = self.lock();
        let id = state
            .in_use
            .iter()
            .position(|used| !used)
            .ok_or(TransactionError::Exhausted)?;
        state.in_use[id] = true;
        Ok(id as u8)
    }

    /// Release an invocation id and any registration under it.
    pub fn free_id(&self, id: u8) {
        let mut state = self.lock();
        state.in_use[id as usize] = false;
        state.entries.remove(&id);
    }

    /// Attach a reply sink and cancellation token to an allocated id.
    ///
    /// Fails with [`TransactionError::UnknownId`] when the id was not
    /// handed out by [`Transactions::get_id`].
    pub fn register(
        &self,
        id: u8,
        sink: mpsc::Sender<Apdu>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut state = self.lock();
        if !state.in_use[id as usize] {
            return Err(TransactionError::UnknownId(id));
        }
        state.entries.insert(id, Entry { sink, cancel });
        Ok(())
    }

    /// Remove the registration for an id, keeping the id allocated.
    pub fn unregister(&self, id: u8) {
        self.lock().entries.remove(&id);
    }

    /// The reply sink and cancellation token registered under an id.
    pub fn lookup(&self, id: u8) -> Option<(mpsc::Sender<Apdu>, CancellationToken)> {
        let state = self.lock();
        state
            .entries
            .get(&id)
            .map(|entry| (entry.sink.clone(), entry.cancel.clone()))
    }

    /// Hand an inbound reply to the transaction waiting on its id.
    ///
    /// Never blocks: a full sink or an already-cancelled caller drops the
    /// reply and reports it in the outcome.
    pub fn dispatch(&self, id: u8, apdu: Apdu) -> Dispatch {
        let Some((sink, cancel)) = self.lookup(id) else {
            return Dispatch::NoTransaction;
        };
        if cancel.is_cancelled() {
            return Dispatch::Cancelled;
        }
        match sink.try_send(apdu) {
            Ok(()) => Dispatch::Delivered,
            Err(_) => Dispatch::Dropped,
        }
    }

    /// Allocate an id and register a fresh reply sink under it, returning
    /// a handle that releases both when dropped.
    pub fn open(self: &Arc<Self>, cancel: CancellationToken) -> Result<TransactionHandle> {
        let id = self.get_id()?;
        let (sink, replies) = mpsc::channel(REPLY_CAPACITY);
        if let Err(err) = self.register(id, sink, cancel) {
            self.free_id(id);
            return Err(err);
        }
        Ok(TransactionHandle {
            registry: Arc::clone(self),
            id,
            replies,
        })
    }
}

impl Default for Transactions {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped ownership of one invocation id and its registration.
///
/// The id stays allocated for exactly the lifetime of the handle, so
/// every exit path of a request releases it.
pub struct TransactionHandle {
    registry: Arc<Transactions>,
    id: u8,
    replies: mpsc::Receiver<Apdu>,
}

impl TransactionHandle {
    /// The invocation id owned by this handle.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Wait for the next dispatched reply. Returns `None` only if the
    /// registry side of the channel is gone.
    pub async fn recv(&mut self) -> Option<Apdu> {
        self.replies.recv().await
    }
}

impl Drop for TransactionHandle {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
        self.registry.free_id(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ConfirmedServiceChoice;

    fn simple_ack(invoke_id: u8) -> Apdu {
        Apdu::SimpleAck {
            invoke_id,
            service_choice: ConfirmedServiceChoice::WriteProperty,
        }
    }

    #[test]
    fn allocates_smallest_free_id() {
        let registry = Transactions::new();
        assert_eq!(registry.get_id().unwrap(), 0);
        assert_eq!(registry.get_id().unwrap(), 1);
        assert_eq!(registry.get_id().unwrap(), 2);
        registry.free_id(1);
        assert_eq!(registry.get_id().unwrap(), 1);
        assert_eq!(registry.get_id().unwrap(), 3);
    }

    #[test]
    fn exhausts_after_256_allocations() {
        let registry = Transactions::new();
        for expected in 0..=255u8 {
            assert_eq!(registry.get_id().unwrap(), expected);
        }
        assert_eq!(registry.get_id(), Err(TransactionError::Exhausted));
        registry.free_id(17);
        assert_eq!(registry.get_id().unwrap(), 17);
    }

    #[test]
    fn register_requires_allocated_id() {
        let registry = Transactions::new();
        let (sink, _replies) = mpsc::channel(1);
        assert_eq!(
            registry.register(9, sink, CancellationToken::new()),
            Err(TransactionError::UnknownId(9))
        );
    }

    #[test]
    fn dispatch_delivers_to_registered_sink() {
        let registry = Transactions::new();
        let id = registry.get_id().unwrap();
        let (sink, mut replies) = mpsc::channel(1);
        registry
            .register(id, sink, CancellationToken::new())
            .unwrap();

        assert_eq!(registry.dispatch(id, simple_ack(id)), Dispatch::Delivered);
        assert_eq!(replies.try_recv().unwrap(), simple_ack(id));
        assert_eq!(
            registry.dispatch(99, simple_ack(99)),
            Dispatch::NoTransaction
        );
    }

    #[test]
    fn dispatch_never_blocks_on_a_full_sink() {
        let registry = Transactions::new();
        let id = registry.get_id().unwrap();
        let (sink, _replies) = mpsc::channel(1);
        registry
            .register(id, sink, CancellationToken::new())
            .unwrap();

        assert_eq!(registry.dispatch(id, simple_ack(id)), Dispatch::Delivered);
        // Sink is now full; the reply is dropped, not queued.
        assert_eq!(registry.dispatch(id, simple_ack(id)), Dispatch::Dropped);
    }

    #[test]
    fn dispatch_drops_replies_for_cancelled_callers() {
        let registry = Transactions::new();
        let id = registry.get_id().unwrap();
        let (sink, _replies) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        registry.register(id, sink, cancel.clone()).unwrap();

        cancel.cancel();
        assert_eq!(registry.dispatch(id, simple_ack(id)), Dispatch::Cancelled);
    }

    #[test]
    fn handle_releases_id_on_drop() {
        let registry = Arc::new(Transactions::new());
        let handle = registry.open(CancellationToken::new()).unwrap();
        assert_eq!(handle.id(), 0);
        assert!(registry.lookup(0).is_some());
        drop(handle);
        assert!(registry.lookup(0).is_none());
        assert_eq!(registry.open(CancellationToken::new()).unwrap().id(), 0);
    }
}

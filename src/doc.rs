//! The `doc` module holds [Doc], the entry point owning a replica's store.
//!
//! # Examples
//!
//! ```
//! use ydoc::{Doc, ItemContent, Options, StateVector, TypeRef};
//!
//! let a = Doc::with_options(Options::with_client_id(1));
//! let b = Doc::with_options(Options::with_client_id(2));
//!
//! a.transact(None, |txn| {
//!     let text = txn.get_or_insert_root("text", TypeRef::Text);
//!     txn.insert(&text, 0, ItemContent::String("hello".into())).unwrap();
//! });
//!
//! let update = a.encode_state_as_update_v1(&b.state_vector());
//! b.apply_update_v1(&update, None).unwrap();
//!
//! let text = b.transact(None, |txn| {
//!     let text = txn.get_or_insert_root("text", TypeRef::Text);
//!     txn.get_string(&text)
//! });
//! assert_eq!(text, "hello");
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::block::Item;
use crate::error::{Error, Result};
use crate::id::ClientID;
use crate::state_vector::StateVector;
use crate::store::Store;
use crate::traits::{Decode, Encode};
use crate::transaction::{TransactionEvent, TransactionMut};
use crate::update::Update;

/// Settings of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Id of the local client. Must be unique among the replicas of a
    /// document.
    pub client_id: ClientID,
    /// Globally unique id of the document.
    pub guid: String,
    /// Optional grouping of related documents.
    pub collection_id: Option<String>,
    /// Keep the content of deleted items instead of collecting it on commit.
    pub skip_gc: bool,
    /// Load the document as soon as its parent document sees it.
    pub auto_load: bool,
    /// Whether the document should be loaded at all.
    pub should_load: bool,
}

impl Options {
    /// Random identifiers drawn from `rng`, so seeded runs are reproducible.
    pub fn from_rng<R: Rng>(rng: &mut R) -> Self {
        Options {
            client_id: rng.gen::<u32>() as ClientID,
            guid: format!("{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>()),
            collection_id: None,
            skip_gc: false,
            auto_load: false,
            should_load: true,
        }
    }

    /// Default options with a fixed client id.
    pub fn with_client_id(client_id: ClientID) -> Self {
        Options {
            client_id,
            ..Options::default()
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::from_rng(&mut rand::thread_rng())
    }
}

/// An update produced by a committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    /// The encoded update.
    pub update: Vec<u8>,
    /// Tag passed when the transaction was opened.
    pub origin: Option<Arc<str>>,
    /// False if the transaction applied a remote update.
    pub local: bool,
}

/// Handle to a registered observer.
pub type SubscriptionId = u32;

type UpdateCallback = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;
type TransactionCallback = Arc<dyn Fn(&TransactionEvent) + Send + Sync>;

#[derive(Default)]
struct Observers {
    next_id: SubscriptionId,
    update_v1: Vec<(SubscriptionId, UpdateCallback)>,
    update_v2: Vec<(SubscriptionId, UpdateCallback)>,
    after_transaction: Vec<(SubscriptionId, TransactionCallback)>,
}

impl Observers {
    fn next_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        self.next_id
    }
}

/// A replica of a shared document.
///
/// All access goes through transactions, at most one open at a time.
/// Observers run after the transaction committed and the document was
/// unlocked, so they may open transactions of their own.
pub struct Doc {
    options: Options,
    store: Mutex<Store>,
    observers: Mutex<Observers>,
}

impl Doc {
    /// A document with random identifiers.
    pub fn new() -> Self {
        Doc::with_options(Options::default())
    }

    /// A document with the given settings.
    pub fn with_options(options: Options) -> Self {
        Doc {
            store: Mutex::new(Store::new(options.clone())),
            options,
            observers: Mutex::new(Observers::default()),
        }
    }

    /// Id of the local client.
    pub fn client_id(&self) -> ClientID {
        self.options.client_id
    }

    /// Globally unique id of the document.
    pub fn guid(&self) -> &str {
        &self.options.guid
    }

    /// Settings the document was created with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    fn lock_store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_observers(&self) -> MutexGuard<'_, Observers> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `body` in a local transaction and commit it. Blocks while another
    /// transaction is open.
    pub fn transact<F, T>(&self, origin: Option<&str>, body: F) -> T
    where
        F: FnOnce(&mut TransactionMut) -> T,
    {
        let store = self.lock_store();
        self.run(store, origin, true, body)
    }

    /// Like [Doc::transact], but fails instead of blocking when another
    /// transaction is open.
    pub fn try_transact<F, T>(&self, origin: Option<&str>, body: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionMut) -> T,
    {
        let store = match self.store.try_lock() {
            Ok(store) => store,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(Error::TransactionInProgress),
        };
        Ok(self.run(store, origin, true, body))
    }

    fn run<F, T>(&self, mut store: MutexGuard<'_, Store>, origin: Option<&str>, local: bool, body: F) -> T
    where
        F: FnOnce(&mut TransactionMut) -> T,
    {
        let (want_v1, want_v2) = {
            let observers = self.lock_observers();
            (
                !observers.update_v1.is_empty(),
                !observers.update_v2.is_empty(),
            )
        };
        let (result, event) = {
            let mut txn = TransactionMut::new(&mut *store, origin.map(Arc::from), local);
            let result = body(&mut txn);
            (result, txn.commit(want_v1, want_v2))
        };
        drop(store);
        self.notify(&event);
        result
    }

    fn notify(&self, event: &TransactionEvent) {
        let (update_v1, update_v2, after_transaction) = {
            let observers = self.lock_observers();
            (
                observers.update_v1.iter().map(|(_, f)| f.clone()).collect::<Vec<_>>(),
                observers.update_v2.iter().map(|(_, f)| f.clone()).collect::<Vec<_>>(),
                observers
                    .after_transaction
                    .iter()
                    .map(|(_, f)| f.clone())
                    .collect::<Vec<_>>(),
            )
        };
        let updates = [
            (event.update_v1.as_ref(), update_v1),
            (event.update_v2.as_ref(), update_v2),
        ];
        for (update, callbacks) in updates.iter() {
            if let Some(update) = update {
                let update = UpdateEvent {
                    update: update.to_vec(),
                    origin: event.origin.clone(),
                    local: event.local,
                };
                for callback in callbacks.iter() {
                    callback(&update);
                }
            }
        }
        for callback in after_transaction {
            callback(event);
        }
    }

    /// Integrate a decoded remote update.
    pub fn apply_update(&self, update: Update, origin: Option<&str>) {
        let store = self.lock_store();
        self.run(store, origin, false, |txn| txn.apply_update(update));
    }

    /// Decode and integrate a v1 update. Nothing is applied if decoding
    /// fails.
    pub fn apply_update_v1(&self, update: &[u8], origin: Option<&str>) -> Result<()> {
        let update = Update::decode_v1(update)?;
        self.apply_update(update, origin);
        Ok(())
    }

    /// Decode and integrate a v2 update. Nothing is applied if decoding
    /// fails.
    pub fn apply_update_v2(&self, update: &[u8], origin: Option<&str>) -> Result<()> {
        let update = Update::decode_v2(update)?;
        self.apply_update(update, origin);
        Ok(())
    }

    /// The next expected clock of every known client.
    pub fn state_vector(&self) -> StateVector {
        self.lock_store().blocks.get_state_vector()
    }

    /// The v1 encoded state vector.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.state_vector().encode_v1()
    }

    /// Everything a peer at state `remote` is missing, as a v1 update.
    pub fn encode_state_as_update_v1(&self, remote: &StateVector) -> Vec<u8> {
        self.lock_store().diff_update(remote).encode_v1()
    }

    /// Everything a peer at state `remote` is missing, as a v2 update.
    pub fn encode_state_as_update_v2(&self, remote: &StateVector) -> Vec<u8> {
        self.lock_store().diff_update(remote).encode_v2()
    }

    /// Everything a peer is missing given its v1 encoded state vector.
    pub fn encode_diff_v1(&self, remote: &[u8]) -> Result<Vec<u8>> {
        let remote = StateVector::decode_v1(remote)?;
        Ok(self.encode_state_as_update_v1(&remote))
    }

    /// Restrict garbage collection on commit to items passing `filter`.
    pub fn set_gc_filter<F>(&self, filter: F)
    where
        F: Fn(&Item) -> bool + Send + Sync + 'static,
    {
        self.lock_store().gc_filter = Some(Arc::new(filter));
    }

    /// Call `f` with the v1 update of every transaction that changed
    /// something.
    pub fn observe_update_v1<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        let mut observers = self.lock_observers();
        let id = observers.next_id();
        observers.update_v1.push((id, Arc::new(f)));
        id
    }

    /// Call `f` with the v2 update of every transaction that changed
    /// something.
    pub fn observe_update_v2<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        let mut observers = self.lock_observers();
        let id = observers.next_id();
        observers.update_v2.push((id, Arc::new(f)));
        id
    }

    /// Call `f` after every committed transaction.
    pub fn observe_after_transaction<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&TransactionEvent) + Send + Sync + 'static,
    {
        let mut observers = self.lock_observers();
        let id = observers.next_id();
        observers.after_transaction.push((id, Arc::new(f)));
        id
    }

    /// Remove an observer. Returns false if `id` was not registered.
    pub fn unobserve(&self, id: SubscriptionId) -> bool {
        let mut observers = self.lock_observers();
        let before = observers.update_v1.len()
            + observers.update_v2.len()
            + observers.after_transaction.len();
        observers.update_v1.retain(|(sub, _)| *sub != id);
        observers.update_v2.retain(|(sub, _)| *sub != id);
        observers.after_transaction.retain(|(sub, _)| *sub != id);
        let after = observers.update_v1.len()
            + observers.update_v2.len()
            + observers.after_transaction.len();
        before != after
    }
}

impl Default for Doc {
    fn default() -> Self {
        Doc::new()
    }
}

impl fmt::Debug for Doc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Doc")
            .field("client_id", &self.options.client_id)
            .field("guid", &self.options.guid)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::content::{ItemContent, TypeRef};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_seeded_options_are_reproducible() {
        let a = Options::from_rng(&mut StdRng::seed_from_u64(7));
        let b = Options::from_rng(&mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
        assert!(a.client_id <= u32::MAX as ClientID);
    }

    #[test]
    fn test_options_from_json() {
        let options: Options =
            serde_json::from_str(r#"{"client_id": 5, "guid": "g", "skip_gc": true}"#).unwrap();
        assert_eq!(options.client_id, 5);
        assert_eq!(options.guid, "g");
        assert!(options.skip_gc);
        assert!(options.should_load);
    }

    #[test]
    fn test_update_observers() {
        let doc = Doc::with_options(Options::with_client_id(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = doc.observe_update_v1(move |event| {
            assert!(event.local);
            assert_eq!(event.origin.as_deref(), Some("test"));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        doc.transact(Some("test"), |txn| {
            let text = txn.get_or_insert_root("text", TypeRef::Text);
            txn.insert(&text, 0, ItemContent::String("a".into())).unwrap();
        });
        // nothing changed, no update
        doc.transact(Some("test"), |_| {});
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(doc.unobserve(sub));
        assert!(!doc.unobserve(sub));
        doc.transact(Some("test"), |txn| {
            let text = txn.get_or_insert_root("text", TypeRef::Text);
            txn.insert(&text, 0, ItemContent::String("b".into())).unwrap();
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observer_can_open_a_transaction() {
        let doc = Arc::new(Doc::with_options(Options::with_client_id(1)));
        let inner = Arc::downgrade(&doc);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        doc.observe_after_transaction(move |_| {
            if let Some(doc) = inner.upgrade() {
                counter.store(doc.state_vector().get(&1) as usize, Ordering::SeqCst);
            }
        });
        doc.transact(None, |txn| {
            let text = txn.get_or_insert_root("text", TypeRef::Text);
            txn.insert(&text, 0, ItemContent::String("abc".into())).unwrap();
        });
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_try_transact_fails_while_busy() {
        let doc = Doc::with_options(Options::with_client_id(1));
        doc.transact(None, |_| {
            assert!(matches!(
                doc.try_transact(None, |_| ()),
                Err(Error::TransactionInProgress)
            ));
        });
        assert!(doc.try_transact(None, |_| ()).is_ok());
    }

    #[test]
    fn test_invalid_update_is_rejected() {
        let doc = Doc::with_options(Options::with_client_id(1));
        assert!(doc.apply_update_v1(&[1, 1], None).is_err());
        assert!(doc.state_vector().is_empty());
    }
}

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::trace;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LockType {
    Read,
    Write,
}

/// Per-entity locks serializing concurrent writers of one record.
pub trait LockService: Send + Sync {
    fn acquire_node_lock(&self, node: u64, ty: LockType) -> Lock;
    fn acquire_relationship_lock(&self, rel: u64, ty: LockType) -> Lock;
}

/// Scoped lock handle; the lock is released when the handle is dropped.
#[must_use = "dropping the lock releases it immediately"]
pub struct Lock {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Lock {
    /// A handle that holds nothing.
    pub fn none() -> Self {
        Self { release: None }
    }

    pub fn on_release(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Lock service for contexts that need no locking, such as bulk import.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLockService;

impl LockService for NoLockService {
    fn acquire_node_lock(&self, _node: u64, _ty: LockType) -> Lock {
        Lock::none()
    }

    fn acquire_relationship_lock(&self, _rel: u64, _ty: LockType) -> Lock {
        Lock::none()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
enum LockKey {
    Node(u64),
    Relationship(u64),
}

impl LockKey {
    fn entity_id(self) -> u64 {
        match self {
            LockKey::Node(id) | LockKey::Relationship(id) => id,
        }
    }
}

#[derive(Default)]
struct EntityLock {
    writer: Option<ThreadId>,
    write_holds: u32,
    readers: FxHashMap<ThreadId, u32>,
}

impl EntityLock {
    fn can_write(&self, me: ThreadId) -> bool {
        let writer_ok = self.writer.map_or(true, |owner| owner == me);
        let readers_ok = self.readers.keys().all(|reader| *reader == me);
        writer_ok && readers_ok
    }

    fn can_read(&self, me: ThreadId) -> bool {
        self.writer.map_or(true, |owner| owner == me)
    }

    fn is_free(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

struct Stripe {
    locks: Mutex<FxHashMap<LockKey, EntityLock>>,
    released: Condvar,
}

struct StripedInner {
    stripes: Box<[Stripe]>,
}

impl StripedInner {
    fn stripe(&self, key: LockKey) -> &Stripe {
        let idx = (key.entity_id() as usize) % self.stripes.len();
        &self.stripes[idx]
    }

    fn acquire(&self, key: LockKey, ty: LockType) {
        let me = thread::current().id();
        let stripe = self.stripe(key);
        let mut locks = stripe.locks.lock();
        loop {
            let entry = locks.entry(key).or_default();
            let ready = match ty {
                LockType::Write => entry.can_write(me),
                LockType::Read => entry.can_read(me),
            };
            if ready {
                match ty {
                    LockType::Write => {
                        entry.writer = Some(me);
                        entry.write_holds += 1;
                    }
                    LockType::Read => *entry.readers.entry(me).or_insert(0) += 1,
                }
                trace!(key = ?key, mode = ?ty, "lock.acquire");
                return;
            }
            stripe.released.wait(&mut locks);
        }
    }

    fn release(&self, key: LockKey, ty: LockType, owner: ThreadId) {
        let stripe = self.stripe(key);
        let mut locks = stripe.locks.lock();
        let Some(entry) = locks.get_mut(&key) else {
            return;
        };
        match ty {
            LockType::Write => {
                entry.write_holds = entry.write_holds.saturating_sub(1);
                if entry.write_holds == 0 {
                    entry.writer = None;
                }
            }
            LockType::Read => {
                if let Some(count) = entry.readers.get_mut(&owner) {
                    *count -= 1;
                    if *count == 0 {
                        entry.readers.remove(&owner);
                    }
                }
            }
        }
        if entry.is_free() {
            locks.remove(&key);
        }
        trace!(key = ?key, mode = ?ty, "lock.release");
        stripe.released.notify_all();
    }
}

/// Reentrant read/write entity locks spread over a fixed set of stripes.
///
/// A thread may re-acquire any lock it already holds; a write lock is granted
/// once no other thread holds the entity in either mode.
#[derive(Clone)]
pub struct StripedLockService {
    inner: Arc<StripedInner>,
}

impl StripedLockService {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        let stripes = (0..stripes)
            .map(|_| Stripe {
                locks: Mutex::new(FxHashMap::default()),
                released: Condvar::new(),
            })
            .collect();
        Self {
            inner: Arc::new(StripedInner { stripes }),
        }
    }

    /// Number of entities currently locked in any mode.
    pub fn held(&self) -> usize {
        self.inner
            .stripes
            .iter()
            .map(|stripe| stripe.locks.lock().len())
            .sum()
    }

    fn acquire(&self, key: LockKey, ty: LockType) -> Lock {
        self.inner.acquire(key, ty);
        let inner = Arc::clone(&self.inner);
        let owner = thread::current().id();
        Lock::on_release(move || inner.release(key, ty, owner))
    }
}

impl Default for StripedLockService {
    fn default() -> Self {
        Self::new(64)
    }
}

impl LockService for StripedLockService {
    fn acquire_node_lock(&self, node: u64, ty: LockType) -> Lock {
        self.acquire(LockKey::Node(node), ty)
    }

    fn acquire_relationship_lock(&self, rel: u64, ty: LockType) -> Lock {
        self.acquire(LockKey::Relationship(rel), ty)
    }
}

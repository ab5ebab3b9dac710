// Copyright © 2026 Pathway

//! Reuse of cluster sessions across partition computations.
//!
//! Sessions are pooled per `HostSet`. A pool is created on the first request
//! for its hosts and keeps at most `capacity` idle sessions; acquiring never
//! waits, a new session is created when none is idle. A session released into
//! a full pool is shut down instead of being kept.
//!
//! Pools live as long as the registry that owns them. Sessions that sit idle
//! in a pool are not closed before the registry is dropped.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::info;

use super::client::{ClientFactory, ClientSettings, ClusterClient, Error as ClientError};
use super::hosts::HostSet;

pub const DEFAULT_POOL_CAPACITY: usize = 4;

type Factory<T> = Box<dyn Fn() -> Result<T, ClientError> + Send + Sync>;
type Discard<T> = Box<dyn Fn(T) + Send + Sync>;

/// A bounded set of idle objects backed by a lock-free channel.
pub struct ObjectPool<T> {
    idle_sender: Sender<T>,
    idle_receiver: Receiver<T>,
    factory: Factory<T>,
    discard: Discard<T>,
    n_created: AtomicUsize,
    n_discarded: AtomicUsize,
}

impl<T: Send> ObjectPool<T> {
    pub fn new(
        capacity: usize,
        factory: impl Fn() -> Result<T, ClientError> + Send + Sync + 'static,
        discard: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        let (idle_sender, idle_receiver) = bounded(capacity);
        Self {
            idle_sender,
            idle_receiver,
            factory: Box::new(factory),
            discard: Box::new(discard),
            n_created: AtomicUsize::new(0),
            n_discarded: AtomicUsize::new(0),
        }
    }

    /// Takes an idle object or creates a new one. The object goes back to the
    /// pool when the returned guard is dropped.
    pub fn get(self: &Arc<Self>) -> Result<Pooled<T>, ClientError> {
        let item = if let Ok(item) = self.idle_receiver.try_recv() {
            item
        } else {
            let item = (self.factory)()?;
            self.n_created.fetch_add(1, Ordering::Relaxed);
            item
        };
        Ok(Pooled {
            item: Some(item),
            pool: Arc::clone(self),
        })
    }

    fn put(&self, item: T) {
        match self.idle_sender.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item) | TrySendError::Disconnected(item)) => {
                self.n_discarded.fetch_add(1, Ordering::Relaxed);
                (self.discard)(item);
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.idle_sender.capacity().unwrap_or(0)
    }

    pub fn n_idle(&self) -> usize {
        self.idle_receiver.len()
    }

    pub fn n_created(&self) -> usize {
        self.n_created.load(Ordering::Relaxed)
    }

    pub fn n_discarded(&self) -> usize {
        self.n_discarded.load(Ordering::Relaxed)
    }
}

/// Exclusive use of a pooled object. Returned to the pool on drop, whichever
/// way the scope is left.
pub struct Pooled<T: Send> {
    item: Option<T>,
    pool: Arc<ObjectPool<T>>,
}

impl<T: Send> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pooled object is present until drop")
    }
}

impl<T: Send> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled object is present until drop")
    }
}

impl<T: Send> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.put(item);
        }
    }
}

#[allow(clippy::module_name_repetitions)]
pub type ClientPool = ObjectPool<Box<dyn ClusterClient>>;
pub type PooledClient = Pooled<Box<dyn ClusterClient>>;

/// All client pools of one context, keyed by the hosts they connect to.
pub struct ClientPoolRegistry {
    factory: Arc<dyn ClientFactory>,
    settings: ClientSettings,
    capacity: usize,
    pools: Mutex<HashMap<HostSet, Arc<ClientPool>>>,
}

impl ClientPoolRegistry {
    pub fn new(factory: Arc<dyn ClientFactory>, settings: ClientSettings, capacity: usize) -> Self {
        Self {
            factory,
            settings,
            capacity,
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self, hosts: &HostSet) -> Arc<ClientPool> {
        let mut pools = self.pools.lock().unwrap();
        if let Some(pool) = pools.get(hosts) {
            return pool.clone();
        }

        info!(
            "Creating a pool of up to {} idle elasticsearch sessions for hosts {hosts}",
            self.capacity
        );
        let factory = self.factory.clone();
        let settings = self.settings.clone();
        let pool_hosts = hosts.clone();
        let discard_hosts = hosts.clone();
        let pool = Arc::new(ClientPool::new(
            self.capacity,
            move || factory.create(&pool_hosts, &settings),
            move |client: Box<dyn ClusterClient>| {
                info!("Client pool for hosts {discard_hosts} is full, shutting a session down");
                client.shutdown();
            },
        ));
        pools.insert(hosts.clone(), pool.clone());
        pool
    }

    pub fn acquire(&self, hosts: &HostSet) -> Result<PooledClient, ClientError> {
        self.pool(hosts).get()
    }

    pub fn n_pools(&self) -> usize {
        self.pools.lock().unwrap().len()
    }
}

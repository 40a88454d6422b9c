//! Per-type, health-checked single-instance cache.
//!
//! Every slot lives behind one mutex shared by all types, and construction
//! runs while that mutex is held. Constructors may therefore block on I/O
//! (key generation does) but must not request another instance from the same
//! registry. Keep this off per-message paths.
//!
//! The cache knows nothing about `fork`; a type that goes stale in a child
//! process says so through [`HealthCheck`].

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{info, warn};

/// Reports whether a cached instance may still be handed out.
pub trait HealthCheck {
    fn is_healthy(&self) -> bool;
}

type Instance = Arc<dyn Any + Send + Sync>;
type HealthProbe = fn(&(dyn Any + Send + Sync + 'static)) -> bool;

struct Slot {
    instance: Instance,
    probe: Option<HealthProbe>,
}

fn probe<T: HealthCheck + Any>(instance: &(dyn Any + Send + Sync + 'static)) -> bool {
    instance.downcast_ref::<T>().is_some_and(T::is_healthy)
}

#[derive(Default)]
pub struct SingletonRegistry {
    slots: Mutex<HashMap<TypeId, Slot>>,
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry for callers that cannot have one injected.
    pub fn global() -> &'static SingletonRegistry {
        static GLOBAL: OnceLock<SingletonRegistry> = OnceLock::new();
        GLOBAL.get_or_init(SingletonRegistry::new)
    }

    /// Returns the cached `T`, building it on first use. Without a health
    /// predicate the cached instance is always reused.
    pub fn get_or_create<T, F>(&self, build: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        self.acquire(build, None)
    }

    /// Like [`SingletonRegistry::get_or_create`], but asks the cached
    /// instance whether it is healthy and rebuilds it when it is not.
    pub fn get_or_create_checked<T, F>(&self, build: F) -> Arc<T>
    where
        T: HealthCheck + Any + Send + Sync,
        F: FnOnce() -> T,
    {
        self.acquire(build, Some(probe::<T>))
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.lock().contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn acquire<T, F>(&self, build: F, health: Option<HealthProbe>) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let pid = std::process::id();
        let type_id = TypeId::of::<T>();
        let mut slots = self.lock();

        let mut rebuild = false;
        if let Some(slot) = slots.get_mut(&type_id) {
            if health.is_some() {
                slot.probe = health;
            }
            let healthy = slot.probe.map_or(true, |check| check(slot.instance.as_ref()));
            if healthy {
                if let Ok(existing) = Arc::clone(&slot.instance).downcast::<T>() {
                    info!(kind = type_name::<T>(), instance = ?Arc::as_ptr(&existing), pid, "[=]reuse instance");
                    return existing;
                }
            }
            rebuild = true;
        }

        let fresh = Arc::new(build());
        slots.insert(
            type_id,
            Slot {
                instance: Arc::clone(&fresh) as Instance,
                probe: health,
            },
        );
        if rebuild {
            warn!(kind = type_name::<T>(), instance = ?Arc::as_ptr(&fresh), pid, "[^]rebuild instance");
        } else {
            info!(kind = type_name::<T>(), instance = ?Arc::as_ptr(&fresh), pid, "[+]init instance");
        }
        fresh
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TypeId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

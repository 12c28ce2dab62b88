//! Observable value holder
//!
//! A value plus a bounded set of listeners. Listeners are called with the
//! current value on subscribe and after every change. Dropping the returned
//! [`Subscription`] detaches the listener.

use crate::config::MAX_LISTENERS;
use crate::error::{AppError, Result};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: T,
    listeners: Vec<(u64, Listener<T>)>,
    next_id: u64,
    capacity: usize,
}

/// Shared observable value; clones observe the same value
pub struct Observable<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Send + 'static> Observable<T> {
    pub fn new(initial: T) -> Self {
        Self::with_capacity(initial, MAX_LISTENERS)
    }

    pub fn with_capacity(initial: T, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value: initial,
                listeners: Vec::new(),
                next_id: 0,
                capacity,
            })),
        }
    }

    pub fn get(&self) -> T {
        self.lock().value.clone()
    }

    /// Replace the value and notify listeners. Setting an equal value is a no-op.
    pub fn set(&self, value: T) {
        let listeners = {
            let mut inner = self.lock();
            if inner.value == value {
                return;
            }
            inner.value = value.clone();
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect::<Vec<_>>()
        };

        // Called outside the lock so listeners may read the value again
        for listener in listeners {
            listener(&value);
        }
    }

    /// Attach a listener; it is called right away with the current value
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let listener: Listener<T> = Arc::new(listener);
        let (id, current) = {
            let mut inner = self.lock();
            if inner.listeners.len() >= inner.capacity {
                return Err(AppError::Validation(format!(
                    "Listener limit of {} reached",
                    inner.capacity
                )));
            }
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.push((id, Arc::clone(&listener)));
            (id, inner.value.clone())
        };

        listener(&current);

        let weak: Weak<Mutex<Inner<T>>> = Arc::downgrade(&self.inner);
        Ok(Subscription {
            detach: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
                    inner.listeners.retain(|(lid, _)| *lid != id);
                }
            })),
        })
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // A panicking listener never holds the lock, so poisoning is benign
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle that detaches its listener when dropped
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

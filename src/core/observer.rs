//! Observable value cells shared between the owner and consumers.
//!
//! **Why**: Consumers (renderer, UI, audio output) read player state as
//! atomic copies from any thread and may want a callback on change without
//! polling.
//!
//! **Used by**: Player (playback, current time, current video/audio, cache info)
//!
//! Setting a value equal to the current one is a no-op: no callbacks fire and
//! `set` returns `false`. Callbacks run synchronously on the setting thread,
//! after the value lock is released.

use std::fmt;
use std::sync::{Arc, RwLock};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: RwLock<T>,
    subscribers: RwLock<Vec<Callback<T>>>,
}

/// Cheap-clone handle to a shared value with change notification.
pub struct Observable<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.inner.value.read().unwrap_or_else(|e| e.into_inner());
        f.debug_tuple("Observable").field(&*value).finish()
    }
}

impl<T: Default + Clone + PartialEq> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + PartialEq> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: RwLock::new(value),
                subscribers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Copy of the current value
    pub fn get(&self) -> T {
        self.inner.value.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Store `value` if it differs. Returns whether it changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.write().unwrap_or_else(|e| e.into_inner());
            if *current == value {
                return false;
            }
            *current = value.clone();
        }
        self.notify(&value);
        true
    }

    /// Subscribe to changes. The callback does not fire for the current value.
    ///
    /// # Example
    /// ```ignore
    /// let playback = player.observe_playback();
    /// playback.subscribe(|p| log::info!("playback: {:?}", p));
    /// ```
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(callback));
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn notify(&self, value: &T) {
        // Clone the list so a callback may subscribe without deadlocking.
        let callbacks: Vec<Callback<T>> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for cb in callbacks {
            cb(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn test_set_notifies_on_change_only() {
        let value = Observable::new(1);
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        value.subscribe(move |v| {
            c.fetch_add(*v, Ordering::SeqCst);
        });

        assert!(!value.set(1));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert!(value.set(5));
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(value.get(), 5);
    }

    #[test]
    fn test_clones_share_value() {
        let a = Observable::new(String::from("x"));
        let b = a.clone();
        a.set("y".into());
        assert_eq!(b.get(), "y");
        assert_eq!(b.subscriber_count(), 0);
    }
}

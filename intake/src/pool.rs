//! A small bounded object pool with RAII release.
//!
//! Jobs and buffers are pooled to hold RSS constant under sustained load,
//! and every exit path — including error paths — must return the item
//! exactly once. A `Guard<T>` expresses that as a destructor instead of a
//! manual release call on every branch.

use std::sync::Mutex;

pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
    new_item: fn() -> T,
}

impl<T> Pool<T> {
    pub fn new(max_idle: usize, new_item: fn() -> T) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
            new_item,
        }
    }
}

impl<T: Send + 'static> Pool<T> {
    /// Acquire a pooled item, creating a fresh one if the pool is empty.
    pub fn acquire(self: &std::sync::Arc<Self>) -> Guard<T> {
        let item = self.idle.lock().unwrap().pop().unwrap_or_else(self.new_item);
        Guard {
            item: Some(item),
            pool: self.clone(),
        }
    }

    fn release(&self, item: T) {
        let mut idle = self.idle.lock().unwrap();
        if idle.len() < self.max_idle {
            idle.push(item);
        }
    }
}

/// An item checked out of a `Pool`. Returned to the pool when dropped,
/// on every exit path of the holder's code, success or error.
pub struct Guard<T: Send + 'static> {
    item: Option<T>,
    pool: std::sync::Arc<Pool<T>>,
}

impl<T: Send + 'static> std::ops::Deref for Guard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.item.as_ref().expect("guard item taken before drop")
    }
}

impl<T: Send + 'static> std::ops::DerefMut for Guard<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("guard item taken before drop")
    }
}

impl<T: Send + 'static> Drop for Guard<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

impl Pool<Vec<u8>> {
    /// Buffers are reset to empty (capacity retained) before returning to
    /// the idle list, mirroring the reference lineage's `buf[:0]` reset.
    pub fn acquire_buffer(self: &std::sync::Arc<Self>) -> Guard<Vec<u8>> {
        let mut item = self
            .idle
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(self.new_item);
        item.clear();
        Guard {
            item: Some(item),
            pool: self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn guard_returns_item_to_pool_on_drop() {
        let pool = Arc::new(Pool::new(4, || Vec::<u8>::with_capacity(16)));
        {
            let mut g = pool.acquire_buffer();
            g.extend_from_slice(b"hello");
            assert_eq!(&g[..], b"hello");
        }
        assert_eq!(pool.idle.lock().unwrap().len(), 1);
        let g2 = pool.acquire_buffer();
        assert!(g2.is_empty(), "buffer must be reset before reuse");
    }

    #[test]
    fn guard_is_returned_even_on_early_return_paths() {
        let pool = Arc::new(Pool::new(2, || 0i32));

        fn uses_guard(pool: &Arc<Pool<i32>>, fail: bool) -> Result<(), &'static str> {
            let _g = pool.acquire();
            if fail {
                return Err("simulated failure");
            }
            Ok(())
        }

        assert!(uses_guard(&pool, true).is_err());
        assert_eq!(pool.idle.lock().unwrap().len(), 1);
        assert!(uses_guard(&pool, false).is_ok());
        assert_eq!(pool.idle.lock().unwrap().len(), 1);
    }

    #[test]
    fn pool_does_not_grow_past_max_idle() {
        let pool = Arc::new(Pool::new(1, || 0i32));
        let g1 = pool.acquire();
        let g2 = pool.acquire();
        drop(g1);
        drop(g2);
        assert_eq!(pool.idle.lock().unwrap().len(), 1);
    }
}

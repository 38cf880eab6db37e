//! Fixed-capacity arena of reusable byte buffers.
//!
//! Size-classed free lists under a single mutex. When a class is empty the
//! pool allocates fresh until the configured total cap, then blocks
//! `acquire` until a `release` frees capacity.

use std::collections::BTreeMap;
use tokio::sync::{Mutex, Notify};

/// A buffer checked out of the pool. Dropping it without calling
/// [`BufferPool::release`] leaks the accounted capacity; callers that hold
/// buffers across suspension points must release explicitly.
#[derive(Debug)]
pub struct PoolBuffer {
    pub data: Vec<u8>,
    size_class: usize,
    /// Set only when the pool was built with `audit = true`; lets
    /// [`BufferPool::release`] detect a buffer released twice.
    audit_tag: Option<usize>,
}

impl PoolBuffer {
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }
}

struct Inner {
    free: BTreeMap<usize, Vec<Vec<u8>>>,
    total_bytes_out: usize,
    cap_bytes: usize,
    audit: bool,
    live_tags: std::collections::HashSet<usize>,
    next_tag: usize,
}

/// Thread-safe, async-aware buffer pool shared across all reassemblers.
pub struct BufferPool {
    inner: Mutex<Inner>,
    notify: Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("buffer pool exhausted (cap={0} bytes)")]
    Exhausted(usize),
}

fn size_class(min_bytes: usize) -> usize {
    min_bytes.next_power_of_two().max(4096)
}

fn tag_if_audited(inner: &mut Inner) -> Option<usize> {
    if !inner.audit {
        return None;
    }
    let tag = inner.next_tag;
    inner.next_tag += 1;
    inner.live_tags.insert(tag);
    Some(tag)
}

impl BufferPool {
    pub fn new(cap_bytes: usize, audit: bool) -> Self {
        BufferPool {
            inner: Mutex::new(Inner {
                free: BTreeMap::new(),
                total_bytes_out: 0,
                cap_bytes,
                audit,
                live_tags: std::collections::HashSet::new(),
                next_tag: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Acquire a zero-length buffer with capacity >= `min_bytes`. Blocks if
    /// the pool is at its cap and nothing is available to reuse, waking on
    /// the next `release`.
    pub async fn acquire(&self, min_bytes: usize) -> PoolBuffer {
        let class = size_class(min_bytes);
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(buf) = inner.free.get_mut(&class).and_then(Vec::pop) {
                    inner.total_bytes_out += class;
                    let audit_tag = tag_if_audited(&mut inner);
                    return PoolBuffer {
                        data: buf,
                        size_class: class,
                        audit_tag,
                    };
                }
                if inner.total_bytes_out + class <= inner.cap_bytes {
                    inner.total_bytes_out += class;
                    let audit_tag = tag_if_audited(&mut inner);
                    return PoolBuffer {
                        data: Vec::with_capacity(class),
                        size_class: class,
                        audit_tag,
                    };
                }
            }
            self.notify.notified().await;
        }
    }

    /// Try to acquire without blocking; used by the reassembler when it
    /// would rather drop bytes than stall the capture loop.
    pub fn try_acquire(&self, min_bytes: usize) -> Result<PoolBuffer, PoolError> {
        let class = size_class(min_bytes);
        let mut inner = self
            .inner
            .try_lock()
            .map_err(|_| PoolError::Exhausted(0))?;
        if let Some(buf) = inner.free.get_mut(&class).and_then(Vec::pop) {
            inner.total_bytes_out += class;
            let audit_tag = tag_if_audited(&mut inner);
            return Ok(PoolBuffer {
                data: buf,
                size_class: class,
                audit_tag,
            });
        }
        if inner.total_bytes_out + class <= inner.cap_bytes {
            inner.total_bytes_out += class;
            let audit_tag = tag_if_audited(&mut inner);
            return Ok(PoolBuffer {
                data: Vec::with_capacity(class),
                size_class: class,
                audit_tag,
            });
        }
        Err(PoolError::Exhausted(inner.cap_bytes))
    }

    /// Release a buffer back to its size class. With `audit` enabled,
    /// releasing the same [`PoolBuffer`] twice panics instead of silently
    /// corrupting the free list (spec §4.1: "double-release ... MUST be
    /// detectable when an audit flag is set").
    pub async fn release(&self, mut buf: PoolBuffer) {
        buf.data.clear();
        let class = buf.size_class;
        let mut inner = self.inner.lock().await;
        if let Some(tag) = buf.audit_tag {
            assert!(
                inner.live_tags.remove(&tag),
                "buffer pool: double release detected (tag {tag})"
            );
        }
        inner.total_bytes_out = inner.total_bytes_out.saturating_sub(class);
        inner.free.entry(class).or_default().push(buf.data);
        drop(inner);
        self.notify.notify_one();
    }

    pub async fn in_use_bytes(&self) -> usize {
        self.inner.lock().await.total_bytes_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquired_buffers_are_zero_length_with_sufficient_capacity() {
        let pool = BufferPool::new(1 << 20, false);
        let buf = pool.acquire(1000).await;
        assert_eq!(buf.data.len(), 0);
        assert!(buf.capacity() >= 1000);
    }

    #[tokio::test]
    async fn release_then_reacquire_reuses_the_same_size_class() {
        let pool = BufferPool::new(1 << 20, false);
        let buf = pool.acquire(1000).await;
        let cap = buf.capacity();
        pool.release(buf).await;
        let buf2 = pool.acquire(1000).await;
        assert_eq!(buf2.capacity(), cap);
    }

    #[tokio::test]
    #[should_panic(expected = "double release")]
    async fn audited_double_release_panics() {
        let pool = BufferPool::new(1 << 20, true);
        let buf = pool.acquire(1000).await;
        let dupe = PoolBuffer {
            data: Vec::new(),
            size_class: buf.size_class,
            audit_tag: buf.audit_tag,
        };
        pool.release(buf).await;
        pool.release(dupe).await;
    }

    #[tokio::test]
    async fn pool_never_exceeds_configured_cap() {
        let pool = BufferPool::new(8192, false);
        let b1 = pool.try_acquire(4096).unwrap();
        let b2 = pool.try_acquire(4096).unwrap();
        assert!(pool.try_acquire(4096).is_err());
        pool.release(b1).await;
        pool.release(b2).await;
    }
}

//! Fixed-capacity recycling pool of image buffers.
//!
//! The pool is an arena of slots. A checkout claims the first free slot with a
//! single compare-exchange, moves the slot's storage into a [`PooledBuffer`]
//! and hands it out; dropping the buffer moves the storage back and frees the
//! slot. When every slot is taken the pool allocates a detached buffer instead,
//! so the producer never waits on a consumer.

use crossbeam::utils::CachePadded;
use image::{ImageBuffer, Pixel};
use log::{debug, trace};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Number of buffers each pool keeps unless configured otherwise.
pub const DEFAULT_POOL_CAPACITY: usize = 4;

/// Identifies one checkout of one slot.
///
/// The generation changes every time the slot is released, so a stale token
/// never matches a later checkout of the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolToken {
    pub index: usize,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub in_use: usize,
    pub checkouts: usize,
    pub fallbacks: usize,
}

#[derive(Default)]
struct Counters {
    checkouts: AtomicUsize,
    fallbacks: AtomicUsize,
}

struct Slot<S> {
    in_use: AtomicBool,
    generation: AtomicU64,
    storage: Mutex<Vec<S>>,
}

struct PoolInner<P: Pixel> {
    slots: Vec<Slot<P::Subpixel>>,
    /// Logical width and height packed as `width << 32 | height`.
    dims: AtomicU64,
    counters: CachePadded<Counters>,
    _pixel: PhantomData<fn() -> P>,
}

fn pack(width: u32, height: u32) -> u64 {
    ((width as u64) << 32) | height as u64
}

fn unpack(dims: u64) -> (u32, u32) {
    ((dims >> 32) as u32, dims as u32)
}

impl<P: Pixel> PoolInner<P> {
    fn release(&self, token: PoolToken, storage: Vec<P::Subpixel>) {
        let slot = &self.slots[token.index];
        *slot.storage.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = storage;
        slot.generation.fetch_add(1, Ordering::AcqRel);
        slot.in_use.store(false, Ordering::Release);
        trace!("Pool slot {} released", token.index);
    }
}

/// Recycling pool of `width x height` images with pixel type `P`.
///
/// Cloning shares the same slots.
pub struct BufferPool<P: Pixel> {
    inner: Arc<PoolInner<P>>,
}

impl<P: Pixel> Clone for BufferPool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Pixel> BufferPool<P> {
    /// Pre-allocates `capacity` buffers, all free.
    pub fn new(width: u32, height: u32, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                in_use: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                storage: Mutex::new(ImageBuffer::<P, Vec<P::Subpixel>>::new(width, height).into_raw()),
            })
            .collect();
        debug!(
            "Allocated pool of {} {}x{} buffers with {} channel(s)",
            capacity,
            width,
            height,
            P::CHANNEL_COUNT
        );
        Self {
            inner: Arc::new(PoolInner {
                slots,
                dims: AtomicU64::new(pack(width, height)),
                counters: CachePadded::new(Counters::default()),
                _pixel: PhantomData,
            }),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        unpack(self.inner.dims.load(Ordering::Acquire))
    }

    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn channel_count(&self) -> u8 {
        P::CHANNEL_COUNT
    }

    /// Changes the size of buffers handed out from now on.
    ///
    /// Buffers already checked out keep their size; a slot is reallocated the
    /// next time it is checked out at the new size.
    pub fn resize(&self, width: u32, height: u32) {
        self.inner.dims.store(pack(width, height), Ordering::Release);
    }

    /// Hands out a buffer, recycled when a slot is free and freshly allocated otherwise.
    ///
    /// The contents of a recycled buffer are whatever its previous user left in it.
    pub fn checkout(&self) -> PooledBuffer<P> {
        let (width, height) = self.dimensions();
        let len = width as usize * height as usize * P::CHANNEL_COUNT as usize;

        for (index, slot) in self.inner.slots.iter().enumerate() {
            if slot
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            let mut storage = mem::take(
                &mut *slot.storage.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
            );
            if storage.len() != len {
                storage = ImageBuffer::<P, Vec<P::Subpixel>>::new(width, height).into_raw();
            }
            let token = PoolToken {
                index,
                generation: slot.generation.load(Ordering::Acquire),
            };
            match ImageBuffer::from_raw(width, height, storage) {
                Some(image) => {
                    self.inner.counters.checkouts.fetch_add(1, Ordering::Relaxed);
                    return PooledBuffer {
                        image,
                        origin: Some((Arc::clone(&self.inner), token)),
                    };
                }
                None => {
                    self.inner.release(token, Vec::new());
                    break;
                }
            }
        }

        self.inner.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Pool of {} exhausted, allocating a detached {}x{} buffer",
            self.capacity(),
            width,
            height
        );
        PooledBuffer::detached(ImageBuffer::new(width, height))
    }

    /// True while the checkout identified by `token` is still outstanding.
    pub fn is_checked_out(&self, token: PoolToken) -> bool {
        self.inner.slots.get(token.index).map_or(false, |slot| {
            slot.in_use.load(Ordering::Acquire)
                && slot.generation.load(Ordering::Acquire) == token.generation
        })
    }

    pub fn free_count(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|slot| !slot.in_use.load(Ordering::Acquire))
            .count()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            in_use: self.capacity() - self.free_count(),
            checkouts: self.inner.counters.checkouts.load(Ordering::Relaxed),
            fallbacks: self.inner.counters.fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// An image checked out of a [`BufferPool`], or a detached one.
///
/// Dropping a pooled buffer returns its storage to the slot it came from.
/// Share it with `Arc` to hand the same frame to several readers; the slot is
/// freed when the last reference goes away.
pub struct PooledBuffer<P: Pixel> {
    image: ImageBuffer<P, Vec<P::Subpixel>>,
    origin: Option<(Arc<PoolInner<P>>, PoolToken)>,
}

impl<P: Pixel> PooledBuffer<P> {
    /// Wraps an image that does not belong to any pool.
    pub fn detached(image: ImageBuffer<P, Vec<P::Subpixel>>) -> Self {
        Self {
            image,
            origin: None,
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.origin.is_some()
    }

    pub fn token(&self) -> Option<PoolToken> {
        self.origin.as_ref().map(|(_, token)| *token)
    }
}

impl<P: Pixel> Deref for PooledBuffer<P> {
    type Target = ImageBuffer<P, Vec<P::Subpixel>>;

    fn deref(&self) -> &Self::Target {
        &self.image
    }
}

impl<P: Pixel> DerefMut for PooledBuffer<P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.image
    }
}

impl<P: Pixel> Drop for PooledBuffer<P> {
    fn drop(&mut self) {
        if let Some((pool, token)) = self.origin.take() {
            let image = mem::replace(&mut self.image, ImageBuffer::new(0, 0));
            pool.release(token, image.into_raw());
        }
    }
}

impl<P: Pixel> fmt::Debug for PooledBuffer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("token", &self.token())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use std::collections::HashSet;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_capacity_is_never_exceeded() {
        for capacity in 1..=5 {
            let pool = BufferPool::<Luma<u8>>::new(8, 4, capacity);
            let held: Vec<_> = (0..capacity + 1).map(|_| pool.checkout()).collect();

            assert_eq!(held.iter().filter(|b| b.is_pooled()).count(), capacity);
            assert_eq!(pool.free_count(), 0);

            let extra = held.last().unwrap();
            assert!(!extra.is_pooled());
            assert_eq!(extra.dimensions(), (8, 4));
            assert_eq!(pool.stats().fallbacks, 1);
        }
    }

    #[test]
    fn test_release_restores_free_count() {
        let pool = BufferPool::<Luma<u16>>::new(4, 4, 2);
        let first = pool.checkout();
        let token = first.token().unwrap();
        assert_eq!(pool.free_count(), 1);
        assert!(pool.is_checked_out(token));

        drop(first);
        assert_eq!(pool.free_count(), 2);
        assert!(!pool.is_checked_out(token));

        let again = pool.checkout();
        assert!(again.is_pooled());
        assert_eq!(pool.free_count(), 1);
        assert_ne!(again.token(), Some(token));
    }

    #[test]
    fn test_shared_buffer_returns_on_last_reference() {
        let pool = BufferPool::<Rgb<u8>>::new(2, 2, 1);
        let shared = Arc::new(pool.checkout());
        let reader = Arc::clone(&shared);
        assert_eq!(shared.as_raw().len(), 12);

        drop(shared);
        assert_eq!(pool.free_count(), 0);
        drop(reader);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_recycled_storage_keeps_contents() {
        let pool = BufferPool::<Luma<u8>>::new(2, 2, 1);
        let mut buffer = pool.checkout();
        buffer.put_pixel(1, 1, Luma([200]));
        drop(buffer);

        let buffer = pool.checkout();
        assert_eq!(buffer.get_pixel(1, 1), &Luma([200]));
    }

    #[test]
    fn test_resize_applies_to_later_checkouts() {
        let pool = BufferPool::<Luma<u8>>::new(4, 4, 2);
        let before = pool.checkout();
        pool.resize(8, 2);
        let after = pool.checkout();

        assert_eq!(before.dimensions(), (4, 4));
        assert_eq!(after.dimensions(), (8, 2));
        drop(before);
        assert_eq!(pool.checkout().dimensions(), (8, 2));
    }

    #[test]
    fn test_concurrent_checkouts_never_share_a_slot() {
        let pool = BufferPool::<Luma<u8>>::new(4, 4, 4);
        let barrier = Arc::new(Barrier::new(6));
        let workers: Vec<_> = (0..6)
            .map(|_| {
                let pool = pool.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let buffer = pool.checkout();
                    let token = buffer.token();
                    barrier.wait();
                    token
                })
            })
            .collect();

        let tokens: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        let pooled: Vec<_> = tokens.iter().flatten().map(|t| t.index).collect();
        let unique: HashSet<_> = pooled.iter().collect();
        assert_eq!(pooled.len(), 4);
        assert_eq!(unique.len(), 4);
        assert_eq!(pool.free_count(), 4);
    }
}

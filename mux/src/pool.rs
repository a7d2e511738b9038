use std::sync::OnceLock;

use bytes::BytesMut;
use parking_lot::Mutex;

/// Default capacity of pooled buffers. Large enough for any STUN message
/// a well-behaved peer sends over UDP without fragmentation.
pub const BUFFER_SIZE: usize = 2048;

static GLOBAL: OnceLock<BufferPool> = OnceLock::new();

/// Free list of fixed-size encode buffers.
///
/// Hot paths marshal every outgoing message into a pooled buffer and
/// return it when the write completes, which keeps the allocator out of
/// the per-message path. Buffers follow an acquire-use-return discipline
/// and are never shared between tasks.
pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    size: usize,
}

impl BufferPool {
    pub fn new(size: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            size,
        }
    }

    /// The process-wide pool, constructed on first use.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| Self::new(BUFFER_SIZE))
    }

    /// # Unit Test
    ///
    /// ```
    /// use mux::BufferPool;
    ///
    /// let pool = BufferPool::new(2048);
    /// let mut buf = pool.get();
    /// buf.extend_from_slice(b"ping");
    /// pool.put(buf);
    ///
    /// // recycled buffers come back empty.
    /// assert_eq!(pool.get().len(), 0);
    /// ```
    pub fn get(&self) -> BytesMut {
        self.buffers
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.size))
    }

    pub fn put(&self, mut buf: BytesMut) {
        // buffers that grew past the pool size are cheaper to drop than
        // to keep resident.
        if buf.capacity() < self.size {
            return;
        }

        buf.clear();
        self.buffers.lock().push(buf);
    }
}

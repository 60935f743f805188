use bytes::BytesMut;
use parking_lot::Mutex;

use crate::consts::{MAX_POOLED_BUFFER, PIPE_LENGTH};

/// Pool of write buffers shared by the serializer and buffer-saver stages.
/// At most `PIPE_LENGTH + 1` buffers are kept around; anything bigger than
/// [`MAX_POOLED_BUFFER`] is dropped on release instead of recycled.
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            free: Mutex::new(Vec::with_capacity(PIPE_LENGTH + 1)),
        }
    }

    pub fn acquire(&self) -> BytesMut {
        self.free.lock().pop().unwrap_or_default()
    }

    pub fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > MAX_POOLED_BUFFER {
            return;
        }
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < PIPE_LENGTH + 1 {
            free.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_recycles_small_buffers() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"hello");
        pool.release(buf);
        let buf2 = pool.acquire();
        assert!(buf2.capacity() > 0);
    }

    #[test]
    fn oversized_buffers_are_not_recycled() {
        let pool = BufferPool::new();
        let buf = BytesMut::with_capacity(MAX_POOLED_BUFFER + 1);
        pool.release(buf);
        assert!(pool.free.lock().is_empty());
    }
}

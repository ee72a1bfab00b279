//! Async dispatch payload buffers.

use std::ptr::NonNull;
use std::sync::Arc;

use emx_core::config::MEMPOOL_MAX_SIZE;
use emx_mempool::PoolManager;

/// Owned pool block carried inside a dispatch record.
struct PoolBlock(NonNull<u8>);

// Safety: the block is owned exclusively by this buffer from allocation to
// the `free` in `Drop`; no aliases exist outside it.
unsafe impl Send for PoolBlock {}

/// Copy of a published payload, alive until the async callback returns.
///
/// Prefers a memory-pool block when a manager is attached and the size fits;
/// falls back to the host heap otherwise.
pub(crate) enum PayloadBuf {
    Pool {
        block: PoolBlock,
        len: usize,
        manager: Arc<PoolManager>,
    },
    Heap(Box<[u8]>),
}

impl PayloadBuf {
    pub(crate) fn copy_from(data: &[u8], manager: Option<&Arc<PoolManager>>) -> Self {
        if let Some(manager) = manager {
            if !data.is_empty() && data.len() <= MEMPOOL_MAX_SIZE {
                if let Some(block) = manager.alloc(data.len()) {
                    // Fresh block, exclusively ours; copied before any reads.
                    unsafe {
                        std::ptr::copy_nonoverlapping(data.as_ptr(), block.as_ptr(), data.len());
                    }
                    return Self::Pool {
                        block: PoolBlock(block),
                        len: data.len(),
                        manager: Arc::clone(manager),
                    };
                }
            }
        }
        Self::Heap(data.into())
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Self::Pool { block, len, .. } => unsafe {
                std::slice::from_raw_parts(block.0.as_ptr(), *len)
            },
            Self::Heap(data) => data,
        }
    }
}

impl Drop for PayloadBuf {
    fn drop(&mut self) {
        if let Self::Pool { block, manager, .. } = self {
            let _ = manager.free(block.0.as_ptr());
        }
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out socket ids, one per tab in the window. Ids start at 1 and
/// are never reused.
#[derive(Debug)]
pub struct SocketIdAllocator {
    next: AtomicU64,
}

impl SocketIdAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SocketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

static SOCKET_IDS: SocketIdAllocator = SocketIdAllocator::new();

/// Allocate a socket id from the process-wide allocator.
pub fn next_socket_id() -> u64 {
    SOCKET_IDS.allocate()
}

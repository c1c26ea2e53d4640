use core::mem;
use core::ptr::{self, NonNull};

use heapless::Vec;

/// Header written at the start of every block, free or allocated. The
/// region handed to callers begins immediately after it.
///
/// Fields are `u32` so the header is 8 bytes on every target and the
/// smallest configured pool keeps usable payload on 64-bit hosts too.
#[repr(C)]
struct BlockHeader {
    /// Arena offset of the next free block, or `NONE`.
    next: u32,
    /// Block size of the owning pool; consulted on free.
    size: u32,
}

const NONE: u32 = u32::MAX;

pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

const MAX_POOLS: usize = 4;

#[derive(Clone, Copy)]
pub struct PoolCfg {
    pub block_size: usize,
    pub count: usize,
}

/// Pool table of the stock kernel: ascending block sizes, fixed counts.
pub const DEFAULT_POOLS: [PoolCfg; 3] = [
    PoolCfg { block_size: 16, count: 8 },
    PoolCfg { block_size: 32, count: 8 },
    PoolCfg { block_size: 64, count: 4 },
];

struct Pool {
    block_size: u32,
    /// Arena offset of the first free block, or `NONE`.
    free: u32,
}

/// Multi-pool first-fit allocator carved from a contiguous arena.
///
/// Deterministic and fragmentation-free: a request is served from the first
/// pool whose payload fits it, and a freed block returns to the pool its
/// header names. Exhaustion is not a recoverable condition.
pub struct FixedBlockAlloc {
    base: *mut u8,
    pools: Vec<Pool, MAX_POOLS>,
}

impl FixedBlockAlloc {
    /// Carve `table` out of `arena`, front to back, linking every block of
    /// each pool into that pool's free list.
    pub fn new(arena: &'static mut [u8], table: &[PoolCfg]) -> Result<Self, crate::KernelError> {
        // align the carve base so block payloads can hold pointer-bearing
        // structures
        let skip = arena.as_ptr().align_offset(8);
        if skip > arena.len() {
            return Err(crate::KernelError::ArenaTooSmall);
        }
        let base = unsafe { arena.as_mut_ptr().add(skip) };
        let len = arena.len() - skip;

        let mut pools: Vec<Pool, MAX_POOLS> = Vec::new();
        let mut offset = 0usize;
        for cfg in table {
            debug_assert!(cfg.block_size % 8 == 0 && cfg.block_size > HEADER_SIZE);
            let end = offset + cfg.block_size * cfg.count;
            if end > len {
                return Err(crate::KernelError::ArenaTooSmall);
            }
            // link back to front so the free list is in ascending address
            // order
            let mut free = NONE;
            for i in (0..cfg.count).rev() {
                let block = offset + i * cfg.block_size;
                // Safety: `block` is in-bounds and 8-aligned per the checks
                // above.
                unsafe {
                    let hdr = base.add(block) as *mut BlockHeader;
                    (*hdr).next = free;
                    (*hdr).size = cfg.block_size as u32;
                }
                free = block as u32;
            }
            offset = end;
            if pools
                .push(Pool {
                    block_size: cfg.block_size as u32,
                    free,
                })
                .is_err()
            {
                return Err(crate::KernelError::TooManyPools);
            }
        }
        defmt::debug!("memory pools initialized, {} bytes carved", offset);
        Ok(Self { base, pools })
    }

    /// Hand out a block with at least `size` bytes of payload.
    ///
    /// Scans the pool table in order; the first pool whose payload fits
    /// wins. An empty winning pool, or a request no pool can hold, takes the
    /// system down.
    pub fn alloc(&mut self, size: usize) -> NonNull<u8> {
        let base = self.base;
        for pool in &mut self.pools {
            if size > pool.block_size as usize - HEADER_SIZE {
                continue;
            }
            if pool.free == NONE {
                // chosen pool exhausted
                crate::sysdown();
            }
            let offset = pool.free as usize;
            // Safety: free-list offsets always address headers inside the
            // arena.
            unsafe {
                let hdr = base.add(offset) as *mut BlockHeader;
                pool.free = (*hdr).next;
                (*hdr).next = NONE;
                return NonNull::new_unchecked(base.add(offset + HEADER_SIZE));
            }
        }
        // no pool is large enough
        crate::sysdown()
    }

    /// Return a block to the pool recorded in its header. A size matching no
    /// pool takes the system down.
    pub fn free(&mut self, p: NonNull<u8>) {
        // step back to the header in front of the payload
        let hdr = unsafe { p.as_ptr().sub(HEADER_SIZE) } as *mut BlockHeader;
        let size = unsafe { ptr::addr_of!((*hdr).size).read() };
        for pool in &mut self.pools {
            if pool.block_size == size {
                let offset = (hdr as usize - self.base as usize) as u32;
                unsafe { (*hdr).next = pool.free };
                pool.free = offset;
                return;
            }
        }
        crate::sysdown();
    }

    /// Number of free blocks in the pool of the given block size.
    pub fn free_blocks(&self, block_size: usize) -> usize {
        let Some(pool) = self
            .pools
            .iter()
            .find(|p| p.block_size as usize == block_size)
        else {
            return 0;
        };
        let mut n = 0;
        let mut cursor = pool.free;
        while cursor != NONE {
            n += 1;
            // Safety: free-list offsets always address headers inside the
            // arena.
            cursor = unsafe { (*(self.base.add(cursor as usize) as *const BlockHeader)).next };
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(len: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; len].into_boxed_slice())
    }

    fn stock() -> FixedBlockAlloc {
        FixedBlockAlloc::new(arena(1024), &DEFAULT_POOLS).unwrap()
    }

    #[test]
    fn init_links_every_block() {
        let mem = stock();
        assert_eq!(mem.free_blocks(16), 8);
        assert_eq!(mem.free_blocks(32), 8);
        assert_eq!(mem.free_blocks(64), 4);
    }

    #[test]
    fn header_precedes_payload() {
        let mut mem = stock();
        for request in [1usize, 8, 20, 24, 40, 56] {
            let p = mem.alloc(request);
            let size = unsafe {
                (*(p.as_ptr().sub(HEADER_SIZE) as *const BlockHeader)).size
            };
            assert!(
                DEFAULT_POOLS.iter().any(|c| c.block_size as u32 == size),
                "header size {size} matches no pool"
            );
            assert!(request <= size as usize - HEADER_SIZE);
        }
    }

    #[test]
    fn first_fit_prefers_smallest_pool() {
        let mut mem = stock();
        let p = mem.alloc(8);
        let size = unsafe { (*(p.as_ptr().sub(HEADER_SIZE) as *const BlockHeader)).size };
        assert_eq!(size, 16);
        assert_eq!(mem.free_blocks(16), 7);
        assert_eq!(mem.free_blocks(32), 8);
    }

    #[test]
    fn free_then_alloc_returns_same_address() {
        let mut mem = stock();
        let p = mem.alloc(20);
        mem.free(p);
        let q = mem.alloc(20);
        assert_eq!(p, q);
    }

    #[test]
    fn free_restores_count() {
        let mut mem = stock();
        let p = mem.alloc(24);
        assert_eq!(mem.free_blocks(32), 7);
        mem.free(p);
        assert_eq!(mem.free_blocks(32), 8);
    }

    #[test]
    #[should_panic(expected = "system down")]
    fn exhausted_pool_is_fatal() {
        let table = [PoolCfg { block_size: 16, count: 1 }];
        let mut mem = FixedBlockAlloc::new(arena(64), &table).unwrap();
        let _ = mem.alloc(1);
        let _ = mem.alloc(1);
    }

    #[test]
    #[should_panic(expected = "system down")]
    fn oversized_request_is_fatal() {
        let mut mem = stock();
        let _ = mem.alloc(512);
    }

    #[test]
    #[should_panic(expected = "system down")]
    fn free_with_unknown_size_is_fatal() {
        let mut mem = stock();
        let p = mem.alloc(8);
        // corrupt the header so its size matches no pool
        unsafe {
            (*(p.as_ptr().sub(HEADER_SIZE) as *mut BlockHeader)).size = 48;
        }
        mem.free(p);
    }

    #[test]
    fn arena_too_small_is_reported() {
        let err = match FixedBlockAlloc::new(arena(64), &DEFAULT_POOLS) {
            Err(err) => err,
            Ok(_) => panic!("carve fit an arena it cannot"),
        };
        assert_eq!(err, crate::KernelError::ArenaTooSmall);
    }
}

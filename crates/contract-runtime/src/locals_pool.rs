//! Contract locals stacks.
//!
//! Contract calls get their scratch memory (input, output, locals) from a
//! fixed set of large pre-allocated stacks, one call chain per stack. A call
//! path claims a whole stack with `try_lock` and spins between sweeps, never
//! parking: critical sections are the length of one contract call.
//!
//! Read-only function calls pass `stacks_to_ignore = 1` to leave stack 0 to
//! the state-writer path, so a burst of queries can never starve a writer
//! waiting for scratch space.

use parking_lot::{Mutex, MutexGuard};

use crate::errors::ExecutorError;

/// Fixed pool of zero-initialized scratch stacks.
pub struct ContractLocalsPool {
    stacks: Box<[Mutex<Box<[u8]>>]>,
}

impl ContractLocalsPool {
    /// Allocates `count` stacks of `size` bytes each. At least two stacks
    /// are required so the reservation discipline has something to reserve.
    pub fn new(count: usize, size: usize) -> Result<Self, ExecutorError> {
        if count < 2 {
            return Err(ExecutorError::TooFewLocalsStacks { count });
        }
        let stacks = (0..count)
            .map(|_| Mutex::new(vec![0u8; size].into_boxed_slice()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self { stacks })
    }

    pub fn stack_count(&self) -> usize {
        self.stacks.len()
    }

    /// Claims a free stack, scanning slots `stacks_to_ignore..` and spinning
    /// until one frees up. Returns the slot index and the guard holding the
    /// stack's memory.
    pub fn acquire(
        &self,
        stacks_to_ignore: usize,
    ) -> Result<(usize, MutexGuard<'_, Box<[u8]>>), ExecutorError> {
        if stacks_to_ignore >= self.stacks.len() {
            return Err(ExecutorError::NoStackAvailable {
                ignored: stacks_to_ignore,
                count: self.stacks.len(),
            });
        }
        loop {
            for (index, stack) in self.stacks.iter().enumerate().skip(stacks_to_ignore) {
                if let Some(guard) = stack.try_lock() {
                    return Ok((index, guard));
                }
            }
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_at_least_two_stacks() {
        assert!(matches!(
            ContractLocalsPool::new(1, 1024),
            Err(ExecutorError::TooFewLocalsStacks { count: 1 })
        ));
        assert!(ContractLocalsPool::new(2, 1024).is_ok());
    }

    #[test]
    fn acquire_prefers_the_lowest_free_slot() {
        let pool = ContractLocalsPool::new(3, 64).unwrap();
        let (first, _a) = pool.acquire(0).unwrap();
        let (second, _b) = pool.acquire(0).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 1);
    }

    #[test]
    fn ignoring_all_but_the_last_slot_lands_on_the_last_slot() {
        let pool = ContractLocalsPool::new(4, 64).unwrap();
        let (index, _guard) = pool.acquire(3).unwrap();
        assert_eq!(index, 3);
    }

    #[test]
    fn ignoring_every_slot_is_rejected() {
        let pool = ContractLocalsPool::new(2, 64).unwrap();
        assert!(matches!(
            pool.acquire(2),
            Err(ExecutorError::NoStackAvailable { ignored: 2, count: 2 })
        ));
    }

    #[test]
    fn reserved_slot_stays_free_for_the_writer_path() {
        let pool = ContractLocalsPool::new(2, 64).unwrap();
        // A function-style caller leaves slot 0 alone.
        let (reader_slot, _reader) = pool.acquire(1).unwrap();
        assert_eq!(reader_slot, 1);
        // The writer path still gets slot 0 immediately.
        let (writer_slot, _writer) = pool.acquire(0).unwrap();
        assert_eq!(writer_slot, 0);
    }
}

use std::cell::RefCell;
use std::io;
use crate::stack::Stack;

/// Keeps released stacks around so that new coroutines can skip the
/// mapping syscalls.
pub struct StackPool {
    stacks: RefCell<Vec<Stack>>,
    config: StackPoolConfig
}

#[derive(Clone, Debug)]
pub struct StackPoolConfig {
    pub default_stack_size: usize,
    /// Upper bound on cached stacks. Zero means unbounded.
    pub max_pool_size: usize
}

impl Default for StackPoolConfig {
    fn default() -> Self {
        StackPoolConfig {
            default_stack_size: 128 * 1024,
            max_pool_size: 64
        }
    }
}

impl StackPool {
    pub fn new(config: StackPoolConfig) -> StackPool {
        StackPool {
            stacks: RefCell::new(Vec::new()),
            config: config
        }
    }

    /// Hands out the most recently released stack, mapping a fresh one
    /// when the cache is empty.
    pub fn get(&self) -> io::Result<Stack> {
        let cached = self.stacks.borrow_mut().pop();
        if let Some(stack) = cached {
            return Ok(stack);
        }
        trace!("mapping a new {} byte stack", self.config.default_stack_size);
        Stack::new(self.config.default_stack_size)
    }

    /// Caches `stack` for reuse; unmaps it once the cache is full.
    pub fn put(&self, stack: Stack) {
        let limit = self.config.max_pool_size;
        let mut stacks = self.stacks.borrow_mut();
        if limit != 0 && stacks.len() >= limit {
            return;
        }
        stacks.push(stack);
    }

    pub fn cached(&self) -> usize {
        self.stacks.borrow().len()
    }
}

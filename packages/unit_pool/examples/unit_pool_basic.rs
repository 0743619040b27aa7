//! Basic usage example for `unit_pool`.
//!
//! Shows block growth, LIFO reuse, guard sentinels catching an overrun and a tiny linked stack
//! that draws its nodes from the per-thread pool via `PoolAllocator`.
//!
//! Run with `RUST_LOG=trace` to see every unit the pools hand out and take back.

use std::iter;
use std::ptr::NonNull;

use new_zealand::nz;
use tracing::info;
use tracing_subscriber::EnvFilter;
use unit_pool::{PoolAllocator, PoolConfig, UnitAllocator, UnitPool};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    growth_and_reuse();
    guarded_overrun();
    pooled_stack();
}

fn growth_and_reuse() {
    let mut pool = UnitPool::builder()
        .unit_size(4)
        .units_per_block(nz!(2))
        .build()
        .unwrap();

    let a = pool.allocate().unwrap();
    let b = pool.allocate().unwrap();
    let c = pool.allocate().unwrap();

    info!(
        blocks = pool.block_count(),
        capacity = pool.capacity(),
        "three units from two-unit blocks"
    );

    // SAFETY: Each unit came from this pool and is released exactly once.
    unsafe {
        pool.deallocate(a).unwrap();
        pool.deallocate(b).unwrap();
    }

    let reused = pool.allocate().unwrap();
    assert_eq!(reused, b);

    info!(
        blocks = pool.block_count(),
        "most recently released unit was handed out again"
    );

    // SAFETY: Each unit came from this pool and is released exactly once.
    unsafe {
        pool.deallocate(reused).unwrap();
        pool.deallocate(c).unwrap();
    }
}

fn guarded_overrun() {
    let mut pool = UnitPool::builder()
        .unit_size(16)
        .guarded(true)
        .build()
        .unwrap();

    let unit = pool.allocate().unwrap();

    // SAFETY: Writes one byte past the requested size, onto the trailer sentinel. The slot
    // extends past the sentinel so this is still memory owned by the pool.
    unsafe { unit.add(16).write(0xFF) };

    // SAFETY: The unit came from this pool and has not been released.
    match unsafe { pool.deallocate(unit) } {
        Ok(()) => info!("overrun went unnoticed"),
        Err(error) => info!(%error, "overrun detected at release"),
    }
}

struct Node {
    value: u64,
    next: Option<NonNull<Node>>,
}

/// A minimal stack that allocates every node separately.
struct Stack<A: UnitAllocator> {
    allocator: A::Rebind<Node>,
    head: Option<NonNull<Node>>,
}

impl<A: UnitAllocator> Stack<A> {
    fn new(allocator: &A) -> Self {
        Self {
            allocator: allocator.rebind::<Node>(),
            head: None,
        }
    }

    fn push(&mut self, value: u64) {
        let node = self.allocator.allocate(1).unwrap();

        // SAFETY: The storage is fresh, sized and aligned for a Node.
        unsafe {
            node.write(Node {
                value,
                next: self.head,
            });
        }

        self.head = Some(node);
    }

    fn pop(&mut self) -> Option<u64> {
        let node = self.head?;

        // SAFETY: The head node was written by push() and is still allocated.
        let Node { value, next } = unsafe { node.read() };
        self.head = next;

        // SAFETY: The node was allocated by this allocator and its value was moved out above.
        unsafe { self.allocator.deallocate(node, 1) }.unwrap();

        Some(value)
    }
}

impl<A: UnitAllocator> Drop for Stack<A> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

fn pooled_stack() {
    PoolAllocator::<Node>::configure(PoolConfig::new().guarded(true)).unwrap();

    let mut stack = Stack::new(&PoolAllocator::<u64>::new());

    for value in 1..=40 {
        stack.push(value);
    }

    info!(
        blocks = unit_pool::registry::block_count::<Node>(),
        "stack of 40 nodes built"
    );

    let top: Vec<_> = iter_pop(&mut stack).take(3).collect();
    info!(?top, "popped from the stack");
}

fn iter_pop<A: UnitAllocator>(
    stack: &mut Stack<A>,
) -> impl Iterator<Item = u64> + '_ {
    iter::from_fn(move || stack.pop())
}

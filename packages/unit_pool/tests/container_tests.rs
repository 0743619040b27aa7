//! Integration tests for using `PoolAllocator` as the storage source of a node-based container.
//!
//! The container here is written against the `UnitAllocator` trait only, the way a
//! third-party container would be, and rebinds its allocator to its own node type.

use std::cell::Cell;
use std::iter;
use std::ptr::NonNull;
use std::rc::Rc;
use std::thread;

use new_zealand::nz;
use unit_pool::{Error, PoolAllocator, PoolConfig, UnitAllocator, registry};

struct Node<T> {
    value: T,
    next: Option<NonNull<Node<T>>>,
}

/// Singly linked stack that allocates each node separately from `A::Rebind<Node<T>>`.
struct PooledStack<T: 'static, A: UnitAllocator> {
    nodes: A::Rebind<Node<T>>,
    head: Option<NonNull<Node<T>>>,
    len: usize,
}

impl<T: 'static, A: UnitAllocator> PooledStack<T, A> {
    fn new_in(allocator: &A) -> Self {
        Self {
            nodes: allocator.rebind::<Node<T>>(),
            head: None,
            len: 0,
        }
    }

    fn push(&mut self, value: T) -> Result<(), Error> {
        let node = self.nodes.allocate(1)?;

        // SAFETY: The storage is fresh, sized and aligned for a node and only we access it.
        unsafe {
            node.write(Node {
                value,
                next: self.head,
            });
        }

        self.head = Some(node);
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<T> {
        let node = self.head?;

        // SAFETY: Every node reachable from head was initialized by push() and is allocated.
        let Node { value, next } = unsafe { node.read() };
        self.head = next;
        self.len -= 1;

        // SAFETY: The node came from our allocator and its value was moved out above.
        unsafe { self.nodes.deallocate(node, 1) }.unwrap();

        Some(value)
    }

    fn peek(&self) -> Option<&T> {
        // SAFETY: Every node reachable from head is initialized and outlives the borrow of self.
        self.head.map(|node| unsafe { &node.as_ref().value })
    }

    /// Drops every element in place and releases the nodes without moving the values out.
    fn clear(&mut self) {
        while let Some(node) = self.head {
            // SAFETY: The node is initialized; we read the link before destroying it.
            self.head = unsafe { node.as_ref().next };

            // SAFETY: The node is initialized and unreachable from the stack from here on.
            unsafe { self.nodes.destroy(node) };

            // SAFETY: The node came from our allocator and its value was dropped above.
            unsafe { self.nodes.deallocate(node, 1) }.unwrap();

            self.len -= 1;
        }
    }
}

impl<T: 'static, A: UnitAllocator> Drop for PooledStack<T, A> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[test]
fn stack_round_trip_through_pool() {
    struct Item(u32);

    let mut stack = PooledStack::<Item, _>::new_in(&PoolAllocator::<Item>::new());

    for value in 0..100 {
        stack.push(Item(value)).unwrap();
    }

    assert_eq!(stack.len, 100);
    assert_eq!(stack.peek().map(|item| item.0), Some(99));

    for expected in (0..100).rev() {
        assert_eq!(stack.pop().map(|item| item.0), Some(expected));
    }

    assert!(stack.pop().is_none());
}

#[test]
fn node_storage_grows_in_whole_blocks() {
    #[allow(dead_code, reason = "only the layout matters")]
    struct Grown(u8);

    let mut stack = PooledStack::<Grown, _>::new_in(&PoolAllocator::<Grown>::new());

    // The node type is what the registry sees, not the element type.
    assert_eq!(registry::block_count::<Node<Grown>>(), 0);

    for value in 0..16 {
        stack.push(Grown(value)).unwrap();
    }

    assert_eq!(registry::block_count::<Node<Grown>>(), 1);
    assert!(!registry::is_initialized::<Grown>());

    stack.push(Grown(16)).unwrap();
    assert_eq!(registry::block_count::<Node<Grown>>(), 2);

    // Release and refill: the freed nodes are reused, so no further growth.
    for _ in 0..17 {
        assert!(stack.pop().is_some());
    }

    for value in 0..17 {
        stack.push(Grown(value)).unwrap();
    }

    assert_eq!(registry::block_count::<Node<Grown>>(), 2);
}

#[test]
fn configured_node_pool_is_used_by_container() {
    struct Configured(u64);

    PoolAllocator::<Node<Configured>>::configure(
        PoolConfig::new()
            .units_per_block(nz!(4))
            .guarded(true),
    )
    .unwrap();

    let mut stack = PooledStack::<Configured, _>::new_in(&PoolAllocator::<u8>::new());

    for value in 0..9 {
        stack.push(Configured(value)).unwrap();
    }

    assert_eq!(registry::block_count::<Node<Configured>>(), 3);

    let total: u64 = iter::from_fn(|| stack.pop()).map(|item| item.0).sum();
    assert_eq!(total, 36);
}

#[test]
fn dropping_container_drops_every_element() {
    struct Counted(Rc<Cell<usize>>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    let drops = Rc::new(Cell::new(0));

    {
        let mut stack = PooledStack::<Counted, _>::new_in(&PoolAllocator::<Counted>::new());

        for _ in 0..20 {
            stack.push(Counted(Rc::clone(&drops))).unwrap();
        }

        drop(stack.pop());
        assert_eq!(drops.get(), 1);
    }

    assert_eq!(drops.get(), 20);
}

#[test]
fn containers_on_different_threads_use_separate_pools() {
    #[allow(dead_code, reason = "only the layout matters")]
    struct PerThread(usize);

    let handles: Vec<_> = (0..4)
        .map(|thread_index| {
            thread::spawn(move || {
                let mut stack =
                    PooledStack::<PerThread, _>::new_in(&PoolAllocator::<PerThread>::new());

                for value in 0..(thread_index + 1) * 10 {
                    stack.push(PerThread(value)).unwrap();
                }

                registry::block_count::<Node<PerThread>>()
            })
        })
        .collect();

    let block_counts: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    // 10, 20, 30 and 40 nodes with the default 16 units per block.
    assert_eq!(block_counts, vec![1, 2, 2, 3]);
    assert_eq!(registry::block_count::<Node<PerThread>>(), 0);
}

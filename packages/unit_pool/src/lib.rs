//! A fixed-size unit memory pool with block growth, LIFO reuse and optional guard sentinels.
//!
//! This crate provides [`UnitPool`], an allocator that hands out equally-sized units of raw
//! memory carved from larger blocks. Released units are threaded onto a free list and reused
//! before any new memory is acquired. On top of the pool sit a typed facade, a per-thread
//! registry of facades and an allocator adapter that containers can use to source their
//! element storage from a pool.
//!
//! # Key Features
//!
//! - **Fixed-size units**: Every unit has the same layout, defined at pool creation
//! - **Stable memory addresses**: Blocks never move, so units never move either
//! - **LIFO reuse**: The most recently released unit is the next one handed out
//! - **Growth by whole blocks**: A new block is acquired only when no unit is vacant
//! - **Guarded units**: Optional header and trailer sentinels detect overruns and every double
//!   release at release time, reported as [`Error::GuardCorruption`]
//! - **Container adapter**: [`PoolAllocator<T>`] implements the [`UnitAllocator`] contract
//!   on top of a per-thread, per-type pool from the [`registry`]
//! - **Thread mobility**: Pools can be moved between threads (but not shared without
//!   synchronization)
//!
//! # Layers
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`UnitPool`] | Untyped units of a [`Layout`][std::alloc::Layout] set at construction |
//! | [`TypedPool<T>`] | Units sized and aligned for `T`, typed as `NonNull<T>` |
//! | [`registry`] | One [`TypedPool<T>`] per element type per thread |
//! | [`PoolAllocator<T>`] | Stateless [`UnitAllocator`] backed by the registry |
//!
//! # Examples
//!
//! ## Untyped units
//!
//! ```rust
//! use new_zealand::nz;
//! use unit_pool::UnitPool;
//!
//! let mut pool = UnitPool::builder()
//!     .unit_size(4)
//!     .units_per_block(nz!(2))
//!     .build()
//!     .unwrap();
//!
//! let a = pool.allocate().unwrap();
//! let b = pool.allocate().unwrap();
//! let c = pool.allocate().unwrap();
//!
//! // Two units fit in a block, so the third one needed a second block.
//! assert_eq!(pool.block_count(), 2);
//!
//! // SAFETY: Each unit came from this pool and is released exactly once.
//! unsafe {
//!     pool.deallocate(a).unwrap();
//!     pool.deallocate(b).unwrap();
//!     pool.deallocate(c).unwrap();
//! }
//!
//! assert!(pool.is_empty());
//! ```
//!
//! ## Catching an overrun
//!
//! ```rust
//! use unit_pool::{Boundary, Error, UnitPool};
//!
//! let mut pool = UnitPool::builder().unit_size(8).guarded(true).build().unwrap();
//!
//! let unit = pool.allocate().unwrap();
//!
//! // SAFETY: Deliberately writes one byte past the end of the unit, onto the trailer
//! // sentinel, which is still memory owned by the pool.
//! unsafe { unit.add(8).write(0) };
//!
//! // SAFETY: The unit came from this pool and has not been released yet.
//! let result = unsafe { pool.deallocate(unit) };
//!
//! assert!(matches!(
//!     result,
//!     Err(Error::GuardCorruption {
//!         boundary: Boundary::Trailer,
//!         ..
//!     })
//! ));
//! ```
//!
//! ## Container storage
//!
//! ```rust
//! use unit_pool::{PoolAllocator, UnitAllocator};
//!
//! struct Node {
//!     value: u32,
//!     next: Option<std::ptr::NonNull<Node>>,
//! }
//!
//! // A container instantiated for u32 rebinds its allocator to the node type it really stores.
//! let allocator = PoolAllocator::<u32>::new().rebind::<Node>();
//!
//! let node = allocator.allocate(1).unwrap();
//!
//! // SAFETY: The storage is sized and aligned for a Node and only we access it.
//! unsafe {
//!     node.write(Node { value: 5, next: None });
//!     assert_eq!(node.as_ref().value, 5);
//!     assert!(node.as_ref().next.is_none());
//!     allocator.destroy(node);
//!     allocator.deallocate(node, 1).unwrap();
//! }
//! ```
//!
//! # Logging
//!
//! The crate emits [`tracing`] events: `debug` when a pool grows or is torn down, `trace` for
//! every unit handed out or returned and `error` when a guard sentinel does not match. Install
//! any subscriber to see them.

mod allocator;
mod block;
mod builder;
mod config;
mod coordinates;
mod error;
mod guard;
mod pool;
pub mod registry;
mod teardown_policy;
mod typed;

pub use allocator::*;
pub(crate) use block::Block;
pub use builder::*;
pub use config::*;
pub(crate) use coordinates::*;
pub use error::*;
pub use guard::{Boundary, HEADER_SENTINEL, TRAILER_SENTINEL};
pub use pool::*;
pub use teardown_policy::*;
pub use typed::*;

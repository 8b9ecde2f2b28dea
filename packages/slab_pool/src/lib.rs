//! An object pool that groups objects of one type into fixed-capacity slabs.
//!
//! This crate provides [`ObjectPool`], a growable pool that owns objects of type `T`, and
//! [`RawPool`], the untyped allocator underneath it that only hands out storage. Both store
//! their contents in slabs of `CAPACITY` cells (up to 256, default [`DEFAULT_SLAB_CAPACITY`]),
//! each slab being one heap allocation.
//!
//! # Key Features
//!
//! - **Stable addresses**: Objects never move once created, so callers can hold plain pointers
//! - **Constant-time allocation and deallocation**: Free cells form a list threaded through the
//!   free cells themselves and the owning slab of a pointer is found by its address alone
//! - **No per-object overhead**: A cell is as large as the object (one byte for zero-sized types)
//! - **Iteration over live objects**: In slab order, from both ends, starting anywhere
//! - **Removal while iterating**: Cursors destroy the current object and move on
//! - **Explicit memory management**: Empty slabs are kept for reuse until the pool is shrunk
//! - **Flexible drop policies**: Configure behavior when the pool is dropped with objects in it
//! - **Thread mobility**: Pools can be moved between threads (but not shared without
//!   synchronization)
//!
//! # Example
//!
//! ```rust
//! use slab_pool::ObjectPool;
//!
//! #[derive(Debug)]
//! struct Particle {
//!     position: f32,
//!     velocity: f32,
//! }
//!
//! let mut particles = ObjectPool::<Particle>::new();
//!
//! let fast = particles
//!     .create(Particle {
//!         position: 0.0,
//!         velocity: 10.0,
//!     })
//!     .expect("out of memory");
//!
//! for i in 0..100_u8 {
//!     _ = particles
//!         .create(Particle {
//!             position: f32::from(i),
//!             velocity: 1.0,
//!         })
//!         .expect("out of memory");
//! }
//!
//! for particle in &mut particles {
//!     particle.position += particle.velocity;
//! }
//!
//! assert_eq!(particles.get(fast).map(|particle| particle.position), Some(10.0));
//!
//! // Remove the particles that flew off the edge.
//! particles.retain(|particle| particle.position < 50.0);
//! assert_eq!(particles.len(), 50);
//! ```
//!
//! # Raw storage
//!
//! [`RawPool`] hands out uninitialized storage and never runs destructors on its own. It is the
//! building block for callers that manage object lifetimes themselves:
//!
//! ```rust
//! use slab_pool::RawPool;
//!
//! let mut pool = RawPool::<[u8; 64], 16>::new();
//!
//! let buffer = pool.alloc().expect("out of memory");
//!
//! // SAFETY: The storage is freshly allocated and valid for writes of [u8; 64].
//! unsafe {
//!     buffer.write([0; 64]);
//! }
//!
//! pool.free(buffer);
//! ```

mod builder;
mod cursor;
mod directory;
mod drop_policy;
mod error;
mod object_pool;
mod raw_pool;
mod slab;

pub use builder::*;
pub use cursor::*;
pub use drop_policy::*;
pub use error::*;
pub use object_pool::*;
pub use raw_pool::*;

/// Number of cells per slab if the pool type does not say otherwise.
pub const DEFAULT_SLAB_CAPACITY: usize = 256;

/// Largest permitted number of cells per slab.
///
/// Free cells link to each other with 8-bit indices, which caps a slab at 256 cells. Pools with
/// a larger `CAPACITY` fail to compile.
pub const MAX_SLAB_CAPACITY: usize = 256;

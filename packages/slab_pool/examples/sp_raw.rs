//! Managing object lifetimes manually with a `RawPool`:
//!
//! * Allocating uninitialized storage.
//! * Initializing only some of the allocated cells.
//! * Freeing storage while walking the pool with a cursor.

use slab_pool::RawPool;

#[derive(Debug)]
struct Packet {
    id: u32,
    payload: [u8; 48],
}

fn main() {
    // Small slabs make the slab structure visible with only a few packets.
    let mut pool = RawPool::<Packet, 8>::builder().initial_capacity(16).build();

    println!(
        "Reserved {} cells in {} slabs up front",
        pool.capacity(),
        pool.slab_count()
    );

    for id in 0..20 {
        let ptr = pool.alloc().expect("out of memory");

        // SAFETY: The storage is freshly allocated and valid for writes of a Packet.
        unsafe {
            ptr.write(Packet {
                id,
                payload: [0; 48],
            });
        }
    }

    println!(
        "Allocated {} packets, the pool grew to {} slabs",
        pool.len(),
        pool.slab_count()
    );

    // Drop every packet with an odd id. Packet has no destructor, so freeing is enough.
    let mut cursor = pool.cursor_front_mut();

    while let Some(ptr) = cursor.current() {
        // SAFETY: Every allocated cell of this pool holds an initialized Packet.
        let packet = unsafe { ptr.as_ref() };

        if packet.id % 2 == 1 {
            cursor.erase();
        } else {
            cursor.move_next();
        }
    }

    for ptr in &pool {
        // SAFETY: Every allocated cell of this pool holds an initialized Packet.
        let packet = unsafe { ptr.as_ref() };
        println!("Kept packet {} ({} payload bytes)", packet.id, packet.payload.len());
    }

    // The pool never runs destructors, it only releases storage.
    pool.clear();
    println!("Cleared, {} slabs remain", pool.slab_count());
}

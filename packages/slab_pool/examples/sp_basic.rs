//! Basic usage of the `slab_pool` crate:
//!
//! * Creating a pool.
//! * Adding objects.
//! * Accessing objects.
//! * Removing objects, one at a time and while iterating.

use slab_pool::ObjectPool;

fn main() {
    let mut pool = ObjectPool::<String>::new();

    // Creating an object gives you a pointer that stays valid until the object is destroyed.
    let alice = pool.create("Alice".to_string()).expect("out of memory");
    let bob = pool.create("Bob".to_string()).expect("out of memory");
    let charlie = pool.create("Charlie".to_string()).expect("out of memory");

    println!(
        "Object pool contains {} objects, with a capacity of {} in {} slab(s)",
        pool.len(),
        pool.capacity(),
        pool.slab_count()
    );

    // Safe access checks that the pointer refers to a live object of this pool.
    if let Some(name) = pool.get(alice) {
        println!("Retrieved object: {name}");
    }

    // SAFETY: Bob is alive, belongs to this pool and we do not use the pointer again.
    unsafe {
        pool.destroy(bob);
    }

    println!("Is Bob still there? {}", pool.get(bob).is_some());

    // Iteration only visits live objects.
    for name in &pool {
        println!("Still in the pool: {name}");
    }

    // Cursors can remove objects while iterating.
    pool.retain(|name| name.len() > 5);

    println!(
        "After removing short names, Charlie is {}",
        if pool.get(charlie).is_some() { "present" } else { "gone" }
    );

    // Empty slabs are kept around for reuse until you ask for the memory back.
    pool.clear();
    pool.shrink();

    println!("Capacity after clearing and shrinking: {}", pool.capacity());
}

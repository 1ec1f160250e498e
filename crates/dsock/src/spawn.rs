//! The executor socket tasks run on.
//!
//! A small pool of driver threads services one global executor; every
//! socket's serialized task is spawned here. The pool exists so many sockets
//! make progress concurrently; serialization per socket comes from each
//! socket being a single task, not from the thread count.

use std::future::Future;
use std::sync::Arc;
use std::thread;

use smol::{Executor, Task, future};

lazy_static::lazy_static! {
    static ref EXECUTOR: Arc<Executor<'static>> = {
        let executor = Arc::new(Executor::new());
        let threads = thread::available_parallelism()
            .map(|n| n.get().min(4))
            .unwrap_or(1);
        for idx in 0..threads {
            let executor = Arc::clone(&executor);
            thread::Builder::new()
                .name(format!("dsock-io-{idx}"))
                .spawn(move || smol::block_on(executor.run(future::pending::<()>())))
                .expect("failed to spawn dsock io thread");
        }
        executor
    };
}

pub(crate) fn spawn<T: Send + 'static>(
    future: impl Future<Output = T> + Send + 'static,
) -> Task<T> {
    EXECUTOR.spawn(future)
}

#![doc = r#"# emx-threadpool

A fixed set of worker threads draining four priority-class FIFO queues.

Tasks are short, non-cancellable closures submitted at one of four priority
levels. Workers drain strictly by priority on every iteration: Critical,
then High, then Normal (with a bounded block so shutdown is observed), then
Low. There is no aging, so a steady stream of Critical work starves Normal.

The ISR submission path is separate: it takes a plain function pointer,
performs no allocation, uses the non-blocking queue send and skips the
statistics mutex.
"#]

mod pool;

pub use pool::{PoolState, Priority, ThreadPool, ThreadPoolConfig};

//! Prelude module for convenient imports
//!
//! ```
//! use filament::prelude::*;
//!
//! let rt = Runtime::new();
//! let n = rt.block_on(async {
//!     yield_now().await;
//!     get_ref(max_ops_before_yield())
//! });
//! assert_eq!(n.ok(), Some(2048));
//! ```

// Runtime
pub use crate::runtime::{
    current_fiber_id, fork, get_ref, set_ref, yield_now, FiberHandle, Runtime, RuntimeStats,
};

// Errors and exit values
pub use crate::error::{Error, Interrupted, Result};
pub use crate::fiber::{Cause, Either, Exit, FiberId};

// Scheduling
pub use crate::scheduler::{Priority, Scheduler, SchedulerRef, Task};

// Fiber-local state
pub use crate::fiber_refs::{
    current_scheduler, max_ops_before_yield, scheduling_priority, FiberRef, FiberRefs,
};

// Transport
pub use crate::async_input::{AsyncInputConsumer, AsyncInputProducer, SingleProducerAsyncInput};
pub use crate::deferred::Deferred;

// Configuration
pub use crate::config::RuntimeConfig;

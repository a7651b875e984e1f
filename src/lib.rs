//! Filament: a user-space fiber runtime core
//!
//! Filament schedules lightweight, cooperatively yielding computations
//! ("fibers") onto host microtask and timer turns, carries fiber-local state
//! across fork/join boundaries, and provides a backpressured single-slot
//! handoff for building streaming operators.
//!
//! # Quick Start
//!
//! ```
//! use filament::async_input::SingleProducerAsyncInput;
//! use filament::runtime::{self, Runtime};
//!
//! fn main() -> filament::Result<()> {
//!     let rt = Runtime::new();
//!     let input = SingleProducerAsyncInput::<String, u32, &'static str>::new();
//!     let (producer, consumer) = input.split();
//!
//!     let total = rt.block_on(async move {
//!         let reader = runtime::fork(async move {
//!             let mut sum = 0;
//!             while let filament::Exit::Success(n) = consumer.take().await {
//!                 sum += n;
//!             }
//!             sum
//!         })?;
//!         for n in 1..=4 {
//!             producer.emit(n).await?;
//!         }
//!         producer.done("end")?;
//!         reader.join().await
//!     })??;
//!
//!     assert_eq!(total, 10);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Scheduling** | [`scheduler`], [`event_loop`] |
//! | **Fiber state** | [`fiber`], [`fiber_refs`], [`runtime`] |
//! | **Transport** | [`async_input`], [`deferred`] |
//! | **Ambient** | [`config`], [`observability`], [`error`](Error) |

pub mod async_input;
pub mod config;
pub mod deferred;
pub mod event_loop;
pub mod fiber;
pub mod fiber_refs;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod scheduler;

mod error;

pub use error::{Error, Interrupted, Result};
pub use fiber::{Cause, Either, Exit, FiberId};
pub use runtime::Runtime;

/// Filament version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

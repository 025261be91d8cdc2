//! # Composable stream operators with cooperative cancellation
//!
//! This crate builds processing graphs out of small producer/consumer stages
//! that pull from one another with backpressure. Its focus is the operators
//! that keep several asynchronous activities alive at once: flattening
//! operators, multi-source combinators and timing gates. Each one completes,
//! fails and tears down in a well-defined way.
//!
//! ## Core Concepts
//!
//! - **Producer**: Hands out items on demand; lazy until first pulled
//! - **Consumer**: Accepts items one at a time and can be finished or aborted
//! - **Processor**: Per-item transform attached to a producer as a Stage
//! - **Pipe**: Drains a producer into a consumer, carrying completion down
//!   and cancellation up
//! - **CancellationToken**: Single-fire stop signal carrying a [`CancelReason`]
//!
//! ## Example
//!
//! ```rust
//! use sluice::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let sink = CollectConsumer::new();
//!     let rows = zip2(range(1..4), of(vec!["a", "b"]));
//!
//!     pipe_to_end(rows, sink.clone()).await?;
//!     assert_eq!(sink.items().await, vec![(1, "a"), (2, "b")]);
//!     Ok(())
//! }
//! ```

pub mod coordinator;
pub mod error;
pub mod impls;
pub mod operators;
pub mod pipeline;
pub mod push;
pub mod sources;
pub mod stage;
pub mod time;
pub mod token;
pub mod traits;

mod telemetry;

// Re-export commonly used items
pub mod prelude {
    pub use crate::coordinator::{Coordinated, OperatorConfig};
    pub use crate::error::{Error, Result};
    pub use crate::impls::consumers::*;
    pub use crate::operators::*;
    pub use crate::pipeline::{pipe, pipe_to_end, PipeOptions, PipeOutcome, Pipeline, PipelineExt};
    pub use crate::push::{Controller, ProducerState, PushProducer};
    pub use crate::sources::{
        empty, from_event, from_future, from_iter, from_stream, interval, never, of, range,
        throw_error, timer, ListenerTarget,
    };
    pub use crate::stage::{stage, StageReader, StageWriter};
    pub use crate::time::{Timer, TokioTimer};
    pub use crate::token::{CancelReason, CancellationToken};
    pub use crate::traits::{
        BoxProducer, Consumer, ConsumerExt, Processor, Producer, ProducerExt,
    };
}

// Re-export main types
pub use error::{Error, Result};
pub use token::{CancelReason, CancellationToken};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

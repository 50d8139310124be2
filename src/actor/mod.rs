//! Actor/register dataflow core.
//!
//! Producers and consumers exchange reusable buffer slots ("registers")
//! through asynchronous messages. Each actor is a single-threaded reactor that
//! acts only when read-ready and write-ready.
//!
//! # Architecture
//!
//! ```text
//! [Source] ──data──► [NormalForward] ──data──► [Sink]
//!                       ▲     │  └──forward_model──► [Sink (save)]
//!                  model│     │model_diff
//!                       │     ▼
//!                    [ModelUpdate]
//! ```
//!
//! # Design
//!
//! - **Slot handles**: `RegstHandle` is a slot index plus a generation;
//!   stale handles are rejected instead of dangling.
//! - **Pool backpressure**: a producer with no free slot is write-not-ready.
//! - **Enum dispatch**: `BuiltinActor` for built-in variants, `ActorPlugin`
//!   trait objects for the rest, selected through `ActorFactory`.
//! - **Explicit configuration**: `JobConfig` reaches actors via `ActorEnv`.

pub mod actors;
pub mod context;
pub mod error;
pub mod factory;
pub mod id;
pub mod kernel;
pub mod message;
pub mod node;
pub mod pool;
pub mod registry;
pub mod regst;
pub mod staleness;
pub mod task;

pub use actors::{ForwardState, ModelUpdateActor, NormalForwardActor, SinkActor, SourceActor};
pub use context::{ActorContext, ActorEnv, ActorEvent, ActorStats, MsgRoute, ReadableRegst};
pub use error::{ActorError, ActorResult};
pub use factory::{ActorCtor, ActorFactory};
pub use id::{ActorId, RegstDescId, RegstHandle};
pub use kernel::{
    with_blob_accessor, BlobAccessor, BlobBinding, Kernel, KernelCtx, MemorySnapshot, NoopKernel,
    RegstRole, SnapshotReader,
};
pub use message::{ActorMsg, MsgKind};
pub use node::{ActorPlugin, AnyActor, BuiltinActor};
pub use pool::{RegstPool, RegstStore};
pub use registry::RegstRegistry;
pub use regst::{Blob, BlobDesc, Regst, RegstDesc};
pub use staleness::{PieceOutcome, StalenessPolicy};
pub use task::{TaskProto, TaskType};

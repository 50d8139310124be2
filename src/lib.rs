//! # actorflow: actor/register dataflow runtime
//!
//! A runtime for compiled computation graphs in which every node is an actor
//! and every edge is a pool of reusable buffer slots ("registers"). Producers
//! publish registers to their consumers, consumers hand them back, and a
//! producer with no free slot stops. That is the only flow control.
//!
//! ## Architecture
//!
//! - **Actors** ([`actor`]): per-node state machines. The forward-compute
//!   actor handles one-time parameter initialization, staleness-bounded
//!   model pipelining and forward-model snapshots at batch boundaries.
//! - **Kernels** ([`kernels`]): the compute plugged into actors, resolved by
//!   name from the plan.
//! - **Runtime** ([`runtime`]): plan validation, instantiation and two
//!   schedulers, a deterministic single-threaded one and one thread per actor.
//! - **Communication**: crossbeam channels carrying register handles, never
//!   payloads.
//!
//! ## Configuration
//!
//! A plan file bundles the job configuration (training flag, batch cadence,
//! snapshot cadence), the runtime settings and the compiled graph. It is read
//! from TOML or JSON.
//!
//! ## Example
//!
//! ```ignore
//! use actorflow::{
//!     config::JobConfig,
//!     runtime::{demo_training_plan, ActorRuntime, GraphOptions},
//! };
//!
//! let plan = demo_training_plan(4)?;
//! let options = GraphOptions::new(JobConfig::train(4, 8));
//! let report = ActorRuntime::run_to_completion(
//!     &plan,
//!     &options,
//!     &Default::default(),
//!     std::time::Duration::from_secs(30),
//! )?;
//! assert!(report.completed);
//! ```

pub mod actor;
pub mod config;
pub mod error;
pub mod kernels;
pub mod runtime;

pub use error::{ActorFlowError, Result};

//! Built-in actor implementations.

pub mod model_update;
pub mod normal_forward;
pub mod sink;
pub mod source;

pub use model_update::ModelUpdateActor;
pub use normal_forward::{ForwardState, NormalForwardActor};
pub use sink::SinkActor;
pub use source::SourceActor;

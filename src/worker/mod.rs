//! External task worker: lease tasks by topic, run handlers, report back.

pub mod dispatcher;
pub mod handlers;
pub mod registry;
pub mod schema;

pub use dispatcher::{Dispatcher, Resolution, TaskRunner};
pub use registry::{HandlerRegistry, TaskHandler, TaskOutput};
pub use schema::{TaskInput, TopicSchema, VariableKind};

//! UDP notification side: who is listening, how to reach them, and the
//! control channel that keeps the registry current.

pub mod control;
pub mod dispatcher;
pub mod listener;
pub mod registry;

pub use dispatcher::{Dispatcher, NotifyError};
pub use listener::run_listener;
pub use registry::Registry;

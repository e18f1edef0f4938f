pub mod driver;
pub mod keys;
pub mod registry;
pub mod triggers;

pub use driver::{DriverError, DriverEvent, SessionDriver, MIN_COLS, MIN_LINES};
pub use registry::{DriverInstance, ProcessRegistry};
pub use triggers::{
    completion_hint, default_trigger_table, evaluate, Trigger, TriggerAction, TriggerContext,
};

mod build_task;
mod event;
mod migration_run;

pub use build_task::*;
pub use event::*;
pub use migration_run::*;

mod command_router;
mod supervisor;

pub use command_router::CommandRouter;
pub use supervisor::SupervisorCommand;

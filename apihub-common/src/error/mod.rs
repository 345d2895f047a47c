use std::fmt::Debug;

mod build_source;
pub use build_source::{BuildSourceError, SourceRef};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Database Error: {0}")]
    Database(String),

    #[error("Serialization Error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource Not Found: {resource_type} with ID {resource_id}")]
    NotFound {
        resource_type: String,
        resource_id: String,
    },

    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    #[error("State Transition Error: {0}")]
    StateTransition(String),

    #[error("Build Source Error: {0}")]
    BuildSource(#[from] BuildSourceError),

    #[error("Object Store Error: {0}")]
    ObjectStore(String),

    #[error("Channel Communication Error: {0}")]
    ChannelComm(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Internal Error: {0}")]
    Internal(String),

    #[error("Stage Fault: {0}")]
    StageFault(String),

    #[error("Timeout Error: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Ownership of migration {0} was lost")]
    OwnershipLost(uuid::Uuid),

    #[error("Terminate Signal Error")]
    TerminateSignal,

    #[error("Conflict Error: {0}")]
    Conflict(String),
}

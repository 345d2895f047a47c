pub mod build;
pub mod catalog;
pub mod command;
pub mod error;
pub mod event;
pub mod migration;
pub mod object_store;
pub mod state;

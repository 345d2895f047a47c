pub mod config;
pub mod engine;
pub mod keepalive;
pub mod recovery;
pub mod report;
pub mod service;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub mod db;
mod entities;
mod event_logging;
mod mapping;
mod sql;
mod trait_impl;

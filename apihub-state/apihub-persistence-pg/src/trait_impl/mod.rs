mod base;
mod build_task;
mod catalog;
mod maintenance;
mod migration;

pub mod bot;
pub mod cli;
pub mod db;
pub mod engine;
pub mod entity;
pub mod logging;
pub mod mention;
mod migration;
pub mod reply;

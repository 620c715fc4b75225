pub mod capability;
pub mod config;
pub mod engine;
pub mod errors;
pub mod init;
pub mod logging;
pub mod queue;
pub mod server;
pub mod util;

#[cfg(test)]
mod testing;

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod grid;
pub mod local;
pub mod lobby;
pub mod patch;
pub mod persistence;
pub mod rng;
pub mod roulette;
pub mod server_protocol;
pub mod server_utils;
pub mod session;
pub mod special_squares;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

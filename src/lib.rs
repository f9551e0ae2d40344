pub mod addresses;
pub mod arguments;
pub mod balances; // Token aggregation and classification
pub mod cache; // Query cache graph
pub mod config;
pub mod discovery;
pub mod errors; // Structured error handling
pub mod gateway;
pub mod logger;
pub mod pending; // Submitted transaction tracking
pub mod persistence;
pub mod types;
pub mod wallet;
pub mod worth;

#[cfg(test)]
mod testing;

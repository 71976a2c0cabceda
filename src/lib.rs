// Core infrastructure modules
pub mod config;
pub mod core;

// Test infrastructure
#[cfg(test)]
pub mod test_utils;

pub mod collaborators;
pub mod config;
pub mod error;
pub mod segment;

#[cfg(test)]
mod config_test;

pub use collaborators::*;
pub use config::*;
pub use error::*;
pub use segment::*;

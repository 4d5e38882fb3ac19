pub mod cache;
pub mod config;
pub mod tasks;
pub mod transcribe;
pub mod upload;

pub use cache::*;
pub use config::*;
pub use tasks::*;
pub use transcribe::*;

//! Docker-compatible image documents and their canonical encoding.

mod canonical;
mod config;
mod time;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use canonical::*;
pub use config::*;
pub use time::*;

//! Caches shared by every pull in the process.
//!
//! The layer cache tracks downloaded layers by local layer ID. The repository cache binds
//! references to image IDs, and the image cache keeps computed image configs by image ID.
//! Writes are atomic per key in every implementation.

mod db;
mod memory;
mod sqlite;
mod traits;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use db::*;
pub use memory::*;
pub use sqlite::*;
pub use traits::*;

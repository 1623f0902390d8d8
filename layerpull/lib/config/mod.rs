//! Configuration types and defaults for image pulls.

mod defaults;
mod options;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use options::*;

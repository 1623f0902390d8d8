//! The local image store pulled layers are written to, and the host identity that names it.

mod fs;
mod host;
mod traits;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use fs::*;
pub use host::*;
pub use traits::*;

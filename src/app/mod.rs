pub mod context;
pub mod error;
pub mod shutdown;

pub use context::AppContext;
pub use error::{PortageError, Result};
pub use shutdown::{Shutdown, ShutdownController};

pub mod entities;
pub mod error;
pub mod events;

pub use entities::*;
pub use error::{ResearchError, Result};
pub use events::*;

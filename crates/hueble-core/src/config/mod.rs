mod dirs;
mod marker;
mod store;

pub use dirs::Directories;
pub use marker::{LivenessMarker, PidFile};
pub use store::{ConfigStore, IdentityStore, MemoryStore, Settings};

pub mod audio;
pub mod hardware;
pub mod storage;
pub mod types;

pub use audio::*;
pub use hardware::*;
pub use storage::*;
pub use types::*;

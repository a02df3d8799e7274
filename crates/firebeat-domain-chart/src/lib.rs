pub mod document;
pub mod info;
pub mod model;
pub mod package;
pub mod reader;
pub mod schedule;
pub mod selector;
pub mod walls;

pub use document::*;
pub use info::*;
pub use model::*;
pub use package::*;
pub use reader::*;
pub use schedule::*;
pub use selector::*;
pub use walls::*;

pub mod app;
pub mod dispatcher;
pub mod interlock;
pub mod ipc;
pub mod show;
pub mod stop;

pub use app::*;
pub use dispatcher::*;
pub use interlock::*;
pub use ipc::*;
pub use show::*;
pub use stop::*;

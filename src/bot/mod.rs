pub mod commands;
pub mod runtime;

pub use commands::Router;
pub use runtime::BotRuntime;

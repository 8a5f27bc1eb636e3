pub mod config;
pub mod directive;
pub mod executor;
pub mod history;
pub mod logging;
pub mod paths;
pub mod script;

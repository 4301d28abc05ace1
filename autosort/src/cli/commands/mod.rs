// Command implementations, one module per subcommand

pub mod classify;
pub mod config;
pub mod run;
pub mod scan;

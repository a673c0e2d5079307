pub mod init;
pub mod run;
pub mod runner_script;

pub use init::init_command;
pub use run::{run_command, RunArgs};
pub use runner_script::runner_script_command;

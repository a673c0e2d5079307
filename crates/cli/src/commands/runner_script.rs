use anyhow::Result;
use flowbridge_core::guest::RUNNER_SCRIPT;

pub fn runner_script_command() -> Result<()> {
    print!("{RUNNER_SCRIPT}");
    Ok(())
}

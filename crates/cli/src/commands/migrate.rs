use crate::commands::{run_with_database, CommandResult};

pub fn run() -> CommandResult {
    match run_with_database("migrate", |_config, _pool| async { Ok(()) }) {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(failure) => failure,
    }
}

use cleanq_db::{CsvQueueStore, QueueStore, QueueStoreError};

use crate::commands::{block_on, load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("init") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let store = CsvQueueStore::new(&config.queue.path);
    let result = match block_on("init", async {
        store.ensure_initialized().await?;
        store.check_schema().await
    }) {
        Ok(result) => result,
        Err(failure) => return failure,
    };

    match result {
        Ok(()) => CommandResult::success(
            "init",
            format!("queue file ready at `{}`", config.queue.path.display()),
        ),
        Err(error @ QueueStoreError::SchemaMismatch { .. }) => {
            CommandResult::failure("init", "queue_schema", error.to_string(), 4)
        }
        Err(error) => CommandResult::failure("init", "queue_io", error.to_string(), 5),
    }
}

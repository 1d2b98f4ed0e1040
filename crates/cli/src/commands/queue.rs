use cleanq_core::presenter;
use cleanq_db::{CsvQueueStore, QueueStore, QueueStoreError};

use crate::commands::{block_on, load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("queue") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let store = CsvQueueStore::new(&config.queue.path);
    let result = match block_on("queue", store.all()) {
        Ok(result) => result,
        Err(failure) => return failure,
    };

    match result {
        Ok(entries) if entries.is_empty() => {
            CommandResult::success("queue", "no requests queued yet")
        }
        Ok(entries) => CommandResult::success("queue", presenter::render(&entries)),
        Err(error @ QueueStoreError::SchemaMismatch { .. }) => {
            CommandResult::failure("queue", "queue_schema", error.to_string(), 4)
        }
        Err(error) => CommandResult::failure("queue", "queue_io", error.to_string(), 5),
    }
}

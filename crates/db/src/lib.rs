pub mod queue;
pub mod response_log;

pub use queue::{
    CsvQueueStore, InMemoryQueueStore, QueueStore, QueueStoreError, QUEUE_COLUMNS,
    REQUIREMENT_SEPARATOR,
};
pub use response_log::ResponseLog;

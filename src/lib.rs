pub mod batch;
pub mod config;
pub mod history;
pub mod locate;
pub mod logging;
pub mod page;
pub mod poll;
pub mod record;
pub mod sets;
pub mod sink;
pub mod survey;
pub mod targets;

pub use batch::{BatchRunner, BatchSummary};
pub use config::{Config, Job};
pub use poll::{RetryPolicy, TablePoller};
pub use record::{ColumnMap, RecordSet};
pub use targets::Target;

pub mod dispatcher;
pub mod queue;
pub mod scanner;
pub mod task;

pub use dispatcher::Dispatcher;
pub use queue::TaskQueue;
pub use scanner::{DatabaseScanner, ScanReport};
pub use task::{Task, TaskStatus};

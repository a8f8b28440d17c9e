pub mod coordinator;
pub mod report_parser;
pub mod task_parser;

pub use coordinator::{Coordinator, CoordinatorError, Delegation};
pub use report_parser::{DefaultReportParser, ReportParser};
pub use task_parser::{DefaultTaskBlockParser, ParsedTaskBlock, TaskBlockParser};

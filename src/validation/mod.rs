//! Running bound schemas against documents
//!
//! - [`executor`] walks a document and evaluates the active patterns
//! - [`report`] collects the resulting events and settles the verdict
//! - [`svrl`] renders reports in the standard report language
//! - [`batch`] validates many documents on worker threads

pub mod batch;
pub mod executor;
pub mod report;
pub mod svrl;

pub use batch::{validate_batch, validate_file, validate_files};
pub use executor::{validate, Executor};
pub use report::{
    ActivePattern, Annotation, CheckOutcome, ExecutionFailure, FiredRule, ReportBuilder,
    ValidationEvent, ValidationReport,
};
pub use svrl::{to_svrl, SvrlOptions};

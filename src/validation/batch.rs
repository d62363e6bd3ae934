//! Parallel validation
//!
//! A [`BoundSchema`] is immutable, so any number of workers can share it.
//! Workers pull the next document index from a shared counter; results keep
//! the input order. A panic while validating one document becomes that
//! document's error.

use std::fs;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use tracing::{debug, warn};

use super::executor::Executor;
use super::report::{ReportBuilder, ValidationReport};
use crate::binding::BoundSchema;
use crate::documents::{parse_document, xml_error};
use crate::error::{Error, Result};
use crate::limits::Limits;

/// Number of workers for `jobs` items
fn worker_count(jobs: usize) -> usize {
    let available = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    available.min(jobs).max(1)
}

/// Run `job` for every index below `count` on scoped workers
fn run_parallel<T, F>(count: usize, job: F) -> Vec<Result<T>>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync,
{
    let slots: Vec<Mutex<Option<Result<T>>>> = (0..count).map(|_| Mutex::new(None)).collect();
    let next = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..worker_count(count) {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                if index >= count {
                    break;
                }
                let result = match panic::catch_unwind(AssertUnwindSafe(|| job(index))) {
                    Ok(result) => result,
                    Err(payload) => {
                        let reason = payload
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        warn!(index, %reason, "validation panicked");
                        Err(Error::Other(format!("validation panicked: {}", reason)))
                    }
                };
                if let Ok(mut slot) = slots[index].lock() {
                    *slot = Some(result);
                }
            });
        }
    });

    slots
        .into_iter()
        .map(|slot| match slot.into_inner() {
            Ok(Some(result)) => result,
            _ => Err(Error::Other("validation did not complete".to_string())),
        })
        .collect()
}

/// Validate parsed documents in parallel
///
/// Reports are returned in input order.
pub fn validate_batch(
    schema: &BoundSchema,
    documents: &[roxmltree::Document<'_>],
) -> Vec<Result<ValidationReport>> {
    debug!(documents = documents.len(), "validating batch");
    let executor = Executor::new(schema);
    run_parallel(documents.len(), |index| {
        Ok(executor.run(&documents[index], ReportBuilder::new(schema)))
    })
}

/// Validate one file
pub fn validate_file(
    schema: &BoundSchema,
    path: &Path,
    limits: &Limits,
) -> Result<ValidationReport> {
    let name = path.display().to_string();
    let text = fs::read_to_string(path)?;
    let document = parse_document(&text, limits).map_err(|e| xml_error(&name, e))?;
    let builder = ReportBuilder::new(schema).with_document(name);
    Ok(Executor::new(schema).run(&document, builder))
}

/// Read, parse and validate files in parallel
///
/// Each entry is the file's report, or the error that kept it from being
/// validated.
pub fn validate_files(
    schema: &BoundSchema,
    paths: &[PathBuf],
    limits: &Limits,
) -> Vec<Result<ValidationReport>> {
    debug!(files = paths.len(), "validating files");
    run_parallel(paths.len(), |index| validate_file(schema, &paths[index], limits))
}

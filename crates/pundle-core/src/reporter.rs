//! Error reporting collaborator.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::PundleError;

/// Receives issues that do not abort the caller, e.g. failed watch batches.
pub trait Reporter: Send + Sync {
    fn report(&self, issue: &PundleError);
}

/// Default reporter: one `error!` event per issue.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, issue: &PundleError) {
        let path = issue
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match issue.loc {
            Some(loc) => tracing::error!(
                code = %issue.code,
                kind = %issue.kind,
                path = %path,
                line = loc.line,
                column = loc.column,
                "{}",
                issue.message
            ),
            None => tracing::error!(
                code = %issue.code,
                kind = %issue.kind,
                path = %path,
                "{}",
                issue.message
            ),
        }
    }
}

/// Keeps every reported issue in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    issues: Mutex<Vec<PundleError>>,
}

impl CollectingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn issues(&self) -> Vec<PundleError> {
        self.issues.lock().clone()
    }

    pub fn take(&self) -> Vec<PundleError> {
        std::mem::take(&mut *self.issues.lock())
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, issue: &PundleError) {
        self.issues.lock().push(issue.clone());
    }
}

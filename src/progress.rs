//! Progress-callback trait for per-company batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ProfileConfigBuilder::progress_callback`] to receive
//! events as the orchestrator walks the company list. The CLI uses this to
//! drive its progress bar; embedders can forward events to a log pane or a
//! channel.
//!
//! # Example
//!
//! ```rust
//! use profile_forge::{BatchProgressCallback, ProfileConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_company_complete(&self, _index: usize, _total: usize, result: &profile_forge::CompanyResult) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{} done", result.company);
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { done: AtomicUsize::new(0) });
//! let config = ProfileConfig::builder()
//!     .progress_callback(cb as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Phase;
use crate::output::CompanyResult;
use std::sync::Arc;

/// Called by the orchestrator as it processes each company.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `index` is 1-based.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after the template has been scanned.
    fn on_batch_start(&self, total_companies: usize, field_count: usize) {
        let _ = (total_companies, field_count);
    }

    /// Called before the first phase of a company.
    fn on_company_start(&self, index: usize, total: usize, company: &str) {
        let _ = (index, total, company);
    }

    /// Called as each phase of a company begins.
    fn on_phase(&self, company: &str, phase: Phase) {
        let _ = (company, phase);
    }

    /// Called when every phase of a company succeeded.
    fn on_company_complete(&self, index: usize, total: usize, result: &CompanyResult) {
        let _ = (index, total, result);
    }

    /// Called when a company failed in some phase.
    fn on_company_error(&self, index: usize, total: usize, company: &str, error: &str) {
        let _ = (index, total, company, error);
    }

    /// Called once after the last company (or after a stop request).
    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        let _ = (total, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ProfileConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct PhaseRecorder {
        phases: Mutex<Vec<Phase>>,
    }

    impl BatchProgressCallback for PhaseRecorder {
        fn on_phase(&self, _company: &str, phase: Phase) {
            self.phases.lock().unwrap().push(phase);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(3, 12);
        cb.on_company_start(1, 3, "Nokia");
        cb.on_phase("Nokia", Phase::Generate);
        cb.on_company_error(1, 3, "Nokia", "boom");
        cb.on_batch_complete(3, 2);
    }

    #[test]
    fn recorder_sees_phases_in_order() {
        let rec = PhaseRecorder::default();
        rec.on_phase("Kone", Phase::Generate);
        rec.on_phase("Kone", Phase::Logo);
        rec.on_phase("Kone", Phase::Render);
        assert_eq!(
            *rec.phases.lock().unwrap(),
            vec![Phase::Generate, Phase::Logo, Phase::Render]
        );
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(1, 0);
    }
}

//! The two capabilities a host lends to a run: a log sink and a progress sink.
//!
//! Both are called from whatever thread runs the pipeline and must return quickly. A desktop
//! or web front end implements `Reporter` by forwarding to its own (thread-safe) widgets; the
//! CLI uses `TracingReporter`.

use tracing::{debug, info};

pub trait Reporter: Send + Sync {
    /// One human-readable line for the activity log.
    fn log(&self, line: &str);

    /// Overall completion in `[0, 1]`.
    fn progress(&self, fraction: f32);
}

/// Forwards log lines to `info!` and progress to `debug!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn log(&self, line: &str) {
        info!("{line}");
    }

    fn progress(&self, fraction: f32) {
        debug!("Progress {:.0}%", fraction.clamp(0.0, 1.0) * 100.0);
    }
}

/// Receives the progress (0 to 100) of a unit of work.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, percentage: f64);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _percentage: f64) {}
}

/// Maps a 0 to 100 signal onto `offset + factor * p` of an outer reporter.
pub struct ScaledProgress<'a> {
    inner: &'a dyn ProgressReporter,
    offset: f64,
    factor: f64,
}

impl<'a> ScaledProgress<'a> {
    pub fn new(inner: &'a dyn ProgressReporter, offset: f64, factor: f64) -> Self {
        Self {
            inner,
            offset,
            factor,
        }
    }
}

impl ProgressReporter for ScaledProgress<'_> {
    fn report(&self, percentage: f64) {
        self.inner.report(self.offset + self.factor * percentage);
    }
}

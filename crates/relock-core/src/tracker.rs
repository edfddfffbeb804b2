use parking_lot::Mutex;

/// Counts started surfaces to find the "fully backgrounded" boundary.
#[derive(Debug, Default)]
pub struct ForegroundTracker {
    started: Mutex<usize>,
}

impl ForegroundTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surface_started(&self) -> usize {
        let mut started = self.started.lock();
        *started += 1;
        *started
    }

    /// Records a stop. Returns true when this stop took the count from one to
    /// zero and was not a transient teardown.
    pub fn surface_stopped(&self, transient: bool) -> bool {
        let mut started = self.started.lock();
        if *started == 0 {
            return false;
        }
        *started -= 1;
        *started == 0 && !transient
    }

    pub fn count(&self) -> usize {
        *self.started.lock()
    }
}

/// Progress events emitted by the simulation workflow.
#[derive(Debug, Clone)]
pub enum Progress {
    PhaseStart { name: &'static str },
    PhaseFinish,

    /// Emitted once per completed shot, in completion (not index) order.
    ShotFinished { index: usize },

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

/// Forwards progress events to an optional caller-supplied callback; the
/// engine itself never renders anything.
#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}

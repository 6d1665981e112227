use std::sync::atomic::{AtomicBool, Ordering};

/// Picks the log level for a recurring error class: the first occurrence
/// warns, every later one is demoted to debug so a broken peer cannot
/// flood the log from the packet path.
#[derive(Default)]
pub(crate) struct WarnOnce {
    warned: AtomicBool,
}

impl WarnOnce {
    pub(crate) const fn new() -> Self {
        Self {
            warned: AtomicBool::new(false),
        }
    }

    pub(crate) fn level(&self) -> log::Level {
        if self.warned.swap(true, Ordering::Relaxed) {
            log::Level::Debug
        } else {
            log::Level::Warn
        }
    }
}

use flume::{Receiver, Sender};

/// Single-slot skip channel for one room.
///
/// At most one skip can be pending; triggering an already pending signal is a
/// no-op rather than a blocking send.
#[derive(Debug, Clone)]
pub struct SkipSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl SkipSignal {
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        Self { tx, rx }
    }

    /// Raises the signal. Returns false if one was already pending.
    pub fn trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }

    /// Consumes a pending signal, if any.
    pub fn take(&self) -> bool {
        self.rx.try_recv().is_ok()
    }

    #[allow(dead_code)]
    pub fn is_pending(&self) -> bool {
        !self.rx.is_empty()
    }
}

impl Default for SkipSignal {
    fn default() -> Self {
        Self::new()
    }
}

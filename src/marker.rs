use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};

/// Create the experiment-event queue: any number of producers, one consumer.
pub fn marker_queue() -> (MarkerSender, EventCorrelator) {
    let (tx, rx) = unbounded();
    (MarkerSender { tx }, EventCorrelator { rx })
}

/// Producer half, cloned freely by experiment code.
#[derive(Debug, Clone)]
pub struct MarkerSender {
    tx: Sender<Vec<i32>>,
}

impl MarkerSender {
    /// Queue a marker for the next assembled sample. Returns false once the
    /// consumer is gone.
    pub fn send(&self, marker: impl Into<Vec<i32>>) -> bool {
        match self.tx.try_send(marker.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Consumer half, attached to samples as they are assembled.
#[derive(Debug, Clone)]
pub struct EventCorrelator {
    rx: Receiver<Vec<i32>>,
}

impl EventCorrelator {
    /// Take at most one pending marker without blocking.
    pub fn next_marker(&self) -> Option<Vec<i32>> {
        self.rx.try_recv().ok()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

/// Dequeue for a correlator that may not be configured.
pub fn correlate(correlator: Option<&EventCorrelator>) -> Option<Vec<i32>> {
    correlator.and_then(EventCorrelator::next_marker)
}

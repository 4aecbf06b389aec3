//! Runs blocking link operations off the session thread.
//!
//! Each adapter owns one worker. Jobs execute in submission order, and the
//! resulting completion plus any notices the peer raised meanwhile are
//! posted to the bound sink, so the session sees them in causal order.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::traits::{GattLink, LinkNotice, TransportError};
use crate::protocol::Characteristic;
use crate::state::{EventSink, SessionEvent};

type Job<L> = Box<dyn FnOnce(&mut L) -> SessionEvent + Send>;

/// Maps a peer-initiated notice to a session event.
pub type NoticeMap = Box<dyn Fn(LinkNotice) -> SessionEvent + Send>;

pub struct LinkWorker<L: GattLink + 'static> {
    jobs: Option<mpsc::Sender<Job<L>>>,
    sink: Arc<Mutex<Option<EventSink>>>,
    thread: Option<JoinHandle<()>>,
}

impl<L: GattLink + 'static> LinkWorker<L> {
    pub fn spawn(name: &str, link: L, notice_map: NoticeMap) -> Self {
        let (tx, rx) = mpsc::channel::<Job<L>>();
        let sink: Arc<Mutex<Option<EventSink>>> = Arc::new(Mutex::new(None));
        let worker_sink = Arc::clone(&sink);

        let thread = thread::Builder::new()
            .name(format!("link-{}", name))
            .spawn(move || {
                let mut link = link;
                for job in rx {
                    let event = job(&mut link);
                    let notices = link.poll_notices();

                    let bound = worker_sink.lock().unwrap_or_else(|e| e.into_inner());
                    let Some(sink) = bound.as_ref() else {
                        debug!("Dropping link completion, adapter released");
                        continue;
                    };
                    sink.post(event);
                    for notice in notices {
                        sink.post(notice_map(notice));
                    }
                }
                debug!("Link worker stopped");
            });

        let (jobs, thread) = match thread {
            Ok(handle) => (Some(tx), Some(handle)),
            Err(e) => {
                warn!(error = %e, "Failed to spawn link worker");
                (None, None)
            }
        };

        Self { jobs, sink, thread }
    }

    pub fn bind(&self, sink: EventSink) {
        *self.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    pub fn release(&self) {
        *self.sink.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Queue a link operation. If the worker is gone, `on_closed` is posted
    /// instead so the session still gets a completion.
    pub fn submit<F>(&self, job: F, on_closed: impl FnOnce(TransportError) -> SessionEvent)
    where
        F: FnOnce(&mut L) -> SessionEvent + Send + 'static,
    {
        let sent = self
            .jobs
            .as_ref()
            .is_some_and(|jobs| jobs.send(Box::new(job)).is_ok());
        if !sent {
            warn!("Link worker unavailable");
            let bound = self.sink.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(sink) = bound.as_ref() {
                sink.post(on_closed(TransportError::LinkClosed));
            }
        }
    }

    pub fn connect(&self) {
        self.submit(
            |link| {
                let result = link.connect();
                SessionEvent::ConnectionStateChanged {
                    connected: result.is_ok(),
                    error: result.err(),
                }
            },
            |error| SessionEvent::ConnectionStateChanged {
                connected: false,
                error: Some(error),
            },
        );
    }

    pub fn disconnect(&self) {
        self.submit(
            |link| SessionEvent::ConnectionStateChanged {
                connected: false,
                error: link.disconnect().err(),
            },
            |error| SessionEvent::ConnectionStateChanged {
                connected: false,
                error: Some(error),
            },
        );
    }

    pub fn discover(&self) {
        self.submit(
            |link| match link.discover() {
                Ok(variant) => SessionEvent::ServiceDiscovered {
                    variant,
                    error: None,
                },
                Err(e) => SessionEvent::ServiceDiscovered {
                    variant: None,
                    error: Some(e),
                },
            },
            |error| SessionEvent::ServiceDiscovered {
                variant: None,
                error: Some(error),
            },
        );
    }

    /// Toggle control point indications.
    pub fn set_notify(&self, enabled: bool) {
        self.submit(
            move |link| match link.set_notify(Characteristic::ControlPoint, enabled) {
                Ok(state) => SessionEvent::NotificationStateChanged {
                    enabled: state,
                    error: None,
                },
                Err(e) => SessionEvent::NotificationStateChanged {
                    enabled: false,
                    error: Some(e),
                },
            },
            |error| SessionEvent::NotificationStateChanged {
                enabled: false,
                error: Some(error),
            },
        );
    }
}

impl<L: GattLink + 'static> Drop for LinkWorker<L> {
    /// Never blocks. A worker still inside a link call drains its queue and
    /// exits on its own once the call returns.
    fn drop(&mut self) {
        self.release();
        self.jobs.take();
        if let Some(thread) = self.thread.take()
            && thread.is_finished()
            && thread.join().is_err()
        {
            warn!("Link worker panicked");
        }
    }
}

/// Plaintext mapping of peer notices.
pub fn plain_notice(notice: LinkNotice) -> SessionEvent {
    match notice {
        LinkNotice::Indication {
            characteristic,
            value,
        } => SessionEvent::ValueUpdated {
            characteristic,
            value: Some(value),
            error: None,
        },
        LinkNotice::Disconnected => SessionEvent::ConnectionStateChanged {
            connected: false,
            error: Some(TransportError::Disconnected),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::protocol::ProtocolVariant;

    /// Connect blocks until the test lets it go.
    struct HangingLink {
        gate: mpsc::Receiver<()>,
    }

    impl GattLink for HangingLink {
        fn connect(&mut self) -> Result<(), TransportError> {
            let _ = self.gate.recv_timeout(Duration::from_secs(10));
            Ok(())
        }

        fn disconnect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn discover(&mut self) -> Result<Option<ProtocolVariant>, TransportError> {
            Ok(Some(ProtocolVariant::Current))
        }

        fn set_notify(
            &mut self,
            _characteristic: Characteristic,
            enabled: bool,
        ) -> Result<bool, TransportError> {
            Ok(enabled)
        }

        fn write(
            &mut self,
            _characteristic: Characteristic,
            _data: &[u8],
        ) -> Result<Option<Vec<u8>>, TransportError> {
            Ok(None)
        }

        fn read(&mut self, _characteristic: Characteristic) -> Result<Vec<u8>, TransportError> {
            Ok(Vec::new())
        }

        fn mtu(&self) -> usize {
            23
        }

        fn poll_notices(&mut self) -> Vec<LinkNotice> {
            Vec::new()
        }
    }

    #[test]
    fn test_completions_in_order() {
        let (gate_tx, gate) = mpsc::channel();
        let worker = LinkWorker::spawn("ordered", HangingLink { gate }, Box::new(plain_notice));
        let (sink, events) = EventSink::channel();
        worker.bind(sink);

        gate_tx.send(()).unwrap();
        worker.connect();
        worker.discover();

        let first = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            first,
            SessionEvent::ConnectionStateChanged {
                connected: true,
                ..
            }
        ));
        let second = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            second,
            SessionEvent::ServiceDiscovered {
                variant: Some(ProtocolVariant::Current),
                ..
            }
        ));
    }

    #[test]
    fn test_drop_does_not_wait_for_stuck_call() {
        let (gate_tx, gate) = mpsc::channel();
        let worker = LinkWorker::spawn("stuck", HangingLink { gate }, Box::new(plain_notice));
        let (sink, events) = EventSink::channel();
        worker.bind(sink);
        worker.connect();
        worker.disconnect();

        let started = Instant::now();
        drop(worker);
        assert!(started.elapsed() < Duration::from_secs(1));

        // Released: whatever the call returns later is not delivered.
        drop(gate_tx);
        assert!(events.recv_timeout(Duration::from_millis(200)).is_err());
    }
}

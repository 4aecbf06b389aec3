//! Adapter for a direct radio link to the peripheral.

use tracing::{debug, instrument};

use super::traits::{GattLink, TransportAdapter, TransportKind};
use super::worker::{LinkWorker, plain_notice};
use crate::protocol::Characteristic;
use crate::state::{EventSink, SessionEvent};

/// Drives a [`GattLink`] directly, no payload transformation.
pub struct DirectAdapter<L: GattLink + 'static> {
    name: String,
    mtu: usize,
    worker: LinkWorker<L>,
}

impl<L: GattLink + 'static> DirectAdapter<L> {
    pub fn new(name: impl Into<String>, link: L) -> Self {
        let name = name.into();
        let mtu = link.mtu();
        let worker = LinkWorker::spawn(&name, link, Box::new(plain_notice));
        debug!(device = %name, mtu, "Direct adapter ready");
        Self { name, mtu, worker }
    }
}

impl<L: GattLink + 'static> TransportAdapter for DirectAdapter<L> {
    fn bind(&mut self, sink: EventSink) {
        self.worker.bind(sink);
    }

    fn release(&mut self) {
        self.worker.release();
    }

    #[instrument(skip(self), fields(device = %self.name))]
    fn connect(&mut self) {
        self.worker.connect();
    }

    fn disconnect(&mut self) {
        self.worker.disconnect();
    }

    fn discover_ota_service(&mut self) {
        self.worker.discover();
    }

    fn enable_notifications(&mut self, enabled: bool) {
        self.worker.set_notify(enabled);
    }

    fn write(&mut self, characteristic: Characteristic, data: &[u8]) {
        let data = data.to_vec();
        self.worker.submit(
            move |link| SessionEvent::WriteCompleted {
                characteristic,
                result: link.write(characteristic, &data),
            },
            move |error| SessionEvent::WriteCompleted {
                characteristic,
                result: Err(error),
            },
        );
    }

    fn read(&mut self, characteristic: Characteristic) {
        self.worker.submit(
            move |link| match link.read(characteristic) {
                Ok(value) => SessionEvent::ValueUpdated {
                    characteristic,
                    value: Some(value),
                    error: None,
                },
                Err(e) => SessionEvent::ValueUpdated {
                    characteristic,
                    value: None,
                    error: Some(e),
                },
            },
            move |error| SessionEvent::ValueUpdated {
                characteristic,
                value: None,
                error: Some(error),
            },
        );
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    fn name(&self) -> &str {
        &self.name
    }
}

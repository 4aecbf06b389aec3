//! Adapter for devices reached through an encrypted mesh tunnel.
//!
//! Every payload is sealed with ChaCha20-Poly1305 under the tunnel key.
//! Sealed layout: `nonce (12) | ciphertext | tag (16)`. The first nonce byte
//! is the sender's direction, the next eight a per-direction counter, so the
//! two ends never reuse a nonce under the shared key.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, NewAead},
};
use tracing::{debug, instrument};

use super::traits::{GattLink, LinkNotice, TransportAdapter, TransportError, TransportKind};
use super::worker::LinkWorker;
use crate::protocol::Characteristic;
use crate::state::{EventSink, SessionEvent};

pub const TUNNEL_NONCE_SIZE: usize = 12;
pub const TUNNEL_TAG_SIZE: usize = 16;
/// Bytes added to every tunneled payload.
pub const TUNNEL_OVERHEAD: usize = TUNNEL_NONCE_SIZE + TUNNEL_TAG_SIZE;

/// 256-bit tunnel key shared with the node.
pub type TunnelKey = [u8; 32];

/// Which end of the tunnel is sealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TunnelDirection {
    ToNode = 0x01,
    FromNode = 0x02,
}

/// Seals outgoing and opens incoming tunnel payloads.
pub struct TunnelCipher {
    cipher: ChaCha20Poly1305,
    direction: TunnelDirection,
    counter: AtomicU64,
}

impl TunnelCipher {
    pub fn new(key: &TunnelKey, direction: TunnelDirection) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
            direction,
            counter: AtomicU64::new(0),
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, TransportError> {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut nonce = [0u8; TUNNEL_NONCE_SIZE];
        nonce[0] = self.direction as u8;
        nonce[1..9].copy_from_slice(&counter.to_le_bytes());

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| TransportError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(TUNNEL_NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, TransportError> {
        if sealed.len() < TUNNEL_OVERHEAD {
            return Err(TransportError::Crypto(format!(
                "Sealed payload too short: {} bytes",
                sealed.len()
            )));
        }
        let (nonce, ciphertext) = sealed.split_at(TUNNEL_NONCE_SIZE);
        if nonce[0] == self.direction as u8 {
            return Err(TransportError::Crypto("Reflected payload".into()));
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| TransportError::Crypto(format!("Decryption failed: {}", e)))
    }
}

/// Drives a tunnel [`GattLink`], sealing writes and opening responses,
/// reads and indications.
pub struct MeshTunnelAdapter<L: GattLink + 'static> {
    name: String,
    mtu: usize,
    mesh_address: u16,
    cipher: Arc<TunnelCipher>,
    worker: LinkWorker<L>,
}

impl<L: GattLink + 'static> MeshTunnelAdapter<L> {
    pub fn new(name: impl Into<String>, mesh_address: u16, key: &TunnelKey, link: L) -> Self {
        let name = name.into();
        let mtu = link.mtu();
        let cipher = Arc::new(TunnelCipher::new(key, TunnelDirection::ToNode));

        let notice_cipher = Arc::clone(&cipher);
        let worker = LinkWorker::spawn(
            &name,
            link,
            Box::new(move |notice| match notice {
                LinkNotice::Indication {
                    characteristic,
                    value,
                } => match notice_cipher.open(&value) {
                    Ok(plain) => SessionEvent::ValueUpdated {
                        characteristic,
                        value: Some(plain),
                        error: None,
                    },
                    Err(e) => SessionEvent::ValueUpdated {
                        characteristic,
                        value: None,
                        error: Some(e),
                    },
                },
                LinkNotice::Disconnected => SessionEvent::ConnectionStateChanged {
                    connected: false,
                    error: Some(TransportError::Disconnected),
                },
            }),
        );

        debug!(
            device = %name,
            mesh_address = %format!("0x{:04X}", mesh_address),
            mtu,
            "Mesh tunnel adapter ready"
        );
        Self {
            name,
            mtu,
            mesh_address,
            cipher,
            worker,
        }
    }
}

impl<L: GattLink + 'static> TransportAdapter for MeshTunnelAdapter<L> {
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
        let cipher = Arc::clone(&self.cipher);
        self.worker.submit(
            move |link| {
                let result = cipher
                    .seal(&data)
                    .and_then(|sealed| link.write(characteristic, &sealed))
                    .and_then(|response| response.map(|r| cipher.open(&r)).transpose());
                SessionEvent::WriteCompleted {
                    characteristic,
                    result,
                }
            },
            move |error| SessionEvent::WriteCompleted {
                characteristic,
                result: Err(error),
            },
        );
    }

    fn read(&mut self, characteristic: Characteristic) {
        let cipher = Arc::clone(&self.cipher);
        self.worker.submit(
            move |link| match link.read(characteristic).and_then(|v| cipher.open(&v)) {
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

    fn payload_overhead(&self) -> usize {
        TUNNEL_OVERHEAD
    }

    fn kind(&self) -> TransportKind {
        TransportKind::MeshTunnel
    }

    fn mesh_address(&self) -> Option<u16> {
        Some(self.mesh_address)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: TunnelKey = [0x5A; 32];

    #[test]
    fn test_seal_open_between_ends() {
        let host = TunnelCipher::new(&KEY, TunnelDirection::ToNode);
        let node = TunnelCipher::new(&KEY, TunnelDirection::FromNode);

        let sealed = host.seal(&[0x03, 0x26, 0x39, 0xF4, 0xCB]).unwrap();
        assert_eq!(sealed.len(), 5 + TUNNEL_OVERHEAD);
        assert_eq!(node.open(&sealed).unwrap(), vec![0x03, 0x26, 0x39, 0xF4, 0xCB]);
    }

    #[test]
    fn test_nonces_advance() {
        let host = TunnelCipher::new(&KEY, TunnelDirection::ToNode);
        let a = host.seal(b"same").unwrap();
        let b = host.seal(b"same").unwrap();
        assert_ne!(a[..TUNNEL_NONCE_SIZE], b[..TUNNEL_NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_reject_tampered_and_reflected() {
        let host = TunnelCipher::new(&KEY, TunnelDirection::ToNode);
        let node = TunnelCipher::new(&KEY, TunnelDirection::FromNode);

        let mut sealed = host.seal(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(node.open(&sealed), Err(TransportError::Crypto(_))));

        let sealed = host.seal(b"payload").unwrap();
        assert!(matches!(host.open(&sealed), Err(TransportError::Crypto(_))));

        assert!(matches!(node.open(&[0u8; 4]), Err(TransportError::Crypto(_))));
    }

    #[test]
    fn test_wrong_key_fails() {
        let host = TunnelCipher::new(&KEY, TunnelDirection::ToNode);
        let other = TunnelCipher::new(&[0x11; 32], TunnelDirection::FromNode);
        let sealed = host.seal(b"payload").unwrap();
        assert!(other.open(&sealed).is_err());
    }
}

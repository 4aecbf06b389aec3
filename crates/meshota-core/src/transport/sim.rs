//! Simulated OTA peripheral.
//!
//! Speaks the command protocol over an in-memory [`GattLink`], checks the
//! announced size and the checksum on verify, and can inject the faults real
//! peripherals exhibit. Backs the CLI `simulate` command and the integration
//! tests.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use super::mesh::{TunnelCipher, TunnelDirection, TunnelKey};
use super::traits::{GattLink, LinkNotice, TransportError};
use crate::protocol::{
    AppInfo, Characteristic, Command, CommandParams, CommandStatus, DEFAULT_MTU, Opcode,
    ProtocolVariant, crc32,
};

/// Behaviour of a simulated peripheral.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// OTA service exposed, `None` for a device without one.
    pub variant: Option<ProtocolVariant>,
    pub mtu: usize,
    pub app_info: Option<AppInfo>,
    /// Drop the link instead of answering a successful verify.
    pub legacy_verify_disconnect: bool,
    /// Answer this opcode with this status.
    pub reject: Option<(Opcode, CommandStatus)>,
    /// Fail the data write with this zero-based chunk index.
    pub fail_data_write_at: Option<usize>,
    /// Deliver statuses as control point indications instead of inline.
    pub respond_via_indication: bool,
    pub refuse_connection: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            variant: Some(ProtocolVariant::Current),
            mtu: DEFAULT_MTU,
            app_info: None,
            legacy_verify_disconnect: false,
            reject: None,
            fail_data_write_at: None,
            respond_via_indication: false,
            refuse_connection: false,
        }
    }
}

/// What the peripheral saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimLog {
    pub connected: bool,
    pub connects: usize,
    pub disconnects: usize,
    pub notifications_enabled: bool,
    pub commands: Vec<Command>,
    /// Length of each data write, in order.
    pub data_writes: Vec<usize>,
    pub received: Vec<u8>,
    pub announced_size: Option<u32>,
    pub verified_crc: Option<u32>,
    pub aborted: bool,
}

impl SimLog {
    pub fn opcodes(&self) -> Vec<Opcode> {
        self.commands.iter().map(Command::opcode).collect()
    }
}

/// Shared view of a [`SimPeripheral`]'s log, usable after the link moved
/// into an adapter.
#[derive(Debug, Clone, Default)]
pub struct SimLogHandle(Arc<Mutex<SimLog>>);

impl SimLogHandle {
    fn lock(&self) -> MutexGuard<'_, SimLog> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> SimLog {
        self.lock().clone()
    }
}

pub struct SimPeripheral {
    config: SimConfig,
    log: SimLogHandle,
    notices: Vec<LinkNotice>,
}

impl SimPeripheral {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            log: SimLogHandle::default(),
            notices: Vec::new(),
        }
    }

    pub fn log(&self) -> SimLogHandle {
        self.log.clone()
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.log.lock().connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn ensure_characteristic(&self, characteristic: Characteristic) -> Result<(), TransportError> {
        match self.config.variant {
            Some(variant) if variant.has_characteristic(characteristic) => Ok(()),
            _ => Err(TransportError::CharacteristicNotFound(characteristic)),
        }
    }

    /// Execute a command, `None` when the peripheral stays silent.
    fn execute(&mut self, data: &[u8]) -> Option<CommandStatus> {
        let command = match Command::decode(data) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Simulator received malformed command");
                return Some(CommandStatus::InvalidParameter);
            }
        };
        debug!(command = %command, "Simulator command");

        let mut log = self.log.lock();
        log.commands.push(command.clone());

        if let Some((opcode, status)) = self.config.reject
            && opcode == command.opcode()
        {
            return Some(status);
        }

        match (command.opcode(), command.params()) {
            (Opcode::PrepareDownload, _) => {
                log.received.clear();
                log.announced_size = None;
                log.verified_crc = None;
                Some(CommandStatus::Success)
            }
            (Opcode::StartDownload, CommandParams::Long(size)) => {
                log.announced_size = Some(*size);
                Some(CommandStatus::Success)
            }
            (Opcode::Verify, CommandParams::Long(expected)) => {
                let Some(size) = log.announced_size else {
                    return Some(CommandStatus::InvalidState);
                };
                if log.received.len() != size as usize {
                    return Some(CommandStatus::InvalidImageSize);
                }
                let actual = crc32(&log.received);
                if actual != *expected {
                    debug!(
                        expected = %format!("0x{:08X}", expected),
                        actual = %format!("0x{:08X}", actual),
                        "Simulator checksum mismatch"
                    );
                    return Some(CommandStatus::InvalidCrc);
                }
                log.verified_crc = Some(actual);
                if self.config.legacy_verify_disconnect {
                    debug!("Simulator rebooting without verify response");
                    log.connected = false;
                    log.disconnects += 1;
                    self.notices.push(LinkNotice::Disconnected);
                    return None;
                }
                Some(CommandStatus::Success)
            }
            (Opcode::Abort, _) => {
                log.aborted = true;
                Some(CommandStatus::Success)
            }
            (Opcode::StartDownload | Opcode::Verify, _) => Some(CommandStatus::InvalidParameter),
            _ => Some(CommandStatus::Success),
        }
    }
}

impl GattLink for SimPeripheral {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.config.refuse_connection {
            return Err(TransportError::ConnectFailed("peer refused".into()));
        }
        let mut log = self.log.lock();
        log.connected = true;
        log.connects += 1;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut log = self.log.lock();
        if log.connected {
            log.connected = false;
            log.disconnects += 1;
        }
        log.notifications_enabled = false;
        Ok(())
    }

    fn discover(&mut self) -> Result<Option<ProtocolVariant>, TransportError> {
        self.ensure_connected()?;
        Ok(self.config.variant)
    }

    fn set_notify(
        &mut self,
        characteristic: Characteristic,
        enabled: bool,
    ) -> Result<bool, TransportError> {
        self.ensure_connected()?;
        self.ensure_characteristic(characteristic)?;
        self.log.lock().notifications_enabled = enabled;
        Ok(enabled)
    }

    fn write(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<Option<Vec<u8>>, TransportError> {
        self.ensure_connected()?;
        self.ensure_characteristic(characteristic)?;

        match characteristic {
            Characteristic::ControlPoint => {
                let Some(status) = self.execute(data) else {
                    return Ok(None);
                };
                let response = vec![status.as_byte()];
                if !self.config.respond_via_indication {
                    return Ok(Some(response));
                }
                if self.log.lock().notifications_enabled {
                    self.notices.push(LinkNotice::Indication {
                        characteristic,
                        value: response,
                    });
                }
                Ok(None)
            }
            Characteristic::Data => {
                let mut log = self.log.lock();
                if log.announced_size.is_none() {
                    return Err(TransportError::WriteFailed("download not started".into()));
                }
                let index = log.data_writes.len();
                if self.config.fail_data_write_at == Some(index) {
                    return Err(TransportError::WriteFailed(format!(
                        "chunk {} rejected",
                        index
                    )));
                }
                log.data_writes.push(data.len());
                log.received.extend_from_slice(data);
                trace!(index, len = data.len(), total = log.received.len(), "Simulator data");
                Ok(None)
            }
            Characteristic::AppInfo => Err(TransportError::WriteFailed(
                "app info is read-only".into(),
            )),
        }
    }

    fn read(&mut self, characteristic: Characteristic) -> Result<Vec<u8>, TransportError> {
        self.ensure_connected()?;
        self.ensure_characteristic(characteristic)?;
        match (characteristic, self.config.app_info) {
            (Characteristic::AppInfo, Some(info)) => Ok(info.to_bytes().to_vec()),
            _ => Err(TransportError::ReadFailed(format!(
                "{} not readable",
                characteristic
            ))),
        }
    }

    fn mtu(&self) -> usize {
        self.config.mtu
    }

    fn poll_notices(&mut self) -> Vec<LinkNotice> {
        std::mem::take(&mut self.notices)
    }
}

/// Node end of a mesh tunnel: opens what the host sealed, and seals every
/// response, read value and indication on the way back.
pub struct SealedLink<L: GattLink> {
    inner: L,
    cipher: TunnelCipher,
}

impl<L: GattLink> SealedLink<L> {
    pub fn new(inner: L, key: &TunnelKey) -> Self {
        Self {
            inner,
            cipher: TunnelCipher::new(key, TunnelDirection::FromNode),
        }
    }
}

impl<L: GattLink> GattLink for SealedLink<L> {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.inner.connect()
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.inner.disconnect()
    }

    fn discover(&mut self) -> Result<Option<ProtocolVariant>, TransportError> {
        self.inner.discover()
    }

    fn set_notify(
        &mut self,
        characteristic: Characteristic,
        enabled: bool,
    ) -> Result<bool, TransportError> {
        self.inner.set_notify(characteristic, enabled)
    }

    fn write(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let plain = self.cipher.open(data)?;
        self.inner
            .write(characteristic, &plain)?
            .map(|response| self.cipher.seal(&response))
            .transpose()
    }

    fn read(&mut self, characteristic: Characteristic) -> Result<Vec<u8>, TransportError> {
        let value = self.inner.read(characteristic)?;
        self.cipher.seal(&value)
    }

    fn mtu(&self) -> usize {
        self.inner.mtu()
    }

    fn poll_notices(&mut self) -> Vec<LinkNotice> {
        self.inner
            .poll_notices()
            .into_iter()
            .filter_map(|notice| match notice {
                LinkNotice::Indication {
                    characteristic,
                    value,
                } => match self.cipher.seal(&value) {
                    Ok(value) => Some(LinkNotice::Indication {
                        characteristic,
                        value,
                    }),
                    Err(e) => {
                        warn!(error = %e, "Dropping indication");
                        None
                    }
                },
                other => Some(other),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(config: SimConfig) -> SimPeripheral {
        let mut sim = SimPeripheral::new(config);
        sim.connect().unwrap();
        sim.set_notify(Characteristic::ControlPoint, true).unwrap();
        sim
    }

    fn send(sim: &mut SimPeripheral, command: Command) -> Option<Vec<u8>> {
        sim.write(Characteristic::ControlPoint, &command.encode()).unwrap()
    }

    #[test]
    fn test_full_exchange() {
        let mut sim = started(SimConfig::default());
        let image = b"firmware image bytes";

        assert_eq!(send(&mut sim, Command::prepare_download()), Some(vec![0]));
        assert_eq!(
            send(&mut sim, Command::start_download(image.len() as u32)),
            Some(vec![0])
        );
        for chunk in image.chunks(8) {
            assert_eq!(sim.write(Characteristic::Data, chunk).unwrap(), None);
        }
        assert_eq!(send(&mut sim, Command::verify(crc32(image))), Some(vec![0]));

        let log = sim.log().snapshot();
        assert_eq!(log.received, image.to_vec());
        assert_eq!(log.data_writes, vec![8, 8, 4]);
        assert_eq!(log.verified_crc, Some(crc32(image)));
    }

    #[test]
    fn test_bad_checksum() {
        let mut sim = started(SimConfig::default());
        send(&mut sim, Command::prepare_download());
        send(&mut sim, Command::start_download(4));
        sim.write(Characteristic::Data, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            send(&mut sim, Command::verify(0xDEAD_BEEF)),
            Some(vec![CommandStatus::InvalidCrc.as_byte()])
        );
    }

    #[test]
    fn test_verify_disconnect_quirk() {
        let mut sim = started(SimConfig {
            legacy_verify_disconnect: true,
            ..Default::default()
        });
        send(&mut sim, Command::prepare_download());
        send(&mut sim, Command::start_download(2));
        sim.write(Characteristic::Data, &[9, 9]).unwrap();

        assert_eq!(send(&mut sim, Command::verify(crc32(&[9, 9]))), None);
        assert_eq!(sim.poll_notices(), vec![LinkNotice::Disconnected]);
        assert!(!sim.log().snapshot().connected);
    }

    #[test]
    fn test_indication_delivery() {
        let mut sim = started(SimConfig {
            respond_via_indication: true,
            ..Default::default()
        });
        assert_eq!(send(&mut sim, Command::prepare_download()), None);
        assert_eq!(
            sim.poll_notices(),
            vec![LinkNotice::Indication {
                characteristic: Characteristic::ControlPoint,
                value: vec![0],
            }]
        );
        assert!(sim.poll_notices().is_empty());
    }

    #[test]
    fn test_legacy_has_no_app_info() {
        let mut sim = started(SimConfig {
            variant: Some(ProtocolVariant::Legacy),
            app_info: Some(AppInfo {
                vendor_id: 1,
                product_id: 2,
                version: 3,
            }),
            ..Default::default()
        });
        assert!(matches!(
            sim.read(Characteristic::AppInfo),
            Err(TransportError::CharacteristicNotFound(Characteristic::AppInfo))
        ));
    }

    #[test]
    fn test_sealed_link_round_trip() {
        let key = [7u8; 32];
        let host = TunnelCipher::new(&key, TunnelDirection::ToNode);
        let mut node = SealedLink::new(SimPeripheral::new(SimConfig::default()), &key);
        node.connect().unwrap();

        let sealed = host.seal(&Command::prepare_download().encode()).unwrap();
        let response = node
            .write(Characteristic::ControlPoint, &sealed)
            .unwrap()
            .unwrap();
        assert_eq!(host.open(&response).unwrap(), vec![0]);

        assert!(matches!(
            node.write(Characteristic::ControlPoint, &[1]),
            Err(TransportError::Crypto(_))
        ));
    }
}

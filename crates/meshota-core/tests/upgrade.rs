//! End-to-end upgrades through the session manager against the simulated
//! peripheral.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use meshota_core::protocol::{CommandParams, crc32};
use meshota_core::transport::{LinkNotice, SimLogHandle, TUNNEL_OVERHEAD};
use meshota_core::{
    AppInfo, Characteristic, CollectingObserver, Collaborators, CommandStatus, ComponentMetadata,
    DfuMetadata, DfuSignal, DirectAdapter, FirmwareImage, GattLink, MeshTunnelAdapter,
    MockAdapter, Opcode, OtaConfig, OtaErrorKind, OtaEvent, OtaState, ProtocolVariant,
    RecordingOrchestrator, SealedLink, SessionManager, SessionMode, SimConfig, SimPeripheral,
    SingleDeviceSelector, StaticMeshCore, TargetDevice, TimeoutConfig, TransportAdapter,
    TransportError, UpgradeRequest,
};

const TUNNEL_KEY: [u8; 32] = [0x42; 32];

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

fn direct(config: SimConfig) -> (Box<dyn TransportAdapter>, SimLogHandle) {
    let sim = SimPeripheral::new(config);
    let log = sim.log();
    (Box::new(DirectAdapter::new("sim-direct", sim)), log)
}

fn tunneled(config: SimConfig, address: u16) -> (Box<dyn TransportAdapter>, SimLogHandle) {
    let sim = SimPeripheral::new(config);
    let log = sim.log();
    let node = SealedLink::new(sim, &TUNNEL_KEY);
    let adapter = MeshTunnelAdapter::new("sim-mesh", address, &TUNNEL_KEY, node);
    (Box::new(adapter), log)
}

/// The final disconnect runs on the link worker after completion.
fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

struct Run {
    result: Result<(), meshota_core::OtaError>,
    observer: Arc<CollectingObserver>,
}

fn run(
    adapter: Box<dyn TransportAdapter>,
    data: Vec<u8>,
    mode: SessionMode,
    config: OtaConfig,
    collaborators: Collaborators,
) -> Run {
    let observer = Arc::new(CollectingObserver::new());
    let mut manager = SessionManager::new(
        config,
        Collaborators {
            observer: observer.clone(),
            ..collaborators
        },
    );
    let mut selector = SingleDeviceSelector::new(TargetDevice::new(adapter));
    let request = UpgradeRequest {
        image: Some(FirmwareImage::from_bytes(data).unwrap()),
        mode,
    };
    let handle = manager.start(&mut selector, request).unwrap();
    let result = handle.wait();
    assert!(!manager.is_busy());
    Run { result, observer }
}

fn run_direct(config: SimConfig, data: Vec<u8>) -> (Run, SimLogHandle) {
    let (adapter, log) = direct(config);
    let run = run(
        adapter,
        data,
        SessionMode::Direct,
        OtaConfig::default(),
        Collaborators::default(),
    );
    (run, log)
}

#[test]
fn test_direct_upgrade_two_chunks() {
    let data = image(310);
    // MTU 158 minus the 3 byte write header gives 155 byte chunks.
    let (run, sim) = run_direct(
        SimConfig {
            mtu: 158,
            ..Default::default()
        },
        data.clone(),
    );
    run.result.unwrap();

    let log = sim.snapshot();
    assert_eq!(log.data_writes, vec![155, 155]);
    assert_eq!(log.received, data);
    assert_eq!(log.verified_crc, Some(crc32(&data)));
    assert_eq!(
        log.opcodes(),
        vec![Opcode::PrepareDownload, Opcode::StartDownload, Opcode::Verify]
    );
    assert!(eventually(|| !sim.snapshot().connected));

    let completions = run.observer.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].state, OtaState::Complete);
    assert_eq!(completions[0].error_code, 0);
    assert_eq!(completions[0].transferred_size, 310);

    let chunk_progress: Vec<usize> = run
        .observer
        .progress()
        .iter()
        .filter(|p| p.state == OtaState::DataTransfer)
        .map(|p| p.transferred_size)
        .collect();
    assert_eq!(chunk_progress, vec![0, 155, 310]);
}

#[test]
fn test_status_by_indication() {
    let data = image(1000);
    let (run, log) = run_direct(
        SimConfig {
            mtu: 247,
            respond_via_indication: true,
            app_info: Some(AppInfo {
                vendor_id: 0x0211,
                product_id: 0x0007,
                version: 0x0102_0003,
            }),
            ..Default::default()
        },
        data.clone(),
    );
    run.result.unwrap();
    assert_eq!(log.snapshot().received, data);
}

#[test]
fn test_legacy_peer_reboots_instead_of_answering_verify() {
    let data = image(500);
    let (run, log) = run_direct(
        SimConfig {
            variant: Some(ProtocolVariant::Legacy),
            legacy_verify_disconnect: true,
            ..Default::default()
        },
        data.clone(),
    );

    // Intentional: a disconnect right after an acknowledged verify write is
    // the legacy success signal.
    run.result.unwrap();
    let log = log.snapshot();
    assert_eq!(log.verified_crc, Some(crc32(&data)));
    assert_eq!(log.disconnects, 1);
}

#[test]
fn test_device_without_ota_service() {
    let (run, log) = run_direct(
        SimConfig {
            variant: None,
            ..Default::default()
        },
        image(64),
    );
    let error = run.result.unwrap_err();
    assert_eq!(error.kind, OtaErrorKind::UpgradeNotSupported);
    assert_eq!(error.state, OtaState::ServiceDiscover);
    assert!(log.snapshot().commands.is_empty());
}

#[test]
fn test_refused_connection() {
    let (run, _log) = run_direct(
        SimConfig {
            refuse_connection: true,
            ..Default::default()
        },
        image(64),
    );
    let error = run.result.unwrap_err();
    assert!(matches!(error.kind, OtaErrorKind::ConnectFailed(_)));
    assert_eq!(run.observer.completions().len(), 1);
}

#[test]
fn test_verify_rejected_sends_abort() {
    let (run, log) = run_direct(
        SimConfig {
            reject: Some((Opcode::Verify, CommandStatus::InvalidCrc)),
            ..Default::default()
        },
        image(100),
    );
    let error = run.result.unwrap_err();
    assert_eq!(
        error.kind,
        OtaErrorKind::VerificationFailed {
            status: CommandStatus::InvalidCrc
        }
    );
    let log = log.snapshot();
    assert_eq!(log.opcodes().last(), Some(&Opcode::Abort));
    assert!(log.aborted);
}

#[test]
fn test_prepare_rejected_skips_abort() {
    let (run, log) = run_direct(
        SimConfig {
            reject: Some((Opcode::PrepareDownload, CommandStatus::Busy)),
            ..Default::default()
        },
        image(100),
    );
    assert_eq!(
        run.result.unwrap_err().kind,
        OtaErrorKind::CommandRejected {
            command: Opcode::PrepareDownload,
            status: CommandStatus::Busy,
        }
    );
    assert_eq!(log.snapshot().opcodes(), vec![Opcode::PrepareDownload]);
}

#[test]
fn test_data_write_failure() {
    let (run, log) = run_direct(
        SimConfig {
            mtu: 53,
            fail_data_write_at: Some(2),
            ..Default::default()
        },
        image(400),
    );
    let error = run.result.unwrap_err();
    assert_eq!(error.state, OtaState::DataTransfer);
    match error.kind {
        OtaErrorKind::TransferFailed {
            image_size, offset, ..
        } => {
            assert_eq!(image_size, 400);
            assert_eq!(offset, 100);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(log.snapshot().aborted);
}

#[test]
fn test_mesh_tunnel_upgrade() {
    let data = image(700);
    let (adapter, log) = tunneled(
        SimConfig {
            variant: Some(ProtocolVariant::Legacy),
            mtu: 185,
            ..Default::default()
        },
        0x0012,
    );
    let mesh_core = Arc::new(StaticMeshCore::new(Some(ComponentMetadata {
        company_id: 0x0211,
        product_id: 0x0001,
        version_id: 0x0005,
    })));

    let run = run(
        adapter,
        data.clone(),
        SessionMode::Direct,
        OtaConfig::default(),
        Collaborators {
            mesh_core: Some(mesh_core.clone()),
            ..Default::default()
        },
    );
    run.result.unwrap();

    assert_eq!(mesh_core.requests(), vec![0x0012]);
    let log = log.snapshot();
    assert_eq!(log.received, data);
    let chunk = 185 - 3 - TUNNEL_OVERHEAD;
    assert!(log.data_writes.iter().all(|len| *len <= chunk));
    assert_eq!(log.data_writes.len(), data.len().div_ceil(chunk));
}

#[test]
fn test_dfu_upload() {
    let data = image(300);
    let metadata = DfuMetadata {
        company_id: 0x0059,
        firmware_id: vec![0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7],
        ..Default::default()
    };
    let orchestrator = Arc::new(RecordingOrchestrator::new());
    let (adapter, log) = direct(SimConfig {
        mtu: 103,
        ..Default::default()
    });

    let run = run(
        adapter,
        data,
        SessionMode::DfuUpload(metadata.clone()),
        OtaConfig::default(),
        Collaborators {
            dfu: Some(orchestrator.clone()),
            ..Default::default()
        },
    );
    run.result.unwrap();

    let log = log.snapshot();
    assert_eq!(
        log.commands[0].params(),
        &CommandParams::Firmware {
            company_id: 0x0059,
            firmware_id: metadata.firmware_id.clone(),
        }
    );
    assert_eq!(
        orchestrator.signals(),
        vec![DfuSignal::UploadFinished {
            company_id: 0x0059,
            error_code: None,
        }]
    );

    // Transfer entry only; the final size arrives with completion.
    let transfer_progress = run
        .observer
        .events()
        .iter()
        .filter(|e| matches!(e, OtaEvent::Progress(p) if p.state == OtaState::DataTransfer))
        .count();
    assert_eq!(transfer_progress, 1);
}

#[test]
fn test_dfu_failure_stops_distribution() {
    let orchestrator = Arc::new(RecordingOrchestrator::new());
    let (adapter, _log) = direct(SimConfig {
        reject: Some((Opcode::StartDownload, CommandStatus::OutOfResources)),
        ..Default::default()
    });
    let run = run(
        adapter,
        image(50),
        SessionMode::DfuUpload(DfuMetadata::default()),
        OtaConfig::default(),
        Collaborators {
            dfu: Some(orchestrator.clone()),
            ..Default::default()
        },
    );
    let error = run.result.unwrap_err();
    assert_eq!(
        orchestrator.signals(),
        vec![
            DfuSignal::UploadFinished {
                company_id: 0,
                error_code: Some(error.code()),
            },
            DfuSignal::StopDistribution,
        ]
    );
}

#[test]
fn test_second_start_is_busy() {
    let config = OtaConfig {
        timeouts: TimeoutConfig {
            base_ms: 200,
            extended_ms: 200,
            connect_ms: 200,
        },
        ..Default::default()
    };
    let mut manager = SessionManager::new(config, Collaborators::default());

    // The mock never answers, so the first session waits in CONNECT.
    let mock = MockAdapter::new();
    let calls = mock.handle();
    let mut first = SingleDeviceSelector::new(TargetDevice::new(Box::new(mock)));
    let request = UpgradeRequest {
        image: Some(FirmwareImage::from_bytes(image(10)).unwrap()),
        mode: SessionMode::Direct,
    };
    let handle = manager.start(&mut first, request.clone()).unwrap();

    let (adapter, log) = direct(SimConfig::default());
    let mut second = SingleDeviceSelector::new(TargetDevice::new(adapter));
    let busy = manager.start(&mut second, request.clone()).err().unwrap();
    assert_eq!(busy.kind, OtaErrorKind::Busy);
    assert!(log.snapshot().commands.is_empty());

    // First session carries on untouched and times out on its own.
    let error = handle.wait().unwrap_err();
    assert_eq!(error.kind, OtaErrorKind::ConnectionTimeout);
    assert_eq!(calls.releases(), 1);

    // Free again.
    let handle = manager.start(&mut second, request).unwrap();
    handle.wait().unwrap();
    assert!(log.snapshot().verified_crc.is_some());
}

#[test]
fn test_abort_while_connecting() {
    let config = OtaConfig {
        timeouts: TimeoutConfig {
            base_ms: 300,
            extended_ms: 300,
            connect_ms: 300,
        },
        ..Default::default()
    };
    let mut manager = SessionManager::new(config, Collaborators::default());
    let mock = MockAdapter::new();
    let calls = mock.handle();
    let mut selector = SingleDeviceSelector::new(TargetDevice::new(Box::new(mock)));
    let handle = manager
        .start(
            &mut selector,
            UpgradeRequest {
                image: Some(FirmwareImage::from_bytes(image(10)).unwrap()),
                mode: SessionMode::Direct,
            },
        )
        .unwrap();

    // Still connecting: abort closes the link instead of sending ABORT.
    assert!(handle.cancel());
    let error = handle.wait().unwrap_err();
    assert_eq!(error.kind, OtaErrorKind::Aborted);
    assert!(calls.commands().is_empty());
}

/// Link whose connect hangs until released.
struct StalledLink {
    release: mpsc::Receiver<()>,
}

impl GattLink for StalledLink {
    fn connect(&mut self) -> Result<(), TransportError> {
        let _ = self.release.recv_timeout(Duration::from_secs(10));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn discover(&mut self) -> Result<Option<ProtocolVariant>, TransportError> {
        Ok(None)
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
fn test_timeout_completes_while_link_is_stuck() {
    let (release, stalled) = mpsc::channel();
    let adapter = DirectAdapter::new("stalled", StalledLink { release: stalled });
    let config = OtaConfig {
        timeouts: TimeoutConfig {
            connect_ms: 100,
            ..Default::default()
        },
        ..Default::default()
    };

    let started = Instant::now();
    let run = run(
        Box::new(adapter),
        image(10),
        SessionMode::Direct,
        config,
        Collaborators::default(),
    );
    let elapsed = started.elapsed();

    assert_eq!(run.result.unwrap_err().kind, OtaErrorKind::ConnectionTimeout);
    assert_eq!(run.observer.completions().len(), 1);
    assert!(elapsed < Duration::from_secs(2), "completion took {elapsed:?}");
    drop(release);
}

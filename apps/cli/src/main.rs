use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use meshota_core::transport::TunnelKey;
use meshota_core::{
    AppInfo, Collaborators, ComponentMetadata, DfuMetadata, DirectAdapter, FirmwareImage,
    MeshTunnelAdapter, OtaConfig, OtaEvent, OtaObserver, OtaState, ProtocolVariant,
    RecordingOrchestrator, SealedLink, SessionManager, SessionMode, SimConfig, SimPeripheral,
    SingleDeviceSelector, StaticMeshCore, TargetDevice, TracingObserver, TransportAdapter,
    UpgradeRequest,
};
use tracing::{error, info};

const SIM_VENDOR_ID: u16 = 0x0211;
const SIM_PRODUCT_ID: u16 = 0x0001;

#[derive(Parser, Debug)]
#[command(author, version, about = "Mesh OTA firmware upgrade tool", long_about = None)]
struct Args {
    /// Session configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upgrade a simulated peripheral
    Simulate {
        /// Firmware image
        image: PathBuf,

        /// Reach the peripheral through a mesh tunnel at this unicast address
        #[arg(long, value_parser = parse_address)]
        mesh: Option<u16>,

        /// Tunnel key, 64 hex digits
        #[arg(long, default_value = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f")]
        tunnel_key: String,

        /// Expose the legacy OTA service
        #[arg(long)]
        legacy: bool,

        /// Reboot instead of answering verify
        #[arg(long)]
        reboot_on_verify: bool,

        /// Answer commands with indications
        #[arg(long)]
        indicate: bool,

        /// Negotiated MTU
        #[arg(long, default_value_t = 247)]
        mtu: usize,

        /// Upload for mesh DFU using the [dfu] config section
        #[arg(long)]
        dfu: bool,
    },
    /// Print the image checksum
    Crc {
        image: PathBuf,
    },
    /// Show how an image would be transferred
    Inspect {
        image: PathBuf,

        #[arg(long, default_value_t = 247)]
        mtu: usize,
    },
    /// Write the default configuration
    InitConfig {
        path: PathBuf,
    },
}

/// Logs state transitions and completion.
struct ConsoleObserver;

impl OtaObserver for ConsoleObserver {
    fn on_event(&self, event: &OtaEvent) {
        match event {
            OtaEvent::Progress(progress) if progress.state == OtaState::DataTransfer => {
                info!("{:>3}% {}", progress.percent(), progress);
            }
            OtaEvent::Progress(progress) => info!("{}", progress.state),
            other => TracingObserver.on_event(other),
        }
    }
}

fn parse_address(value: &str) -> Result<u16, String> {
    let digits = value.trim_start_matches("0x");
    u16::from_str_radix(digits, 16).map_err(|e| e.to_string())
}

fn parse_key(value: &str) -> Result<TunnelKey> {
    let bytes = hex::decode(value).context("tunnel key is not hex")?;
    let Ok(key) = TunnelKey::try_from(bytes.as_slice()) else {
        bail!("tunnel key must be 32 bytes, got {}", bytes.len());
    };
    Ok(key)
}

fn load_config(path: Option<&Path>) -> Result<OtaConfig> {
    match path {
        Some(path) => OtaConfig::load_from_file(path),
        None => Ok(OtaConfig::default()),
    }
}

fn load_image(path: &Path) -> Result<FirmwareImage> {
    FirmwareImage::load(path).with_context(|| format!("failed to load {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Simulate {
            image,
            mesh,
            tunnel_key,
            legacy,
            reboot_on_verify,
            indicate,
            mtu,
            dfu,
        } => {
            let image = load_image(&image)?;
            let sim = SimPeripheral::new(SimConfig {
                variant: Some(if legacy {
                    ProtocolVariant::Legacy
                } else {
                    ProtocolVariant::Current
                }),
                mtu,
                app_info: Some(AppInfo {
                    vendor_id: SIM_VENDOR_ID,
                    product_id: SIM_PRODUCT_ID,
                    version: 0x0001_0000,
                }),
                legacy_verify_disconnect: reboot_on_verify,
                respond_via_indication: indicate,
                ..Default::default()
            });
            let log = sim.log();

            let adapter: Box<dyn TransportAdapter> = match mesh {
                Some(address) => {
                    let key = parse_key(&tunnel_key)?;
                    Box::new(MeshTunnelAdapter::new(
                        "sim-node",
                        address,
                        &key,
                        SealedLink::new(sim, &key),
                    ))
                }
                None => Box::new(DirectAdapter::new("sim-peripheral", sim)),
            };

            let mode = if dfu {
                let metadata = match &config.dfu {
                    Some(section) => section.to_metadata()?,
                    None => DfuMetadata::default(),
                };
                SessionMode::DfuUpload(metadata)
            } else {
                SessionMode::Direct
            };

            let orchestrator = Arc::new(RecordingOrchestrator::new());
            let collaborators = Collaborators {
                observer: Arc::new(ConsoleObserver),
                mesh_core: Some(Arc::new(StaticMeshCore::new(Some(ComponentMetadata {
                    company_id: SIM_VENDOR_ID,
                    product_id: SIM_PRODUCT_ID,
                    version_id: 1,
                })))),
                dfu: Some(orchestrator.clone()),
            };

            let mut manager = SessionManager::new(config, collaborators);
            let mut selector = SingleDeviceSelector::new(TargetDevice::new(adapter));
            let handle = manager.start(
                &mut selector,
                UpgradeRequest {
                    image: Some(image),
                    mode,
                },
            )?;

            let result = handle.wait();
            for signal in orchestrator.signals() {
                info!(?signal, "DFU orchestrator");
            }
            let log = log.snapshot();
            info!(
                commands = ?log.opcodes(),
                chunks = log.data_writes.len(),
                bytes = log.received.len(),
                "Peripheral summary"
            );
            if let Err(e) = result {
                error!(code = %format!("0x{:04X}", e.code()), "Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Crc { image } => {
            let image = load_image(&image)?;
            println!("0x{:08X}", image.crc32());
        }
        Commands::Inspect { image, mtu } => {
            let image = load_image(&image)?;
            let chunk = config.chunk_size_for(mtu, 0);
            if chunk == 0 {
                bail!("MTU {} leaves no room for data", mtu);
            }
            println!("size:   {} bytes", image.len());
            println!("crc32:  0x{:08X}", image.crc32());
            println!("chunk:  {} bytes", chunk);
            println!("chunks: {}", image.len().div_ceil(chunk));
        }
        Commands::InitConfig { path } => {
            OtaConfig::default().save_to_file(&path)?;
            info!(path = %path.display(), "Wrote default configuration");
        }
    }

    Ok(())
}

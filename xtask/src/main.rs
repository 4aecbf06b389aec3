use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the test suite
    Test,
    /// Upgrade a simulated peripheral with a generated image
    Simulate {
        /// Image size in bytes
        #[arg(long, default_value_t = 64 * 1024)]
        size: usize,
        /// Go through a mesh tunnel
        #[arg(long)]
        mesh: bool,
    },
}

fn cargo(args: &[&str]) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {} failed", args.join(" "));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            cargo(&["build", "--workspace"])?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"])?;
        }
        Commands::Simulate { size, mesh } => {
            let image: Vec<u8> = (0..*size).map(|i| (i % 251) as u8).collect();
            let path: PathBuf = std::env::temp_dir().join("meshota-sim.bin");
            std::fs::write(&path, image)?;
            println!("Simulating upgrade with {} bytes...", size);

            let path = path.to_string_lossy();
            let mut args = vec!["run", "-p", "meshota-cli", "--", "simulate", path.as_ref()];
            if *mesh {
                args.extend(["--mesh", "0x0012"]);
            }
            cargo(&args)?;
        }
    }

    Ok(())
}

//! `sedgetctl`: seal, inspect and load secure video codec firmware.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand_core::{OsRng, RngCore};
use sedget_spec::{SecureDescriptor, FIRMWARE_KEY_LEN, SECURE_DESCRIPTOR_LEN};
use sedget_ta::platform::sim::SimPlatform;
use sedget_ta::{FirmwareKey, ServiceConfig};
use sedget_video::image::pad_to_block;
use sedget_video::{inspect, FirmwareCatalog, FirmwareLoader, LoaderConfig, LoopbackTransport};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Sedgetctl command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Firmware key; the provisioned reference key when absent.
    #[arg(
        long,
        env = "SEDGET_FW_KEY",
        value_name = "HEX",
        help = "32 hex digits (AES-128)"
    )]
    key: Option<String>,
    /// Role catalog replacing the built-in table.
    #[arg(
        long,
        env = "SEDGET_CATALOG",
        value_name = "FILE",
        help = "Path to a JSON list of {role, filename} entries"
    )]
    catalog: Option<PathBuf>,
    /// Subcommand.
    #[command(subcommand)]
    command: Commands,
}

/// Commands for sedgetctl.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a fresh random firmware key.
    Keygen,
    /// Sign and encrypt a plaintext image.
    Seal {
        /// Plaintext image (header followed by the body).
        #[arg(short, long)]
        input: PathBuf,
        /// Where to write the sealed image.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Authenticate a sealed image and describe its layout.
    Inspect {
        /// Sealed image.
        #[arg(short, long)]
        input: PathBuf,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Load the firmware for a role through an in-process service.
    Load {
        /// Codec role, e.g. video_decoder.hevc.
        #[arg(short, long)]
        role: String,
        /// Number of codec cores.
        #[arg(short, long, default_value = "1")]
        cores: u32,
        /// Directory holding the firmware files.
        #[arg(long, env = "SEDGET_FW_DIR", default_value = "/lib/firmware")]
        fw_dir: PathBuf,
    },
    /// List the roles the catalog knows.
    Roles,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let key = firmware_key(cli.key.as_deref())?;
    match cli.command {
        Commands::Keygen => keygen(),
        Commands::Seal { input, output } => seal(&key, &input, &output)?,
        Commands::Inspect { input, json } => inspect_image(&key, &input, json)?,
        Commands::Load { role, cores, fw_dir } => {
            let catalog = load_catalog(cli.catalog.as_deref())?;
            load(key, catalog, fw_dir, &role, cores)?
        }
        Commands::Roles => {
            for entry in load_catalog(cli.catalog.as_deref())?.entries() {
                println!("{} {}", entry.role, entry.filename);
            }
        }
    }
    Ok(())
}

fn firmware_key(hex: Option<&str>) -> anyhow::Result<FirmwareKey> {
    match hex {
        Some(hex) => Ok(FirmwareKey::from_hex(hex.trim())?),
        None => Ok(FirmwareKey::provisioned()),
    }
}

fn load_catalog(path: Option<&Path>) -> anyhow::Result<FirmwareCatalog> {
    let Some(path) = path else {
        return Ok(FirmwareCatalog::reference());
    };
    let data = fs::read(path).with_context(|| format!("reading catalog {}", path.display()))?;
    Ok(FirmwareCatalog::from_json(&data)?)
}

fn keygen() {
    let mut bytes = [0u8; FIRMWARE_KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    println!("{}", hex::encode(bytes));
}

fn seal(key: &FirmwareKey, input: &Path, output: &Path) -> anyhow::Result<()> {
    let mut plaintext =
        fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    pad_to_block(&mut plaintext);
    let sealed = sedget_ta::seal(key, &plaintext)?;
    fs::write(output, &sealed).with_context(|| format!("writing {}", output.display()))?;
    info!(
        input = %input.display(),
        output = %output.display(),
        size = sealed.len(),
        "image sealed"
    );
    Ok(())
}

fn inspect_image(key: &FirmwareKey, input: &Path, json: bool) -> anyhow::Result<()> {
    let sealed = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let report = inspect(key, &sealed)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("protocol={} version={:?} info={:?}", report.protocol, report.version, report.info);
    println!(
        "sealed={} plaintext={} text_length={}",
        report.sealed_len, report.plaintext_len, report.text_length
    );
    println!(
        "bss_start={:#x} bitmap_size={} master_rw={:#x}+{:#x}",
        report.bss_start_address,
        report.bss_bitmap_size,
        report.master_rw_start_address,
        report.master_rw_size
    );
    println!(
        "pages image={} text={} shared={} private_per_core={}",
        report.num_pages, report.num_text_pages, report.num_shared_pages, report.num_bss_pages
    );
    Ok(())
}

fn load(
    key: FirmwareKey,
    catalog: FirmwareCatalog,
    fw_dir: PathBuf,
    role: &str,
    cores: u32,
) -> anyhow::Result<()> {
    let platform = Arc::new(SimPlatform::default());
    let transport = LoopbackTransport::new(Arc::clone(&platform), ServiceConfig::with_key(key));
    let config = LoaderConfig {
        firmware_dir: fw_dir,
        ..LoaderConfig::default()
    };
    let loader = FirmwareLoader::new(catalog, config, platform, transport);

    let mut out = [0u8; SECURE_DESCRIPTOR_LEN];
    let loaded = loader
        .load_protected_firmware(role, cores, &mut out)
        .with_context(|| format!("loading firmware for {role}"))?;
    let desc = SecureDescriptor::from_bytes(&out)
        .ok_or_else(|| anyhow::anyhow!("service returned a malformed descriptor"))?;
    println!(
        "role={} cores={} version={}.{} l2pages={:#010x} firmware_size={}",
        role,
        cores,
        desc.fw_version.major,
        desc.fw_version.minor,
        desc.l2pages,
        loaded.firmware_size
    );
    Ok(())
}

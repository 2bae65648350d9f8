//! EVENODD Scrub - stripe scrubber and fault-injection harness
//!
//! `scrub` builds random stripes, damages them, runs the repair engine and
//! tallies the outcomes. `inspect` runs the engine over a raw stripe image
//! read from disk. `kernels` lists the kernels compiled into this build.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use evenodd_common::sector::{SECTOR_WIRE_BYTES, SECTOR_WORDS};
use evenodd_common::{Config, KernelKind, PositionMask, Sector, StripeGeometry};
use evenodd_raid6::{
    ErrorBoard, EvalRequest, KernelFactory, Raid6Engine, RepairOutcome, Severity, Stripe,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "evenodd-scrub")]
#[command(about = "EVENODD RAID-6 stripe scrubber")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "evenodd.toml")]
    config: PathBuf,

    /// XOR/checksum kernel (portable, wide, auto)
    #[arg(long, env = "EVENODD_KERNEL")]
    kernel: Option<KernelKind>,

    /// Try to pin coherency errors on one data column
    #[arg(long)]
    exact_localization: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate stripes, inject faults and repair them
    Scrub {
        /// Stripe width including both parities
        #[arg(long)]
        width: Option<usize>,
        /// Number of stripes
        #[arg(long)]
        stripes: Option<usize>,
        /// RNG seed
        #[arg(long)]
        seed: Option<u64>,
        /// Most faults injected into one stripe
        #[arg(long, default_value = "2")]
        max_faults: usize,
    },
    /// Run the engine over a stripe image of `width` wire-format sectors
    Inspect {
        /// Stripe image
        path: PathBuf,
        #[arg(long)]
        width: usize,
        /// Row parity position (default: width - 2)
        #[arg(long)]
        row_parity: Option<usize>,
        /// Diagonal parity position (default: width - 1)
        #[arg(long)]
        diag_parity: Option<usize>,
        #[arg(long, default_value = "0")]
        lba: u64,
        /// Positions to rebuild (at most two)
        #[arg(long, value_delimiter = ',')]
        rebuild: Vec<usize>,
        /// Write the repaired image here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List available kernels
    Kernels,
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(Config::from_toml(&text)?)
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(args.json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.json).then(tracing_subscriber::fmt::layer))
        .init();

    let mut config = load_config(&args.config)?;
    if let Some(kernel) = args.kernel {
        config.engine.kernel = kernel;
    }
    if args.exact_localization {
        config.engine.exact_localization = true;
    }
    config.validate()?;

    match args.command {
        Commands::Kernels => {
            println!("{:<10} {:>9} {:>6}", "KERNEL", "LANE BITS", "FUSED");
            for caps in KernelFactory::available_kernels() {
                println!("{:<10} {:>9} {:>6}", caps.name, caps.lane_bits, caps.fused);
            }
            println!("auto -> {}", KernelFactory::detect_best_kernel());
            Ok(())
        }
        Commands::Scrub {
            width,
            stripes,
            seed,
            max_faults,
        } => {
            if let Some(width) = width {
                config.scrub.width = width;
            }
            if let Some(stripes) = stripes {
                config.scrub.stripes = stripes;
            }
            if let Some(seed) = seed {
                config.scrub.seed = seed;
            }
            config.validate()?;
            let engine = Raid6Engine::new(config.engine.clone())?;
            scrub(&engine, &config, max_faults)
        }
        Commands::Inspect {
            path,
            width,
            row_parity,
            diag_parity,
            lba,
            rebuild,
            output,
        } => {
            let geometry = StripeGeometry::new(
                width,
                row_parity.unwrap_or_else(|| width.saturating_sub(2)),
                diag_parity.unwrap_or_else(|| width.saturating_sub(1)),
            )?;
            let engine = Raid6Engine::new(config.engine.clone())?;
            inspect(&engine, geometry, &path, lba, &rebuild, output.as_deref())
        }
    }
}

/// One injected fault
#[derive(Clone, Copy, Debug)]
enum Fault {
    /// Column lost; the caller knows
    Erase(usize),
    /// Data changed and resealed; nobody knows
    Silent(usize),
    /// Data changed without the checksum
    Checksum(usize),
    /// Partial write that never reached parity
    Torn(usize),
}

fn random_stripe(
    rng: &mut StdRng,
    geometry: StripeGeometry,
    lba: u64,
    offset: u64,
) -> Result<Stripe> {
    let columns = geometry.data_columns();
    let mut stripe = Stripe::new(geometry, lba).with_offset(offset);
    let data: Vec<[u32; SECTOR_WORDS]> = (0..columns)
        .map(|_| {
            let mut words = [0u32; SECTOR_WORDS];
            rng.fill(&mut words[..]);
            words
        })
        .collect();
    stripe.write_full(&data, rng.gen_range(1..0x7000))?;
    Ok(stripe)
}

fn inject(
    rng: &mut StdRng,
    stripe: &mut Stripe,
    count: usize,
) -> Result<(Vec<Fault>, EvalRequest)> {
    let width = stripe.geometry().width();
    let mut faults = Vec::with_capacity(count);
    let mut rebuild = Vec::new();
    let mut no_data = PositionMask::EMPTY;
    let mut touched = PositionMask::EMPTY;

    while faults.len() < count {
        let pos = rng.gen_range(0..width);
        if touched.contains(pos) {
            continue;
        }
        touched.insert(pos);
        let column = stripe.geometry().logical_column(pos);
        let fault = match (rng.gen_range(0..4), column) {
            (1, Some(_)) => Fault::Silent(pos),
            (2, _) => Fault::Checksum(pos),
            (3, Some(column)) => Fault::Torn(column),
            _ => Fault::Erase(pos),
        };
        match fault {
            Fault::Erase(pos) => {
                *stripe.sector_mut(pos) = Sector::zeroed();
                if rebuild.len() < 2 {
                    rebuild.push(pos);
                } else {
                    no_data.insert(pos);
                }
            }
            Fault::Silent(pos) => {
                let sector = stripe.sector_mut(pos);
                sector.data[rng.gen_range(0..SECTOR_WORDS)] ^= rng.gen_range(1..u32::MAX);
                sector.seal();
            }
            Fault::Checksum(pos) => {
                stripe.sector_mut(pos).data[rng.gen_range(0..SECTOR_WORDS)] ^= 1;
            }
            Fault::Torn(column) => {
                let mut words = [0u32; SECTOR_WORDS];
                rng.fill(&mut words[..]);
                stripe.write_partial(column, words)?;
            }
        }
        faults.push(fault);
    }

    let request = match rebuild[..] {
        [] => EvalRequest::new(),
        [pos] => EvalRequest::rebuild(pos),
        [first, second, ..] => EvalRequest::rebuild_pair(first, second),
    };
    Ok((faults, request.with_no_data(no_data)))
}

#[derive(Debug, Default)]
struct Tally {
    verified: usize,
    repaired: usize,
    restored: usize,
    invalidated: usize,
    errors: BTreeMap<String, usize>,
}

fn scrub(engine: &Raid6Engine, config: &Config, max_faults: usize) -> Result<()> {
    let scrub = &config.scrub;
    let geometry = StripeGeometry::new(scrub.width, scrub.width - 2, scrub.width - 1)?;
    let mut rng = StdRng::seed_from_u64(scrub.seed);
    let mut tally = Tally::default();
    info!(
        "scrubbing {} stripes of width {} with {} kernel",
        scrub.stripes,
        scrub.width,
        engine.kernel().capabilities().name
    );

    for index in 0..scrub.stripes {
        let lba = scrub.lba + (index as u64) * (scrub.width as u64 - 2);
        let mut stripe = random_stripe(&mut rng, geometry.clone(), lba, scrub.raid_group_offset)?;
        engine.encode(&mut stripe);
        let original = stripe.clone();

        let count = rng.gen_range(0..=max_faults.min(scrub.width));
        let (faults, request) = inject(&mut rng, &mut stripe, count)?;
        let mut eboard = ErrorBoard::new();
        let outcome = engine.evaluate(&mut stripe, &request, &mut eboard)?;
        debug!("stripe {index} lba {lba:#x}: {faults:?} -> {outcome:?}");

        match outcome {
            RepairOutcome::Verified => tally.verified += 1,
            RepairOutcome::Repaired { .. } => {
                tally.repaired += 1;
                if stripe == original {
                    tally.restored += 1;
                }
            }
            RepairOutcome::NeedsInvalidate { positions, .. } => {
                warn!("stripe {index} lba {lba:#x}: {faults:?} lost {positions}");
                tally.invalidated += 1;
            }
        }
        for entry in &eboard.trace {
            let side = match entry.severity {
                Severity::Correctable => "c",
                Severity::Uncorrectable => "u",
            };
            *tally
                .errors
                .entry(format!("{side}_{}-{}", entry.kind, entry.code))
                .or_default() += 1;
        }
    }

    println!("stripes:      {}", scrub.stripes);
    println!("verified:     {}", tally.verified);
    println!("repaired:     {} ({} bit-exact)", tally.repaired, tally.restored);
    println!("invalidated:  {}", tally.invalidated);
    if !tally.errors.is_empty() {
        println!();
        println!("{:<16} {:>8}", "CONDITION", "COUNT");
        for (condition, count) in &tally.errors {
            println!("{condition:<16} {count:>8}");
        }
    }
    Ok(())
}

fn inspect(
    engine: &Raid6Engine,
    geometry: StripeGeometry,
    path: &Path,
    lba: u64,
    rebuild: &[usize],
    output: Option<&Path>,
) -> Result<()> {
    let image = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let width = geometry.width();
    if image.len() != width * SECTOR_WIRE_BYTES {
        bail!(
            "{}: {} bytes is not {} sectors of {} bytes",
            path.display(),
            image.len(),
            width,
            SECTOR_WIRE_BYTES
        );
    }
    let sectors = image
        .chunks_exact(SECTOR_WIRE_BYTES)
        .map(Sector::from_bytes)
        .collect::<evenodd_common::Result<Vec<_>>>()?;
    let mut stripe = Stripe::from_sectors(geometry, sectors, lba)?;

    let request = match *rebuild {
        [] => EvalRequest::new(),
        [pos] => EvalRequest::rebuild(pos),
        [first, second] => EvalRequest::rebuild_pair(first, second),
        _ => bail!("at most two positions can be rebuilt"),
    };
    let mut eboard = ErrorBoard::new();
    let outcome = engine.evaluate(&mut stripe, &request, &mut eboard)?;

    println!("outcome:  {outcome:?}");
    for entry in &eboard.trace {
        println!("  {entry}");
    }
    println!("invalid:  {}", eboard.invalid_bitmask);
    println!("media:    {}", eboard.media_err);

    if let Some(output) = output {
        let mut bytes = Vec::with_capacity(image.len());
        for sector in stripe.sectors() {
            bytes.extend_from_slice(&sector.to_bytes());
        }
        std::fs::write(output, bytes).with_context(|| format!("writing {}", output.display()))?;
        info!("wrote repaired stripe to {}", output.display());
    }
    Ok(())
}

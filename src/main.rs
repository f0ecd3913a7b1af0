//! znsctl - Zoned Namespace Inspection Tool
//!
//! Builds a namespace the way an emulated controller would and prints what it
//! reports.
//!
//! # Usage
//!
//! ```text
//! znsctl --zoned --size 1G --zone-size 64M geometry
//! znsctl --config ns.yaml --backing-file disk.img report --state closed
//! znsctl --zoned --max-open 2 simulate open:0 write:0:8 close:0 shutdown
//! ```

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use znscore::namespace::{BlockBackend, FileBackend, MemBackend, Namespace, NamespaceFactory};
use znscore::zns::{OpenMode, ZoneId, ZoneState};
use znscore::NamespaceParams;

// =============================================================================
// CLI Arguments
// =============================================================================

/// znsctl - inspect zoned namespace geometry and zone state
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace configuration file (YAML)
    #[arg(long, env = "ZNSCTL_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Backing file or block device; an in-memory backend is used otherwise
    #[arg(long, env = "ZNSCTL_BACKING_FILE")]
    backing_file: Option<std::path::PathBuf>,

    /// Size of the in-memory backend (suffixes K, M, G, T)
    #[arg(long, default_value = "1G", value_parser = parse_size)]
    size: u64,

    /// Cluster size reported by the in-memory backend
    #[arg(long, value_parser = parse_size)]
    cluster_size: Option<u64>,

    /// Namespace id
    #[arg(long)]
    nsid: Option<u32>,

    /// Logical block size in bytes
    #[arg(long, value_parser = parse_size)]
    block_size: Option<u64>,

    /// Metadata bytes per block
    #[arg(long)]
    ms: Option<u16>,

    /// Use the zoned command set
    #[arg(long)]
    zoned: bool,

    /// Zone size (suffixes K, M, G, T)
    #[arg(long, value_parser = parse_size)]
    zone_size: Option<u64>,

    /// Zone capacity (suffixes K, M, G, T)
    #[arg(long, value_parser = parse_size)]
    zone_capacity: Option<u64>,

    /// Maximum active zones (0 = unlimited)
    #[arg(long)]
    max_active: Option<u32>,

    /// Maximum open zones (0 = unlimited)
    #[arg(long)]
    max_open: Option<u32>,

    /// Zone descriptor extension size in bytes
    #[arg(long)]
    descr_ext_size: Option<u32>,

    /// Allow reads across zone boundaries
    #[arg(long)]
    cross_read: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the computed namespace geometry
    Geometry,

    /// Print zone descriptors
    Report {
        /// First zone to report
        #[arg(long, default_value_t = 0)]
        from: ZoneId,

        /// Only report zones in this state
        #[arg(long, value_enum)]
        state: Option<StateFilter>,

        /// Include descriptor extensions (hex)
        #[arg(long)]
        extended: bool,
    },

    /// Print an identify data structure as hex
    Identify {
        #[arg(value_enum, default_value = "ns")]
        page: IdentifyPage,
    },

    /// Apply zone operations, then print the zone states
    ///
    /// Steps: open:Z, open-implicit:Z, close:Z, finish:Z, reset:Z,
    /// write:Z:NLB (at the write pointer), ext:Z, read-only:Z, offline:Z,
    /// shutdown.
    Simulate {
        #[arg(required = true)]
        steps: Vec<Step>,

        /// Stop at the first failing step
        #[arg(long)]
        strict: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StateFilter {
    Empty,
    ImplicitlyOpen,
    ExplicitlyOpen,
    Closed,
    ReadOnly,
    Full,
    Offline,
}

impl From<StateFilter> for ZoneState {
    fn from(filter: StateFilter) -> Self {
        match filter {
            StateFilter::Empty => ZoneState::Empty,
            StateFilter::ImplicitlyOpen => ZoneState::ImplicitlyOpen,
            StateFilter::ExplicitlyOpen => ZoneState::ExplicitlyOpen,
            StateFilter::Closed => ZoneState::Closed,
            StateFilter::ReadOnly => ZoneState::ReadOnly,
            StateFilter::Full => ZoneState::Full,
            StateFilter::Offline => ZoneState::Offline,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum IdentifyPage {
    /// Identify Namespace
    Ns,
    /// Zoned command set specific Identify Namespace
    Zoned,
    /// Namespace identification descriptor list
    Descriptors,
}

// =============================================================================
// Simulation Steps
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Step {
    Open(ZoneId, OpenMode),
    Close(ZoneId),
    Finish(ZoneId),
    Reset(ZoneId),
    Write(ZoneId, u32),
    Extension(ZoneId),
    ReadOnly(ZoneId),
    Offline(ZoneId),
    Shutdown,
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let op = parts.next().unwrap_or_default();
        let mut num = |what: &str| -> Result<u32, String> {
            parts
                .next()
                .ok_or_else(|| format!("{}: missing {}", s, what))?
                .parse()
                .map_err(|e| format!("{}: bad {}: {}", s, what, e))
        };

        let step = match op {
            "open" => Step::Open(num("zone")?, OpenMode::Explicit),
            "open-implicit" => Step::Open(num("zone")?, OpenMode::Implicit),
            "close" => Step::Close(num("zone")?),
            "finish" => Step::Finish(num("zone")?),
            "reset" => Step::Reset(num("zone")?),
            "write" => Step::Write(num("zone")?, num("block count")?),
            "ext" => Step::Extension(num("zone")?),
            "read-only" => Step::ReadOnly(num("zone")?),
            "offline" => Step::Offline(num("zone")?),
            "shutdown" => Step::Shutdown,
            other => return Err(format!("unknown step '{}'", other)),
        };
        Ok(step)
    }
}

fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, shift) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 10),
        Some('M') => (&s[..s.len() - 1], 20),
        Some('G') => (&s[..s.len() - 1], 30),
        Some('T') => (&s[..s.len() - 1], 40),
        _ => (s, 0),
    };
    let value: u64 = digits
        .parse()
        .map_err(|e| format!("invalid size '{}': {}", s, e))?;
    value
        .checked_shl(shift)
        .filter(|v| v >> shift == value)
        .ok_or_else(|| format!("size '{}' out of range", s))
}

// =============================================================================
// Main
// =============================================================================

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let params = build_params(&args)?;
    let backend = build_backend(&args)?;

    let factory = NamespaceFactory::new();
    let mut ns = factory
        .setup(params, backend)
        .context("namespace setup failed")?;

    let output = match &args.command {
        Command::Geometry => json!({
            "nsid": ns.nsid(),
            "uuid": ns.uuid(),
            "eui64": format!("{:016x}", ns.eui64()),
            "geometry": ns.geometry(),
        }),
        Command::Report {
            from,
            state,
            extended,
        } => report(&ns, *from, state.map(ZoneState::from), *extended)?,
        Command::Identify { page } => {
            let data = match page {
                IdentifyPage::Ns => ns.identify(),
                IdentifyPage::Zoned => ns.identify_zoned()?,
                IdentifyPage::Descriptors => ns.identify_descriptors(),
            };
            json!({ "page": format!("{:?}", page), "data": hex(&data) })
        }
        Command::Simulate { steps, strict } => simulate(&mut ns, steps, *strict)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    ns.teardown().context("namespace teardown failed")?;
    Ok(())
}

/// Parameters from the config file, overridden by flags.
fn build_params(args: &Args) -> anyhow::Result<NamespaceParams> {
    let mut params = match &args.config {
        Some(path) => NamespaceParams::from_yaml_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => NamespaceParams::default(),
    };

    if let Some(nsid) = args.nsid {
        params.nsid = nsid;
    }
    if let Some(lbs) = args.block_size {
        params.logical_block_size =
            u32::try_from(lbs).context("block size does not fit in 32 bits")?;
    }
    if let Some(ms) = args.ms {
        params.ms = ms;
    }
    if args.zoned {
        params.zoned = true;
    }
    if let Some(size) = args.zone_size {
        params.zone.zone_size = size;
    }
    if let Some(cap) = args.zone_capacity {
        params.zone.zone_capacity = cap;
    }
    if let Some(max) = args.max_active {
        params.zone.max_active = max;
    }
    if let Some(max) = args.max_open {
        params.zone.max_open = max;
    }
    if let Some(size) = args.descr_ext_size {
        params.zone.descr_ext_size = size;
    }
    if args.cross_read {
        params.zone.cross_read = true;
    }

    Ok(params)
}

fn build_backend(args: &Args) -> anyhow::Result<Arc<dyn BlockBackend>> {
    if let Some(path) = &args.backing_file {
        let backend = FileBackend::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        return Ok(Arc::new(backend));
    }

    let mut backend = MemBackend::new(args.size);
    if let Some(cluster) = args.cluster_size {
        backend = backend.with_cluster_size(cluster);
    }
    Ok(Arc::new(backend))
}

fn report(
    ns: &Namespace,
    from: ZoneId,
    state: Option<ZoneState>,
    extended: bool,
) -> anyhow::Result<serde_json::Value> {
    // validates the request the way a zone report command would
    ns.report_zones(from, state, extended)?;

    let zns = ns.zns()?;
    let zones: Vec<_> = zns
        .report_zones(from, state)
        .into_iter()
        .map(|(id, zone)| {
            let mut entry = json!({ "zone": id, "descriptor": zone });
            if extended {
                entry["extension"] = json!(zns.reported_zd_extension(id).map(hex));
            }
            entry
        })
        .collect();

    Ok(json!({
        "active": zns.active_count(),
        "open": zns.open_count(),
        "zones": zones,
    }))
}

fn simulate(ns: &mut Namespace, steps: &[Step], strict: bool) -> anyhow::Result<serde_json::Value> {
    let mut results = Vec::with_capacity(steps.len());

    for step in steps {
        let outcome = apply_step(ns, *step);
        info!(?step, ok = outcome.is_ok(), "simulation step");

        match outcome {
            Ok(()) => results.push(json!({ "step": format!("{:?}", step), "ok": true })),
            Err(e) if strict => bail!("step {:?} failed: {}", step, e),
            Err(e) => results.push(json!({
                "step": format!("{:?}", step),
                "ok": false,
                "error": e.to_string(),
            })),
        }
    }

    let zns = ns.zns()?;
    let states: Vec<_> = zns
        .registry()
        .zones()
        .iter()
        .map(|z| json!({ "state": z.state.to_string(), "wp": z.wp }))
        .collect();

    Ok(json!({
        "steps": results,
        "active": zns.active_count(),
        "open": zns.open_count(),
        "zones": states,
    }))
}

fn apply_step(ns: &mut Namespace, step: Step) -> znscore::Result<()> {
    if let Step::Shutdown = step {
        return ns.shutdown();
    }

    let zns = ns.zns_mut()?;
    match step {
        Step::Open(z, mode) => zns.open_zone(z, mode)?,
        Step::Close(z) => zns.close_zone(z)?,
        Step::Finish(z) => zns.finish_zone(z)?,
        Step::Reset(z) => zns.reset_zone(z)?,
        Step::Write(z, nlb) => {
            let wp = zns
                .zone(z)
                .map(|zone| zone.wp)
                .ok_or(znscore::ZoneError::InvalidZone(u64::from(z)))?;
            zns.record_write(wp, nlb)?;
        }
        Step::Extension(z) => {
            let data = vec![0xa5; zns.geometry().zd_extension_size as usize];
            zns.set_zd_extension(z, &data)?
        }
        Step::ReadOnly(z) => zns.set_read_only(z)?,
        Step::Offline(z) => zns.offline_zone(z)?,
        Step::Shutdown => {}
    }
    Ok(())
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // stdout carries the JSON output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

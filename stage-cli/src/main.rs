//! Stage a file from tape to disk and wait for it.
//!
//! ```text
//! stage -a unix -p hssftp -t auth_keytab:/etc/keytab [-u user] [-v INFO]
//!       [-i task_id] [--sim-manifest FILE] PATH TIMEOUT_SEC
//! ```
//!
//! Exits 0 with a message describing the file's final residency, non-zero
//! on error. A production deployment links its storage client library
//! behind the [`hss_dsi::hss::Hss`] trait; this build drives the bundled
//! simulator, populated from `--sim-manifest` (lines of
//! `path disk|tape|archived size [stage_secs]`).

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use log::{LevelFilter, debug};

use hss_dsi::hss::Hss;
use hss_dsi::sim::{Placement, SimHss};
use hss_dsi::{Residency, StageTracker};

#[derive(Parser, Debug)]
#[command(name = "stage", about = "Stage a tape-resident file to disk")]
struct Args {
    /// Authentication mechanism (unix or krb5).
    #[arg(short = 'a', long = "auth-mech", default_value = "unix")]
    auth_mech: String,

    /// Super-user principal to log in as.
    #[arg(short = 'p', long = "principal")]
    principal: String,

    /// Authenticator, e.g. auth_keytab:/path/to/keytab.
    #[arg(short = 't', long = "authenticator")]
    authenticator: String,

    /// End user to switch the credential to.
    #[arg(short = 'u', long = "user")]
    user: Option<String>,

    /// Log level: ERROR, WARN, INFO, DEBUG, TRACE, or ALL.
    #[arg(short = 'v', long = "log-level")]
    log_level: Option<String>,

    /// Task id to tag log lines with.
    #[arg(short = 'i', long = "task-id")]
    task_id: Option<String>,

    /// Simulator manifest file describing the namespace.
    #[arg(long = "sim-manifest")]
    sim_manifest: Option<String>,

    /// File to stage.
    path: String,

    /// Seconds to wait for the stage to complete.
    timeout_sec: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = &args.log_level {
        builder.filter_level(parse_level(level)?);
    }
    builder.init();

    if let Some(task_id) = &args.task_id {
        debug!("task {task_id}: staging {}", args.path);
    }

    let hss = Arc::new(build_backend(args.sim_manifest.as_deref())?);

    hss.set_login_cred(&args.principal, &args.auth_mech, &args.authenticator)
        .context("failed to log into the storage system")?;
    if let Some(user) = &args.user {
        hss.become_user(user).context("failed to switch the active credential")?;
    }

    let (residency, request) = StageTracker::global()
        .stage_with_request(&*hss, &args.path, Duration::from_secs(args.timeout_sec))
        .with_context(|| format!("failed to stage {}", args.path))?;

    match residency {
        Residency::Archived => match request {
            Some(id) => {
                println!("File is being retrieved from tape. Request ID: {}", id.0);
            }
            None => println!("File is being retrieved from tape."),
        },
        Residency::TapeOnly => {
            println!("File resides on a tape only class of service; it cannot be staged.");
        }
        Residency::Resident => println!("File is resident."),
    }
    Ok(())
}

fn parse_level(level: &str) -> anyhow::Result<LevelFilter> {
    let filter = match level.to_ascii_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "INFO" => LevelFilter::Info,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" | "ALL" => LevelFilter::Trace,
        other => bail!("unknown log level {other}"),
    };
    Ok(filter)
}

fn build_backend(manifest: Option<&str>) -> anyhow::Result<SimHss> {
    let sim = SimHss::new();
    let Some(manifest) = manifest else {
        return Ok(sim);
    };
    let text = fs::read_to_string(manifest)
        .with_context(|| format!("cannot read manifest {manifest}"))?;
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            bail!("{manifest}:{}: expected 'path placement size [stage_secs]'", lineno + 1);
        }
        let size: u64 = fields[2]
            .parse()
            .with_context(|| format!("{manifest}:{}: bad size", lineno + 1))?;
        let data = vec![0u8; size as usize];
        sim.add_file(fields[0], &data);
        let placement = match fields[1] {
            "disk" => Placement::Disk,
            "tape" => Placement::TapeOnly,
            "archived" => Placement::Archived,
            other => bail!("{manifest}:{}: unknown placement {other}", lineno + 1),
        };
        sim.set_placement(fields[0], placement);
        if let Some(secs) = fields.get(3) {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("{manifest}:{}: bad stage time", lineno + 1))?;
            sim.set_stage_latency(fields[0], Duration::from_secs(secs));
        }
    }
    Ok(sim)
}

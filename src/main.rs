//! colocate infers co-residency of serverless instances through a
//! memory-contention side channel.
//!
//! Every attacker instance must run the probe server, exposing `/lock`,
//! `/check`, `/instance_id` and `/info`.
//!
//! # Commands
//!
//! **coverage** Partitions the instance URLs listed in `<urls-file>` into
//! groups sharing a physical server, and writes them as JSON.
//!
//! **discover** Collects the instance ids answering behind a single
//! shared URL.
//!
//! **shared** Like `coverage`, for instances all reachable through one
//! URL only; the instances are given as ids (see `discover`).
//!
//! **prepare** Groups instances by declared CPU and keeps one
//! representative per server group, producing the cpu sets searched by
//! `locate`.
//!
//! **locate** Searches the cpu sets for an instance sharing a server with
//! the victim, by watching the victim's latency under contention.
//!
//! Thresholds are platform dependent and have no default: they should be
//! calibrated beforehand. `--log` keeps every observation as CSV for that
//! purpose.
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `colocate=info`).
use std::process;
use std::sync::Arc;
use std::time::Duration;

use docopt::Docopt;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use colocate::architecture::{deduplicate_by_server, group_by_architecture};
use colocate::coverage::{covers_exactly, discover_instances, CoverageIdentifier,
                         SharedUrlIdentifier, ServerGroup};
use colocate::locate::{Localization, Localizer};
use colocate::observation::ObservationLog;
use colocate::oracle::HttpOracle;
use colocate::settings::Settings;
use colocate::utils::*;
use colocate::{Error, Result};


const USAGE: &'static str = "
Infer co-residency of serverless instances via memory contention.

Usage: colocate coverage [options] --threshold=<t> <urls-file> <groups-out>
       colocate shared [options] --threshold=<t> <url> <ids-file> <groups-out>
       colocate discover [options] <url> <ids-out>
       colocate prepare [options] <urls-file> <groups-file> <sets-out>
       colocate locate [options] --latency-threshold=<s> <sets-file> <victim-url>
       colocate (--help | --version)

Options:
    --threshold=<t>             Minimum mem-check metric to infer that two
                                instances share a server.
    --latency-threshold=<s>     Minimum victim median latency (seconds) to
                                infer co-residency with the victim.
    --timeout=<s>               Timeout of mem-check, identity and info
                                requests, in seconds [default: 10].
    --lock-timeout=<s>          Timeout of lock requests [default: 60].
    --victim-timeout=<s>        Timeout of victim requests [default: 30].
    --settle=<s>                Delay between locking and checking
                                [default: 0.1].
    --warmup=<s>                Delay between locking and timing the
                                victim [default: 0.1].
    --probe-runs=<n>            Victim requests per contention burst; the
                                median is used [default: 1].
    --checks=<n>                Mem-check requests per iteration behind a
                                shared URL [default: 60].
    --requests=<n>              Identity requests issued by discovery
                                [default: 60].
    --workers=<n>               Maximum concurrent probes [default: 64].
    --max-stale=<n>             Consecutive unusable locks tolerated
                                behind a shared URL [default: 100].
    --retries=<n>               Attempts for idempotent requests
                                [default: 5].
    --lock-endpoint=<p>         Relative path of the lock endpoint
                                [default: lock].
    --info-endpoint=<p>         Relative path of the info endpoint
                                [default: info].
    --log=<csv>                 Log every observation to this CSV file.
    -h, --help                  Show help.
    --version                   Show the version.
";

#[derive(Deserialize)]
struct Args {
    cmd_coverage: bool,
    cmd_shared: bool,
    cmd_discover: bool,
    cmd_prepare: bool,
    cmd_locate: bool,
    flag_threshold: Option<f64>,
    flag_latency_threshold: Option<f64>,
    flag_timeout: f64,
    flag_lock_timeout: f64,
    flag_victim_timeout: f64,
    flag_settle: f64,
    flag_warmup: f64,
    flag_probe_runs: usize,
    flag_checks: usize,
    flag_requests: usize,
    flag_workers: usize,
    flag_max_stale: usize,
    flag_retries: usize,
    flag_lock_endpoint: String,
    flag_info_endpoint: String,
    flag_log: Option<String>,
    arg_urls_file: String,
    arg_groups_out: String,
    arg_groups_file: String,
    arg_sets_out: String,
    arg_sets_file: String,
    arg_ids_file: String,
    arg_ids_out: String,
    arg_url: String,
    arg_victim_url: String,
}

/// Parses a number of seconds into a Duration.
fn seconds(name: &str, secs: f64) -> Result<Duration> {
    if secs.is_finite() && secs >= 0. {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(Error::InvalidSetting(format!("--{} must be a non-negative number of seconds",
                                          name)))
    }
}

fn settings_from(args: &Args) -> Result<Settings> {
    let mut settings = Settings {
        coverage_threshold: args.flag_threshold,
        latency_threshold: args.flag_latency_threshold,
        request_timeout: seconds("timeout", args.flag_timeout)?,
        lock_timeout: seconds("lock-timeout", args.flag_lock_timeout)?,
        victim_timeout: seconds("victim-timeout", args.flag_victim_timeout)?,
        settle_delay: seconds("settle", args.flag_settle)?,
        lock_warmup: seconds("warmup", args.flag_warmup)?,
        probe_runs: args.flag_probe_runs,
        check_requests: args.flag_checks,
        discovery_requests: args.flag_requests,
        max_workers: args.flag_workers,
        max_stale_locks: args.flag_max_stale,
        ..Settings::default()
    };
    settings.endpoints.lock = args.flag_lock_endpoint.clone();
    settings.endpoints.info = args.flag_info_endpoint.clone();
    settings.retry.max_attempts = args.flag_retries;
    settings.validate()?;
    Ok(settings)
}

fn print_groups(groups: &[ServerGroup]) {
    println!("{} server groups", groups.len());
    for group in groups {
        println!("{}: {}", group.lock_url, group.members.join(", "));
    }
}

fn run_coverage(args: &Args, settings: &Settings, log: &mut Option<ObservationLog>)
        -> Result<()> {
    let urls = load_lines(&args.arg_urls_file)?;
    let oracle = HttpOracle::new(settings)?;
    let groups = CoverageIdentifier::new(&oracle, settings)?.identify(&urls, log)?;

    if !covers_exactly(&groups, &urls) {
        warn!("server groups do not partition the input instances");
    }
    print_groups(&groups);
    save_server_groups(&groups, &args.arg_groups_out)
}

fn run_shared(args: &Args, settings: &Settings, log: &mut Option<ObservationLog>)
        -> Result<()> {
    let ids = load_instance_ids(&args.arg_ids_file)?;
    let oracle = HttpOracle::new(settings)?;
    let groups = SharedUrlIdentifier::new(&oracle, &args.arg_url, settings)?
                     .identify(&ids, log)?;

    if !covers_exactly(&groups, &ids) {
        warn!("server groups do not partition the input instances");
    }
    print_groups(&groups);
    save_server_groups(&groups, &args.arg_groups_out)
}

fn run_discover(args: &Args, settings: &Settings) -> Result<()> {
    let oracle = HttpOracle::new(settings)?;
    let ids = discover_instances(&oracle, &args.arg_url, settings.discovery_requests,
                                 settings.max_workers)?;
    println!("{} instances", ids.len());
    save_instance_ids(&ids, &args.arg_ids_out)
}

fn run_prepare(args: &Args, settings: &Settings) -> Result<()> {
    let urls = load_lines(&args.arg_urls_file)?;
    let groups = load_server_groups(&args.arg_groups_file)?;
    let oracle = HttpOracle::new(settings)?;

    let sets = group_by_architecture(&urls, &oracle)?;
    let cpu_sets = deduplicate_by_server(&sets, &groups);
    for set in &cpu_sets {
        println!("{} @ {:?}: {} instances",
                 set.cpu_brand.as_deref().unwrap_or("-"), set.parsed_freq,
                 set.instances.len());
    }
    save_cpu_sets(&cpu_sets, &args.arg_sets_out)
}

fn run_locate(args: &Args, settings: &Settings, log: &mut Option<ObservationLog>)
        -> Result<()> {
    let cpu_sets = load_cpu_sets(&args.arg_sets_file)?;
    let oracle = Arc::new(HttpOracle::new(settings)?);
    let localizer = Localizer::new(oracle, &args.arg_victim_url, settings)?;

    match localizer.locate(&cpu_sets, log)? {
        Localization::CoResident { set, instance, rounds } => {
            println!("co-resident instance: {}", instance);
            println!("cpu set: {} ({} bisection rounds)", set, rounds);
        },
        Localization::NotFound => println!("victim not localized"),
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let settings = settings_from(args)?;
    let mut log = match args.flag_log {
        Some(ref path) => Some(ObservationLog::create(path)?),
        None => None,
    };

    if args.cmd_coverage {
        run_coverage(args, &settings, &mut log)
    } else if args.cmd_shared {
        run_shared(args, &settings, &mut log)
    } else if args.cmd_discover {
        run_discover(args, &settings)
    } else if args.cmd_prepare {
        run_prepare(args, &settings)
    } else if args.cmd_locate {
        run_locate(args, &settings, &mut log)
    } else {
        Err(Error::InvalidSetting("no command given".to_string()))
    }
}


fn main() {
    // Parse args from command line.
    let args: Args = Docopt::new(USAGE)
                            .and_then(|d| d.version(Some(env!("CARGO_PKG_VERSION")
                                                             .to_string()))
                                           .deserialize())
                            .unwrap_or_else(|e| e.exit());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env()
                  .unwrap_or_else(|_| EnvFilter::new("colocate=info")))
        .with(tracing_subscriber::fmt::layer()
                  .with_writer(std::io::stderr)
                  .with_thread_names(true))
        .init();

    if let Err(e) = run(&args) {
        eprintln!("[!] {}", e);
        process::exit(1);
    }
    info!("done");
}

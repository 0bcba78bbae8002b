use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use muxscan::channel::{Channel, ChannelType};
use muxscan::config::ScanConfig;
use muxscan::dvb::{DemuxTables, DvbFrontend};
use muxscan::lock::LockOutcome;
use muxscan::poll::CancelToken;
use muxscan::scan::Scanner;
use muxscan::store::StoredMultiplex;

#[derive(Parser)]
#[command(name = "muxscan", version, about = "Scan DVB-T2 multiplexes for services")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan every PLP of one carrier and list the services found
    Scan {
        #[command(flatten)]
        tune: TuneArgs,

        /// Print the channel list as JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Tune, wait for lock and report signal levels
    Lock {
        #[command(flatten)]
        tune: TuneArgs,

        /// Keep printing signal levels every second until interrupted
        #[arg(long, default_value_t = false)]
        watch: bool,
    },
}

#[derive(Args)]
struct TuneArgs {
    /// DVB adapter number (/dev/dvb/adapterN)
    #[arg(short, long, default_value_t = 0)]
    adapter: u32,

    /// Carrier frequency in kHz
    #[arg(short, long)]
    frequency: u32,

    /// Channel bandwidth in MHz
    #[arg(short, long, default_value_t = 8)]
    bandwidth: u32,

    /// Lock polling budget in milliseconds
    #[arg(long, default_value_t = 2000)]
    lock_timeout_ms: u64,

    /// Per-table fetch budget in milliseconds
    #[arg(long, default_value_t = 2000)]
    table_timeout_ms: u64,

    /// Delay between two polls in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,
}

impl TuneArgs {
    fn config(&self) -> ScanConfig {
        ScanConfig {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            table_timeout: Duration::from_millis(self.table_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..Default::default()
        }
    }

    fn open_scanner(&self, cancel: CancelToken) -> Scanner<DvbFrontend, DemuxTables> {
        let frontend = match DvbFrontend::open(self.adapter) {
            Ok(fe) => fe,
            Err(e) => {
                eprintln!("Failed to open frontend: {e}");
                process::exit(1);
            }
        };
        let scanner = Scanner::new(frontend, DemuxTables::new(self.adapter))
            .with_config(self.config())
            .with_cancel_token(cancel);
        match scanner.frontend().name() {
            Ok(name) => println!("Using adapter{}: {name}", self.adapter),
            Err(e) => log::warn!("Could not read frontend info: {e}"),
        }
        scanner
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Scan { tune, json } => cmd_scan(&tune, json),
        Command::Lock { tune, watch } => cmd_lock(&tune, watch),
    }
}

fn cmd_scan(tune: &TuneArgs, json: bool) {
    let cancel = CancelToken::new();
    cancel_on_interrupt(cancel.clone());
    let mut scanner = tune.open_scanner(cancel);

    if !json {
        let config = scanner.config();
        println!(
            "Scanning {} MHz ({} MHz bandwidth), lock budget {}ms, table budget {}ms...",
            tune.frequency as f64 / 1000.0,
            tune.bandwidth,
            (config.settle_time() + config.lock_timeout).as_millis(),
            config.table_timeout.as_millis()
        );
    }

    let report = match scanner.scan_report(tune.frequency, tune.bandwidth) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if json {
        let stored = StoredMultiplex::from(&report.multiplex);
        match serde_json::to_string_pretty(&stored) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Failed to encode channel list: {e}");
                process::exit(1);
            }
        }
        return;
    }

    let channels = report.multiplex.channels();
    if channels.is_empty() {
        println!("No channels found ({}).", report.stop);
        return;
    }

    println!("  Found {} services:", channels.len());
    for ch in channels {
        println!("    {}", describe_channel(ch));
    }
    println!();
    println!(
        "Scanned {} PLP pass(es), stopped: {}",
        report.plps_attempted, report.stop
    );
}

fn cmd_lock(tune: &TuneArgs, watch: bool) {
    let cancel = CancelToken::new();
    cancel_on_interrupt(cancel.clone());
    let mut scanner = tune.open_scanner(cancel.clone());

    match scanner.lock(tune.frequency, tune.bandwidth) {
        Ok(LockOutcome::Locked(status)) => {
            println!(
                "Locked: strength {}%, quality {}%",
                status.signal_strength, status.signal_quality
            );
        }
        Ok(LockOutcome::Failed) => {
            println!("No lock on {} kHz.", tune.frequency);
            process::exit(2);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }

    while watch && !cancel.is_cancelled() {
        thread::sleep(Duration::from_secs(1));
        match scanner.lock_status() {
            Ok(status) => println!(
                "  strength {:3}%  quality {:3}%  {}",
                status.signal_strength,
                status.signal_quality,
                if status.is_locked() { "LOCK" } else { "----" }
            ),
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }
}

fn describe_channel(ch: &Channel) -> String {
    let kind = match ch.channel_type {
        ChannelType::Tv => "TV",
        ChannelType::Radio => "Radio",
        ChannelType::Unknown => "Other",
    };
    let pid = |pid: Option<u16>| pid.map_or_else(|| "-".to_string(), |p| p.to_string());
    let plp = ch.plp.map_or_else(|| "-".to_string(), |p| p.to_string());
    format!(
        "{} [{kind}{}] (SID={}, PLP={plp}, PMT={}, video={}, audio={})",
        ch.name,
        if ch.scrambled { ", scrambled" } else { "" },
        ch.service_id,
        ch.program_map_pid,
        pid(ch.video_pid()),
        pid(ch.audio_pid()),
    )
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn interrupt_handler(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

/// Forward SIGINT/SIGTERM to `token` so a running scan stops at its next poll.
fn cancel_on_interrupt(token: CancelToken) {
    let _ = unsafe { libc::signal(libc::SIGINT, interrupt_handler as *const () as libc::sighandler_t) };
    let _ = unsafe { libc::signal(libc::SIGTERM, interrupt_handler as *const () as libc::sighandler_t) };

    thread::spawn(move || {
        while !INTERRUPTED.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(50));
        }
        eprintln!("Interrupted, stopping...");
        token.cancel();
    });
}

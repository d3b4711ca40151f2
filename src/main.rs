use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, Write};
use std::thread;
use tracing_subscriber::EnvFilter;

use rping::ProbeError;
use rping::cli::Args;
use rping::config::{Config, ProbeProtocol};
use rping::export::{
    CSV_HEADER, export_json, export_json_all, format_reply, generate_report, write_rows,
};
use rping::prefs::Prefs;
use rping::probe::{Outcome, resolve};
use rping::state::{Session, Target};

fn main() -> Result<()> {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // A broken config file should not stop a ping
    let prefs = Prefs::load().unwrap_or_else(|e| {
        eprintln!("Warning: {:#}", e);
        Prefs::default()
    });
    init_logging(&args, &prefs);

    let config = Config::from_args(&args, &prefs);

    // Resolve all targets
    let mut targets = Vec::with_capacity(args.targets.len());
    for host in &args.targets {
        let resolved =
            resolve(host).with_context(|| format!("Failed to resolve target: {}", host))?;
        targets.push(Target::new(host.clone(), resolved));
    }

    if !args.is_batch_mode() && !args.quiet {
        for target in &targets {
            println!(
                "PING {} ({}) {} {}",
                target.original,
                target.resolved,
                config.protocol,
                describe_probe(&config)
            );
        }
    }

    let results = run_sessions(&args, &config, targets);

    let mut sessions = Vec::new();
    let mut permission_denied = false;
    let mut failed = false;
    for (target, result) in results {
        match result {
            Ok(session) => sessions.push(session),
            Err(e) => {
                permission_denied |= e.is_permission();
                failed = true;
                eprintln!("Error: {}: {}", target.original, e);
            }
        }
    }

    write_output(&args, &sessions)?;

    if permission_denied {
        eprintln!(
            "Hint: {} probes open raw sockets. Run with sudo, grant CAP_NET_RAW, \
             or use -p udp / -p tcp.",
            config.protocol
        );
    }
    if failed {
        std::process::exit(1);
    }

    Ok(())
}

fn init_logging(args: &Args, prefs: &Prefs) {
    let filter = match args.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(prefs.log_level.as_deref().unwrap_or("warn"))
        }),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();
}

fn describe_probe(config: &Config) -> String {
    match config.protocol {
        ProbeProtocol::Icmp => format!("{} data bytes", config.packet_size),
        _ => format!("port {}", config.effective_port()),
    }
}

/// One session per target, each on its own thread
fn run_sessions(
    args: &Args,
    config: &Config,
    targets: Vec<Target>,
) -> Vec<(Target, Result<Session, ProbeError>)> {
    let show_replies = !args.is_batch_mode() && !args.quiet;

    thread::scope(|scope| {
        let handles: Vec<_> = targets
            .into_iter()
            .map(|target| {
                let config = config.clone();
                let handle = scope.spawn({
                    let target = target.clone();
                    move || run_one(target, config, show_replies)
                });
                (target, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(target, handle)| {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(ProbeError::Transport(io::Error::other("probe thread panicked")))
                });
                (target, result)
            })
            .collect()
    })
}

fn run_one(target: Target, config: Config, show_replies: bool) -> Result<Session, ProbeError> {
    let (count, deadline) = (config.count, config.deadline);
    let mut session = Session::new(target, config)?;
    let host = session.target.original.clone();

    session.run_with(count, deadline, |sequence, outcome| {
        if !show_replies {
            return;
        }
        match outcome {
            Outcome::Reply(reply) => println!("{}", format_reply(reply)),
            Outcome::Timeout => println!("Request timeout for {} seq={}", host, sequence),
            Outcome::Error(e) => eprintln!("{} seq={}: {}", host, sequence, e),
        }
    })?;

    Ok(session)
}

fn write_output(args: &Args, sessions: &[Session]) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if args.json {
        match sessions {
            [session] => export_json(session, &mut out)?,
            _ => export_json_all(sessions, &mut out)?,
        }
        writeln!(out)?;
    } else if args.csv {
        writeln!(out, "{}", CSV_HEADER)?;
        for session in sessions {
            write_rows(session, &mut out)?;
        }
    } else {
        for session in sessions {
            writeln!(out)?;
            generate_report(session, &mut out)?;
        }
    }

    out.flush()?;
    Ok(())
}

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process;

use auditwatch_eval::{
    Alert, AlertSink, BatchSource, CancellationToken, FanoutSink, JsonSink, RunStats, Runner,
    StartPosition, TailSource, TextSink, WatchConfig,
};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "auditwatch")]
#[command(about = "Detect brute-force logins and insider record snooping in audit logs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan an existing audit log once and exit
    Scan {
        #[command(flatten)]
        detect: DetectArgs,
    },

    /// Follow an audit log as it grows and alert in real time
    ///
    /// Starts at the current end of the file unless the configuration (or
    /// --from-beginning) says otherwise. Stops on Ctrl-C.
    Watch {
        #[command(flatten)]
        detect: DetectArgs,

        /// Replay the existing contents before following new lines
        #[arg(long)]
        from_beginning: bool,
    },

    /// Print the effective detector configuration and exit
    Detectors {
        /// Detector configuration YAML file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the full configuration as YAML instead of a summary
        #[arg(long)]
        yaml: bool,
    },
}

#[derive(Args)]
struct DetectArgs {
    /// Path to the newline-delimited JSON audit log
    #[arg(short, long, env = "AUDITWATCH_LOG", default_value = "logs/audit.log")]
    log: PathBuf,

    /// Detector configuration YAML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print alerts as JSON (one object per line)
    #[arg(long)]
    json: bool,

    /// Pretty-print JSON alerts (implies --json)
    #[arg(short, long)]
    pretty: bool,

    /// Also append every alert as NDJSON to this file
    #[arg(long)]
    alerts_out: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { detect } => cmd_scan(detect),
        Commands::Watch {
            detect,
            from_beginning,
        } => cmd_watch(detect, from_beginning),
        Commands::Detectors { config, yaml } => cmd_detectors(config, yaml),
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_scan(args: DetectArgs) {
    let config = load_config(args.config.as_deref());

    let mut source = match BatchSource::open(&args.log) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error opening {}: {e}", args.log.display());
            process::exit(1);
        }
    };

    let mut runner = Runner::from_config(&config, build_sink(&args));
    print_banner("Scanning", &args.log, &runner);

    match runner.run_batch(&mut source) {
        Ok(stats) => print_summary(&stats),
        Err(e) => {
            eprintln!("Error reading {}: {e}", args.log.display());
            print_summary(&runner.stats());
            process::exit(1);
        }
    }
}

fn cmd_watch(args: DetectArgs, from_beginning: bool) {
    let mut config = load_config(args.config.as_deref());
    if from_beginning {
        config.live.start = StartPosition::Beginning;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            process::exit(1);
        }
    };

    let mut runner = Runner::from_config(&config, build_sink(&args));
    let mut source = TailSource::new(&args.log, &config.live);
    print_banner("Watching", &args.log, &runner);
    eprintln!("Waiting for new audit events... (Ctrl+C to stop)\n");

    let cancel = CancellationToken::new();
    let result = runtime.block_on(async {
        let trigger = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("interrupt received, stopping");
            }
            trigger.cancel();
        });
        runner.run_live(&mut source, &cancel).await
    });

    match result {
        Ok(stats) => {
            print_summary(&stats);
            eprintln!("Stopped at byte {} of {}", source.offset(), args.log.display());
        }
        Err(e) => {
            eprintln!("Error following {}: {e}", args.log.display());
            print_summary(&runner.stats());
            process::exit(1);
        }
    }
}

fn cmd_detectors(config_path: Option<PathBuf>, yaml: bool) {
    let config = load_config(config_path.as_deref());

    if yaml {
        match config.to_yaml() {
            Ok(text) => print!("{text}"),
            Err(e) => {
                eprintln!("Error rendering configuration: {e}");
                process::exit(1);
            }
        }
        return;
    }

    let runner = Runner::from_config(&config, Vec::<Alert>::new());
    for detector in runner.detectors() {
        println!("{}", detector.describe());
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> WatchConfig {
    let Some(path) = path else {
        return WatchConfig::default();
    };
    match WatchConfig::from_yaml_file(path) {
        Ok(config) => {
            eprintln!("Loaded configuration: {}", path.display());
            config
        }
        Err(e) => {
            eprintln!("Error loading configuration {}: {e}", path.display());
            process::exit(1);
        }
    }
}

fn build_sink(args: &DetectArgs) -> FanoutSink {
    let stdout: Box<dyn AlertSink> = if args.json || args.pretty {
        Box::new(JsonSink::new(std::io::stdout(), args.pretty))
    } else {
        Box::new(TextSink::stdout())
    };
    let mut sink = FanoutSink::new();
    sink.push(stdout);

    if let Some(path) = &args.alerts_out {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => sink.push(Box::new(JsonSink::new(file, false))),
            Err(e) => {
                eprintln!("Error opening alerts file {}: {e}", path.display());
                process::exit(1);
            }
        }
    }

    sink
}

fn print_banner(verb: &str, log: &Path, runner: &Runner) {
    eprintln!("{verb}: {}", log.display());
    eprintln!("Detections enabled:");
    for detector in runner.detectors() {
        eprintln!("- {}", detector.describe());
    }
}

fn print_summary(stats: &RunStats) {
    eprintln!(
        "Processed {} lines: {} events, {} skipped, {} alerts.",
        stats.source.lines, stats.events, stats.source.skipped, stats.alerts
    );
}

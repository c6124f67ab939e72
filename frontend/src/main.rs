use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{ArgAction, Args, Parser, Subcommand};
use cyclehost_core::core::MachineHost;
use cyclehost_core::error::SchedulerError;
use cyclehost_core::report::Reporter;
use cyclehost_core::scheduler::{ExecutionScheduler, SchedulerEvent, TickRate};
use cyclehost_machines::registry::{self, MachineEntry};
use cyclehost_machines::{TraceDebugger, TraceLog};

mod config;
mod screenshot;
mod state_file;

use config::Config;

#[derive(Parser)]
#[command(name = "cyclehost", version, about = "Run cycle-stepped machines in real time")]
struct Cli {
    /// More log output (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file [default: <config dir>/cyclehost/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available machines
    List,
    /// Run a machine
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Machine name (see `list`)
    machine: String,

    /// Program image; defaults to the machine's built-in program
    #[arg(long)]
    rom: Option<PathBuf>,

    /// Wall-clock seconds to run, excluding time spent paused
    #[arg(long)]
    seconds: Option<f64>,

    /// Master clock override in ticks per second
    #[arg(long)]
    hz: Option<u64>,

    /// Pause after this many seconds of running
    #[arg(long)]
    pause_after: Option<f64>,

    /// How long to stay paused
    #[arg(long, default_value_t = 0.5)]
    pause_for: f64,

    /// Restore this save state before running
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Write a save state when the run ends
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Write the final frame as PNG
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Trace executed instructions and print the last lines on exit
    #[arg(long)]
    trace: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = execute(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn execute(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = Config::load(cli.config.as_deref())?;
    match cli.command {
        Command::List => {
            list();
            Ok(())
        }
        Command::Run(args) => run(args, config),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn list() {
    for entry in registry::all() {
        println!(
            "{:<12} {:>10} Hz  {}",
            entry.name, entry.default_hz, entry.description
        );
    }
}

/// Logs through `log` and remembers whether the machine faulted.
struct CliReporter {
    faulted: Arc<AtomicBool>,
}

impl Reporter for CliReporter {
    fn fault(&self, error: &SchedulerError) {
        log::error!("{error}");
        self.faulted.store(true, Ordering::SeqCst);
    }

    fn warn(&self, message: &str) {
        log::warn!("{message}");
    }

    fn info(&self, message: &str) {
        log::info!("{message}");
    }
}

fn find_machine(name: &str) -> Result<&'static MachineEntry, String> {
    registry::find(name).ok_or_else(|| {
        let names: Vec<_> = registry::all().iter().map(|e| e.name).collect();
        format!("unknown machine {name} (available: {})", names.join(", "))
    })
}

fn load_program(
    entry: &MachineEntry,
    rom: Option<&Path>,
) -> Result<(Vec<u8>, String), Box<dyn Error>> {
    match (rom, entry.builtin_rom) {
        (Some(path), _) => {
            let bytes = std::fs::read(path)
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
            let name = path.file_name().map_or_else(
                || path.display().to_string(),
                |n| n.to_string_lossy().into_owned(),
            );
            Ok((bytes, name))
        }
        (None, Some(builtin)) => Ok((builtin(), "builtin".to_string())),
        (None, None) => Err(format!("{} has no built-in program; pass --rom", entry.name).into()),
    }
}

fn attach_trace(machine: &mut dyn MachineHost, lines: usize) -> Option<TraceLog> {
    let name = machine.name().to_string();
    let Some(cpu) = machine.cpu() else {
        log::warn!("{name} does not expose its CPU, --trace ignored");
        return None;
    };
    let (tracer, log) = TraceDebugger::new(lines);
    cpu.add_text_debugger(Box::new(tracer));
    Some(log)
}

fn run(args: RunArgs, config: Config) -> Result<(), Box<dyn Error>> {
    let entry = find_machine(&args.machine)?;
    let mut machine = (entry.create)()?;

    let (program, program_name) = load_program(entry, args.rom.as_deref())?;
    machine.load_rom(&program, &program_name)?;

    let trace = if args.trace {
        attach_trace(machine.as_mut(), config.run.trace_lines)
    } else {
        None
    };

    let rate = TickRate::new(args.hz.or(config.run.hz).unwrap_or(entry.default_hz));
    let faulted = Arc::new(AtomicBool::new(false));
    let reporter = Arc::new(CliReporter {
        faulted: Arc::clone(&faulted),
    });
    let scheduler =
        ExecutionScheduler::with_config(machine, rate.accessor(), reporter, config.scheduler);
    scheduler
        .events()
        .subscribe(SchedulerEvent::StateLoaded, |_| log::debug!("state loaded"));

    if let Some(path) = &args.load_state {
        let state = state_file::read(path, entry.name)?;
        scheduler.load_state(state)?;
        log::info!("restored {}", path.display());
        scheduler.start_from_current_state()?;
    } else {
        scheduler.start()?;
    }

    let start_ticks = scheduler.cpu_ticks();
    let seconds = args.seconds.unwrap_or(config.run.seconds).max(0.0);
    let ran = match args.pause_after.filter(|&p| p < seconds) {
        Some(pause_at) => {
            let before = run_for(&scheduler, Duration::from_secs_f64(pause_at.max(0.0)));
            scheduler.toggle_pause();
            log::info!("paused at {} ticks", scheduler.cpu_ticks());
            thread::sleep(Duration::from_secs_f64(args.pause_for.max(0.0)));
            scheduler.toggle_pause();
            log::info!("resumed");
            before + run_for(&scheduler, Duration::from_secs_f64(seconds - pause_at.max(0.0)))
        }
        None => run_for(&scheduler, Duration::from_secs_f64(seconds)),
    };
    scheduler.stop();

    let ticks = scheduler.cpu_ticks() - start_ticks;
    let effective = ticks as f64 / ran.as_secs_f64().max(f64::EPSILON);
    println!(
        "{}: {ticks} ticks in {:.3} s ({:.0} Hz, target {} Hz)",
        entry.name,
        ran.as_secs_f64(),
        effective,
        rate.get()
    );

    if let Some(log) = &trace {
        for line in log.lines() {
            println!("{line}");
        }
    }

    if let Some(path) = &args.save_state {
        let state = scheduler.capture_state()?;
        state_file::write(path, entry.name, &state)?;
        log::info!("saved {} bytes of state to {}", state.len(), path.display());
    }

    if let Some(path) = &args.screenshot {
        scheduler.with_machine(|m| screenshot::write_png(path, m.video()))?;
        log::info!("wrote {}", path.display());
    }

    if faulted.load(Ordering::SeqCst) {
        return Err("machine stopped on a fault".into());
    }
    Ok(())
}

/// Sleep up to `duration` while the execution thread is alive. Returns the
/// time actually waited.
fn run_for<M: MachineHost + 'static>(
    scheduler: &ExecutionScheduler<M>,
    duration: Duration,
) -> Duration {
    let started = Instant::now();
    while started.elapsed() < duration && scheduler.is_running() {
        thread::sleep((duration - started.elapsed().min(duration)).min(Duration::from_millis(10)));
    }
    started.elapsed().min(duration)
}

//! pulsegrid CLI: play a handful of step tracks against the system clock
//! and print their ticks.
//!
//! Usage:
//!   cargo run --bin pg-cli -- --steps 16 --steps 4 --steps 3
//!   cargo run --bin pg-cli -- --steps 16 --steps 3 --retune 1=8 --seconds 4

use clap::Parser;
use pg_master::{StepTick, SystemClock, Tempo, Transport, TransportConfig};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, about, long_about = None)]
struct Args {
    /// Steps per cycle for each track (repeatable)
    #[clap(short = 's', long = "steps", required = true)]
    steps: Vec<u32>,

    /// Tempo in beats per minute
    #[clap(long, default_value_t = 120.0)]
    bpm: f64,

    /// Beats in one cycle
    #[clap(long, default_value_t = 4)]
    beats: u32,

    /// How long to play, in seconds
    #[clap(long, default_value_t = 4.0)]
    seconds: f64,

    /// Lookahead window in milliseconds
    #[clap(long, default_value_t = 100)]
    lookahead_ms: u64,

    /// Coarse timer interval in milliseconds
    #[clap(long, default_value_t = 25)]
    interval_ms: u64,

    /// Change track INDEX to STEPS halfway through, as INDEX=STEPS
    #[clap(long, value_parser = parse_retune)]
    retune: Option<(usize, u32)>,
}

fn parse_retune(arg: &str) -> Result<(usize, u32), String> {
    let (index, steps) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected INDEX=STEPS, got {arg}"))?;
    let index = index.trim().parse().map_err(|e| format!("bad index {index}: {e}"))?;
    let steps = steps.trim().parse().map_err(|e| format!("bad steps {steps}: {e}"))?;
    Ok((index, steps))
}

fn printer(track: usize) -> impl FnMut(StepTick) {
    move |tick: StepTick| {
        println!(
            "{:>8.3}s  track {:<2} {:>3}/{:<3}",
            tick.time, track, tick.step, tick.steps
        );
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    if !(args.seconds.is_finite() && args.seconds >= 0.0) {
        eprintln!("--seconds must be a non-negative number");
        return ExitCode::FAILURE;
    }

    let config = TransportConfig::default()
        .with_tempo(Tempo::new(args.bpm, args.beats))
        .with_lookahead(args.lookahead_ms as f64 / 1000.0)
        .with_timer_interval(Duration::from_millis(args.interval_ms));
    let mut transport = match Transport::new(SystemClock::new(), config) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut ids = Vec::with_capacity(args.steps.len());
    for (index, &steps) in args.steps.iter().enumerate() {
        match transport.add_track(steps, printer(index)) {
            Ok(id) => ids.push(id),
            Err(e) => {
                eprintln!("track {index} ({steps} steps): {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    println!("Tracks:   {:?}", args.steps);
    println!("Leads:    {:?}", transport.lead_periods());
    println!("Tempo:    {} BPM, {} beats per cycle", args.bpm, args.beats);
    println!();

    if let Err(e) = transport.play() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let total = Duration::from_secs_f64(args.seconds);
    let mut emitted = 0;
    match args.retune {
        Some((index, steps)) => {
            emitted += transport.run_for(total / 2);
            match ids.get(index) {
                Some(&id) => match transport.set_track_steps(id, steps) {
                    Ok(()) => println!("-- track {index} now {steps} steps, leads {:?}", transport.lead_periods()),
                    Err(e) => eprintln!("-- retune of track {index} failed: {e}"),
                },
                None => eprintln!("-- no track {index} to retune"),
            }
            emitted += transport.run_for(total - total / 2);
        }
        None => emitted += transport.run_for(total),
    }

    if let Err(e) = transport.stop() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    println!();
    println!("Done. {} lead steps, {} queued.", emitted, transport.events().len());
    ExitCode::SUCCESS
}

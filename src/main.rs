use anyhow::{bail, Result};
use bci_daq::*;
use clap::Parser;
use crossbeam_channel::{never, select, tick, unbounded};
use log::{info, warn, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};
use std::{
    fs::File,
    io::BufRead,
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

const DRIVER_TARGET: &str = "bci_daq::driver";

/// Record an OpenBCI Cyton stream to CSV.
///
/// While running, type an integer and press enter to tag the next sample
/// with a marker; `q` stops the run.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Use the synthetic board regardless of the configuration
    #[arg(long)]
    synthetic: bool,
    /// Run length in seconds
    #[arg(short, long, default_value_t = 60)]
    duration: u64,
    /// Extra tag appended to the log file names
    #[arg(short, long = "tag")]
    tags: Vec<String>,
    /// Do not persist samples from railed batches
    #[arg(long)]
    drop_railed: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut conf = Conf::load(args.config.as_deref())?;
    conf.board.synthetic |= args.synthetic;
    conf.output.tags.extend(args.tags);
    if !conf.board.synthetic {
        bail!("no hardware driver in this build; set board.synthetic = true or pass --synthetic");
    }

    std::fs::create_dir_all(&conf.output.logs_folder)?;
    let paths = LogPaths::from_conf(&conf)?;
    init_logging(&paths)?;

    let layout = BoardLayout::for_board(conf.board.kind, conf.board.wifi, conf.board.synthetic);
    let (markers, correlator) = marker_queue();
    let drop_railed = args.drop_railed;
    let options = BciOptions::new(conf)
        .with_markers(correlator)
        .with_event_names(["Marker"])
        .with_filter(move |sample| !drop_railed || sample.railed_status() == 0);

    let mut acq = Acquisition::connect(options, paths, SyntheticBoard::new(layout), None);
    if !acq.is_connected() {
        bail!("unable to connect to the board; see the debug log");
    }
    acq.start_stream()?;
    info!("Recording {} to {}", acq.layout().label, acq.paths().samples.display());

    let (tx_lines, rx_lines) = unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx_lines.send(line).is_err() {
                break;
            }
        }
    });

    let closed_stdin = never::<String>();
    let mut stdin_open = true;
    let ticker = tick(Duration::from_secs(1));
    let t_begin = Instant::now();
    let run_duration = Duration::from_secs(args.duration);
    loop {
        let finished = select! {
            recv(ticker) -> _ => {
                if t_begin.elapsed() >= run_duration {
                    info!("Run duration reached");
                    true
                } else if !acq.is_collecting() {
                    warn!("Acquisition stopped on its own");
                    true
                } else {
                    false
                }
            }
            recv(if stdin_open { &rx_lines } else { &closed_stdin }) -> line => match line {
                Ok(line) => handle_command(line.trim(), &markers),
                // stdin closed, keep running until the duration elapses
                Err(_) => {
                    stdin_open = false;
                    false
                }
            },
        };
        if finished {
            break;
        }
    }

    let stopped = acq.stop_stream();
    let closed = acq.close();
    info!(
        "Collected {} samples into {}",
        acq.samples_collected(),
        acq.paths().samples.display()
    );
    if !(stopped && closed) {
        bail!("board did not shut down cleanly; see the debug log");
    }
    Ok(())
}

/// Returns true when the run should end.
fn handle_command(cmd: &str, markers: &MarkerSender) -> bool {
    match cmd {
        "q" => true,
        "" => false,
        cmd => {
            match cmd.parse::<i32>() {
                Ok(marker) => {
                    markers.send(vec![marker]);
                }
                Err(_) => warn!("Unknown command {cmd:?}"),
            }
            false
        }
    }
}

/// Terminal at info, everything at debug into the session's debug log, and
/// board driver output into its own log.
fn init_logging(paths: &LogPaths) -> Result<()> {
    let driver_only = ConfigBuilder::new().add_filter_allow_str(DRIVER_TARGET).build();
    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            simplelog::Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(
            LevelFilter::Debug,
            simplelog::Config::default(),
            File::create(&paths.debug)?,
        ),
        WriteLogger::new(LevelFilter::Debug, driver_only, File::create(&paths.driver)?),
    ])?;
    Ok(())
}

use anyhow::Result;
use beetle::{
    configuration::AppConfig,
    drive::{Drivetrain, LinePosture},
    hardware::{AbortFlag, AbortSignal},
    maneuver::{
        CalibrationOutcome, ForwardUntilLineParams, LineFollowParams, ManeuverOutcome,
        ManeuverRunner, TurnParams,
    },
    signal::{ChannelListener, HistoryRecorder},
};
use clap::Parser;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::*;
use tracing_subscriber::filter::LevelFilter;

mod sim;

#[derive(Parser)]
#[command(version, about = "Beetle line follower on a simulated course")]
struct Args {
    /// Config path
    #[arg(long)]
    config: Option<PathBuf>,
    /// How many line-follow laps to drive
    #[arg(long, default_value_t = 2)]
    laps: u32,
    /// Directory the sampled gyro/color histories are written to
    #[arg(long, default_value = "vals")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter("beetle=info")
        .with_max_level(LevelFilter::INFO)
        .init();

    let config = AppConfig::load_config(&args.config)?;

    let abort = AbortFlag::new();
    {
        let abort = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Abort requested");
                abort.request();
            }
        });
    }

    let rig = sim::SimRig::new();
    let drivetrain = Drivetrain::new(Box::new(rig.left_motor()), Box::new(rig.right_motor()));
    let mut runner = ManeuverRunner::new(
        drivetrain,
        Box::new(rig.color_sensor()),
        Box::new(rig.gyro_sensor()),
        Box::new(abort.clone()),
        Duration::from_millis(config.drive.tick_ms),
    );

    let gyro_history = Arc::new(HistoryRecorder::new());
    let col_history = Arc::new(HistoryRecorder::new());
    runner
        .telemetry_mut()
        .gyro
        .register(Arc::clone(&gyro_history) as Arc<dyn ChannelListener>)?;
    runner
        .telemetry_mut()
        .color
        .register(Arc::clone(&col_history) as Arc<dyn ChannelListener>)?;

    // the operator would place the sensor over the line edge here
    let midpoint = runner.sample_color().await?;
    info!("MIDPOINT = {}", midpoint);

    let settle = Duration::from_secs_f64(config.calibration.settle_secs);
    let mut headings = match runner.calibrate_heading(settle).await? {
        CalibrationOutcome::Complete(headings) => headings,
        CalibrationOutcome::Aborted => return Ok(()),
    };
    // one re-check, recalibrate if the gyro drifted right after settling
    if (runner.sample_heading().await? - headings.forward).abs() > config.heading.tolerance {
        warn!("Calibration off, retrying");
        headings = match runner.calibrate_heading(settle).await? {
            CalibrationOutcome::Complete(headings) => headings,
            CalibrationOutcome::Aborted => return Ok(()),
        };
    }

    let mut posture = LinePosture::HugInner;
    for lap in 0..args.laps {
        if abort.is_requested() {
            break;
        }
        info!("Lap {} with posture {:?}", lap + 1, posture);

        let follow = LineFollowParams::from_config(&config.drive, &config.line, midpoint, posture);
        if runner.follow_line(&follow).await? == ManeuverOutcome::Aborted {
            break;
        }

        let next_heading = match posture {
            LinePosture::HugInner => headings.right,
            LinePosture::HugOuter => headings.left,
        };
        let turn = TurnParams::from_config(&config.drive, &config.heading, next_heading);
        if runner.turn_to_heading(&turn).await? == ManeuverOutcome::Aborted {
            break;
        }

        let forward = ForwardUntilLineParams {
            base_speed: config.drive.base_speed,
            desired_heading: next_heading,
            line_value: midpoint,
            gains: config.heading.gains,
        };
        if runner.forward_until_line(&forward).await? == ManeuverOutcome::Aborted {
            break;
        }

        let turn_back = TurnParams::from_config(&config.drive, &config.heading, headings.forward);
        if runner.turn_to_heading(&turn_back).await? == ManeuverOutcome::Aborted {
            break;
        }

        posture = posture.flipped();
    }

    dump_history(&args.log_dir, "gyro_val.txt", &gyro_history.samples())?;
    dump_history(&args.log_dir, "col_val.txt", &col_history.samples())?;
    Ok(())
}

fn dump_history(dir: &Path, file: &str, samples: &[f64]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let line = samples
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    let path = dir.join(file);
    std::fs::write(&path, line)?;
    info!("Wrote {} samples to {:?}", samples.len(), path);
    Ok(())
}

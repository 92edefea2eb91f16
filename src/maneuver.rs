use crate::{
    configuration::{DriveConfig, HeadingConfig, LineConfig},
    drive::{heading_hold_command, line_follow_command, Drivetrain, LinePosture, WheelCommand},
    hardware::{AbortSignal, Sensor},
    pid::PidGains,
    signal::{ChannelListener, SignalChannel, ThresholdLatch, TriggerMode},
};
use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info};

/// Terminal state of a maneuver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManeuverOutcome {
    /// The exit latch fired.
    Triggered,
    /// The abort signal was observed.
    Aborted,
}

/// Gyro readings the robot treats as straight ahead and as the two ±90°
/// turn targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceHeadings {
    pub forward: f64,
    pub left: f64,
    pub right: f64,
}

impl ReferenceHeadings {
    pub fn from_forward(forward: f64) -> Self {
        Self {
            forward,
            left: forward - 90.0,
            right: forward + 90.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationOutcome {
    Complete(ReferenceHeadings),
    Aborted,
}

/// Channels every maneuver publishes its raw samples into, so history
/// recorders and plotting sinks can observe them.
pub struct Telemetry {
    pub gyro: SignalChannel,
    pub color: SignalChannel,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            gyro: SignalChannel::new("gyro"),
            color: SignalChannel::new("col"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LineFollowParams {
    pub base_speed: f64,
    pub posture: LinePosture,
    /// Color value the PID holds the robot on (the line edge midpoint).
    pub midpoint: f64,
    /// Color value that marks the end of the line.
    pub stop_value: f64,
    pub gains: PidGains,
}

impl LineFollowParams {
    pub fn from_config(
        drive: &DriveConfig,
        line: &LineConfig,
        midpoint: f64,
        posture: LinePosture,
    ) -> Self {
        Self {
            base_speed: drive.base_speed,
            posture,
            midpoint,
            stop_value: midpoint + line.stop_offset,
            gains: line.gains,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForwardUntilLineParams {
    pub base_speed: f64,
    /// Gyro value the PID keeps the robot pointed at while driving.
    pub desired_heading: f64,
    /// Color value that counts as finding the line again.
    pub line_value: f64,
    pub gains: PidGains,
}

#[derive(Debug, Clone)]
pub struct TurnParams {
    pub turn_speed: f64,
    pub target_heading: f64,
    /// Heading error magnitude considered on target.
    pub tolerance: f64,
}

impl TurnParams {
    pub fn from_config(drive: &DriveConfig, heading: &HeadingConfig, target: f64) -> Self {
        Self {
            turn_speed: drive.turn_speed,
            target_heading: target,
            tolerance: heading.tolerance,
        }
    }
}

/// Runs the closed loop maneuvers. Owns the drivetrain, both sensors and
/// the abort signal for as long as it lives; exactly one maneuver runs at a
/// time and each runs to its terminal state.
pub struct ManeuverRunner {
    drivetrain: Drivetrain,
    color: Box<dyn Sensor>,
    gyro: Box<dyn Sensor>,
    abort: Box<dyn AbortSignal>,
    tick: Duration,
    telemetry: Telemetry,
}

impl ManeuverRunner {
    pub fn new(
        drivetrain: Drivetrain,
        color: Box<dyn Sensor>,
        gyro: Box<dyn Sensor>,
        abort: Box<dyn AbortSignal>,
        tick: Duration,
    ) -> Self {
        Self {
            drivetrain,
            color,
            gyro,
            abort,
            tick,
            telemetry: Telemetry::default(),
        }
    }

    pub fn telemetry_mut(&mut self) -> &mut Telemetry {
        &mut self.telemetry
    }

    /// One gyro sample, published to telemetry. Used by the sequencing
    /// layer for calibration re-checks and turn targets.
    pub async fn sample_heading(&mut self) -> Result<f64> {
        let heading = self.gyro.read().await?;
        self.telemetry.gyro.set_value(heading);
        Ok(heading)
    }

    /// One color sample, published to telemetry. Used to calibrate the
    /// line midpoint before the first maneuver.
    pub async fn sample_color(&mut self) -> Result<f64> {
        let color = self.color.read().await?;
        self.telemetry.color.set_value(color);
        Ok(color)
    }

    /// Follows the line edge until the color value rises past
    /// `stop_value`.
    pub async fn follow_line(&mut self, params: &LineFollowParams) -> Result<ManeuverOutcome> {
        info!("Following line, posture {:?}", params.posture);
        let mut pid = params.gains.controller(params.midpoint)?;
        let mut channel = SignalChannel::new("line-end");
        let latch = Arc::new(ThresholdLatch::new(
            "line-end",
            params.stop_value,
            TriggerMode::GreaterThanOrEqual,
        ));
        channel.register(Arc::clone(&latch) as Arc<dyn ChannelListener>)?;

        loop {
            let color = self.color.read().await?;
            let heading = self.gyro.read().await?;
            channel.set_value(color);
            self.telemetry.color.set_value(color);
            self.telemetry.gyro.set_value(heading);

            if latch.is_triggered() {
                self.drivetrain.halt().await?;
                info!("End of line reached at col = {}", color);
                return Ok(ManeuverOutcome::Triggered);
            }
            if self.abort.is_requested() {
                self.drivetrain.halt().await?;
                info!("Line follow aborted");
                return Ok(ManeuverOutcome::Aborted);
            }

            let (signal, error) = pid.control_signal(color);
            let command = line_follow_command(params.base_speed, signal, params.posture);
            debug!(
                "col = {}, control = {}, err = {}, L = {}, R = {}",
                color,
                signal,
                error,
                command.left(),
                command.right()
            );
            self.drivetrain.send(command).await?;
            sleep(self.tick).await;
        }
    }

    /// Drives straight along `desired_heading` until the color value drops
    /// to the line again.
    pub async fn forward_until_line(
        &mut self,
        params: &ForwardUntilLineParams,
    ) -> Result<ManeuverOutcome> {
        info!(
            "Moving forward at heading {} until line is found",
            params.desired_heading
        );
        let mut pid = params.gains.controller(params.desired_heading)?;
        let mut channel = SignalChannel::new("line-found");
        let latch = Arc::new(ThresholdLatch::new(
            "line-found",
            params.line_value,
            TriggerMode::LessThanOrEqual,
        ));
        channel.register(Arc::clone(&latch) as Arc<dyn ChannelListener>)?;

        loop {
            let color = self.color.read().await?;
            let heading = self.gyro.read().await?;
            channel.set_value(color);
            self.telemetry.color.set_value(color);
            self.telemetry.gyro.set_value(heading);

            if latch.is_triggered() {
                self.drivetrain.halt().await?;
                info!("Line detected at col = {}", color);
                return Ok(ManeuverOutcome::Triggered);
            }
            if self.abort.is_requested() {
                self.drivetrain.halt().await?;
                info!("Forward drive aborted");
                return Ok(ManeuverOutcome::Aborted);
            }

            let (signal, error) = pid.control_signal(heading);
            let command = heading_hold_command(params.base_speed, signal, error);
            debug!(
                "gyro = {}, col = {}, control = {}, err = {}, L = {}, R = {}",
                heading,
                color,
                signal,
                error,
                command.left(),
                command.right()
            );
            self.drivetrain.send(command).await?;
            sleep(self.tick).await;
        }
    }

    /// One wheel turn toward `target_heading`, exiting once the heading
    /// error magnitude latches below the tolerance.
    pub async fn turn_to_heading(&mut self, params: &TurnParams) -> Result<ManeuverOutcome> {
        info!("Turning to heading {}", params.target_heading);
        let mut channel = SignalChannel::new("heading-error");
        let latch = Arc::new(ThresholdLatch::new(
            "on-target",
            params.tolerance,
            TriggerMode::LessThanOrEqual,
        ));
        channel.register(Arc::clone(&latch) as Arc<dyn ChannelListener>)?;

        loop {
            let heading = self.gyro.read().await?;
            let color = self.color.read().await?;
            let error = params.target_heading - heading;
            channel.set_value(error.abs());
            self.telemetry.color.set_value(color);
            self.telemetry.gyro.set_value(heading);

            if latch.is_triggered() {
                self.drivetrain.halt().await?;
                info!("On target heading at gyro = {}", heading);
                return Ok(ManeuverOutcome::Triggered);
            }
            if self.abort.is_requested() {
                self.drivetrain.halt().await?;
                info!("Turn aborted");
                return Ok(ManeuverOutcome::Aborted);
            }

            // gyro angle grows clockwise: positive error means turn
            // clockwise, driven by the left wheel
            let command = if error > 0.0 {
                WheelCommand::new(params.turn_speed, 0.0)
            } else {
                WheelCommand::new(0.0, params.turn_speed)
            };
            debug!(
                "gyro = {}, err = {}, L = {}, R = {}",
                heading,
                error,
                command.left(),
                command.right()
            );
            self.drivetrain.send(command).await?;
            sleep(self.tick).await;
        }
    }

    /// Lets the gyro settle, then samples the reference heading once and
    /// derives the ±90° turn targets from it. Stateless between attempts,
    /// so the caller may re-invoke it after a failed re-check.
    pub async fn calibrate_heading(&mut self, settle: Duration) -> Result<CalibrationOutcome> {
        info!("Calibrating gyroscope, settling for {:?}", settle);
        let mut remaining = settle;
        while !remaining.is_zero() {
            if self.abort.is_requested() {
                info!("Calibration aborted during settle");
                return Ok(CalibrationOutcome::Aborted);
            }
            let step = if self.tick.is_zero() {
                remaining
            } else {
                remaining.min(self.tick)
            };
            sleep(step).await;
            remaining -= step;
        }
        if self.abort.is_requested() {
            info!("Calibration aborted during settle");
            return Ok(CalibrationOutcome::Aborted);
        }

        let forward = self.gyro.read().await?;
        self.telemetry.gyro.set_value(forward);
        let headings = ReferenceHeadings::from_forward(forward);
        info!(
            "reference heading = {}, left = {}, right = {}",
            headings.forward, headings.left, headings.right
        );
        Ok(CalibrationOutcome::Complete(headings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{AbortFlag, Motor};
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicBool, Ordering},
            Mutex,
        },
    };

    struct ScriptedSensor {
        values: VecDeque<f64>,
        last: f64,
    }

    impl ScriptedSensor {
        fn new(values: &[f64]) -> Self {
            Self {
                values: values.iter().copied().collect(),
                last: *values.last().expect("script must not be empty"),
            }
        }

        fn constant(value: f64) -> Self {
            Self::new(&[value])
        }
    }

    #[async_trait]
    impl Sensor for ScriptedSensor {
        async fn read(&mut self) -> Result<f64> {
            Ok(self.values.pop_front().unwrap_or(self.last))
        }
    }

    #[derive(Clone, Default)]
    struct MotorLog {
        duties: Arc<Mutex<Vec<f64>>>,
        stopped: Arc<AtomicBool>,
    }

    impl MotorLog {
        fn duties(&self) -> Vec<f64> {
            self.duties.lock().unwrap().clone()
        }

        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    struct RecordingMotor {
        log: MotorLog,
    }

    #[async_trait]
    impl Motor for RecordingMotor {
        async fn drive(&mut self, duty: f64) -> Result<()> {
            self.log.duties.lock().unwrap().push(duty);
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.log.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_runner(
        color: ScriptedSensor,
        gyro: ScriptedSensor,
        abort: AbortFlag,
    ) -> (ManeuverRunner, MotorLog, MotorLog) {
        let left = MotorLog::default();
        let right = MotorLog::default();
        let drivetrain = Drivetrain::new(
            Box::new(RecordingMotor { log: left.clone() }),
            Box::new(RecordingMotor { log: right.clone() }),
        );
        let runner = ManeuverRunner::new(
            drivetrain,
            Box::new(color),
            Box::new(gyro),
            Box::new(abort),
            Duration::from_millis(20),
        );
        (runner, left, right)
    }

    fn line_gains() -> PidGains {
        PidGains {
            kp: 0.9,
            ki: 0.0,
            kd: 0.4,
            history: 3,
        }
    }

    fn heading_gains() -> PidGains {
        PidGains {
            kp: 0.8,
            ki: 0.0,
            kd: 0.05,
            history: 10,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn follow_line_stops_when_line_ends() {
        let (mut runner, left, right) = test_runner(
            ScriptedSensor::new(&[60.0, 62.0, 80.0]),
            ScriptedSensor::constant(0.0),
            AbortFlag::new(),
        );
        let params = LineFollowParams {
            base_speed: 20.0,
            posture: LinePosture::HugInner,
            midpoint: 50.0,
            stop_value: 75.0,
            gains: line_gains(),
        };
        let outcome = runner.follow_line(&params).await.unwrap();
        assert_eq!(outcome, ManeuverOutcome::Triggered);
        assert!(left.is_stopped());
        assert!(right.is_stopped());

        // two control ticks, then the halt's neutral command
        let duties = left.duties();
        assert_eq!(duties.len(), 3);
        // first tick: error -10, signal -9, HugInner left = 20 - (-9)
        assert_relative_eq!(duties[0], 29.0);
        assert_relative_eq!(duties[2], 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn follow_line_aborts_without_driving() {
        let abort = AbortFlag::new();
        abort.request();
        let (mut runner, left, _right) = test_runner(
            ScriptedSensor::constant(60.0),
            ScriptedSensor::constant(0.0),
            abort,
        );
        let params = LineFollowParams {
            base_speed: 20.0,
            posture: LinePosture::HugOuter,
            midpoint: 50.0,
            stop_value: 75.0,
            gains: line_gains(),
        };
        let outcome = runner.follow_line(&params).await.unwrap();
        assert_eq!(outcome, ManeuverOutcome::Aborted);
        // only the halt's neutral command ever reached the wheels
        assert_eq!(left.duties(), vec![0.0]);
        assert!(left.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn forward_until_line_triggers_on_dark_line() {
        let (mut runner, left, right) = test_runner(
            ScriptedSensor::new(&[80.0, 80.0, 49.0]),
            ScriptedSensor::constant(0.0),
            AbortFlag::new(),
        );
        let params = ForwardUntilLineParams {
            base_speed: 20.0,
            desired_heading: 0.0,
            line_value: 50.0,
            gains: heading_gains(),
        };
        let outcome = runner.forward_until_line(&params).await.unwrap();
        assert_eq!(outcome, ManeuverOutcome::Triggered);
        // heading error zero: straight both ticks, then the halt
        assert_eq!(left.duties(), vec![20.0, 20.0, 0.0]);
        assert_eq!(right.duties(), vec![20.0, 20.0, 0.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn forward_until_line_steers_back_to_heading() {
        let (mut runner, left, right) = test_runner(
            ScriptedSensor::new(&[80.0, 49.0]),
            ScriptedSensor::constant(5.0),
            AbortFlag::new(),
        );
        let params = ForwardUntilLineParams {
            base_speed: 20.0,
            desired_heading: 0.0,
            line_value: 50.0,
            gains: heading_gains(),
        };
        let outcome = runner.forward_until_line(&params).await.unwrap();
        assert_eq!(outcome, ManeuverOutcome::Triggered);
        // drifted clockwise (error -5, signal -4): left leads to swing back
        assert_relative_eq!(left.duties()[0], 24.0);
        assert_relative_eq!(right.duties()[0], 16.0);
    }

    #[tokio::test(start_paused = true)]
    async fn turn_to_heading_stops_inside_tolerance() {
        let (mut runner, left, right) = test_runner(
            ScriptedSensor::constant(60.0),
            ScriptedSensor::new(&[0.0, 30.0, 60.0, 89.0]),
            AbortFlag::new(),
        );
        let params = TurnParams {
            turn_speed: 30.0,
            target_heading: 90.0,
            tolerance: 2.0,
        };
        let outcome = runner.turn_to_heading(&params).await.unwrap();
        assert_eq!(outcome, ManeuverOutcome::Triggered);
        // clockwise turn is driven by the left wheel alone
        assert_eq!(left.duties(), vec![30.0, 30.0, 30.0, 0.0]);
        assert_eq!(right.duties(), vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn calibration_is_idempotent() {
        let (mut runner, _left, _right) = test_runner(
            ScriptedSensor::constant(60.0),
            ScriptedSensor::constant(12.0),
            AbortFlag::new(),
        );
        let first = runner
            .calibrate_heading(Duration::from_secs(7))
            .await
            .unwrap();
        let second = runner
            .calibrate_heading(Duration::from_secs(7))
            .await
            .unwrap();
        let expected = CalibrationOutcome::Complete(ReferenceHeadings {
            forward: 12.0,
            left: -78.0,
            right: 102.0,
        });
        assert_eq!(first, expected);
        assert_eq!(second, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn calibration_settle_is_cancellable() {
        let abort = AbortFlag::new();
        let remote = abort.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            remote.request();
        });
        let (mut runner, _left, _right) = test_runner(
            ScriptedSensor::constant(60.0),
            ScriptedSensor::constant(0.0),
            abort,
        );
        let started = tokio::time::Instant::now();
        let outcome = runner
            .calibrate_heading(Duration::from_secs(7))
            .await
            .unwrap();
        assert_eq!(outcome, CalibrationOutcome::Aborted);
        assert!(started.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_channels_see_every_tick() {
        let (mut runner, _left, _right) = test_runner(
            ScriptedSensor::new(&[60.0, 80.0]),
            ScriptedSensor::constant(3.0),
            AbortFlag::new(),
        );
        let recorder = Arc::new(crate::signal::HistoryRecorder::new());
        runner
            .telemetry_mut()
            .color
            .register(Arc::clone(&recorder) as Arc<dyn ChannelListener>)
            .unwrap();
        let params = LineFollowParams {
            base_speed: 20.0,
            posture: LinePosture::HugInner,
            midpoint: 50.0,
            stop_value: 75.0,
            gains: line_gains(),
        };
        runner.follow_line(&params).await.unwrap();
        assert_eq!(recorder.samples(), vec![60.0, 80.0]);
    }
}

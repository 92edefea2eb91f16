use crate::hardware::Motor;
use anyhow::Result;
use serde::Deserialize;

/// Legal duty cycle magnitude for either wheel.
pub const MAX_DUTY: f64 = 100.0;

/// Signed duty cycles for the two wheels of a differential drive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelCommand {
    left: f64,
    right: f64,
}

impl WheelCommand {
    pub fn new(left: f64, right: f64) -> WheelCommand {
        WheelCommand { left, right }
    }

    pub fn stopped() -> Self {
        Self {
            left: 0.0,
            right: 0.0,
        }
    }

    pub fn straight(duty: f64) -> Self {
        Self {
            left: duty,
            right: duty,
        }
    }

    pub fn left(&self) -> f64 {
        self.left
    }

    pub fn right(&self) -> f64 {
        self.right
    }
}

/// Which side of the line the robot hugs while following it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum LinePosture {
    /// Inner edge of the left line, robot circulates clockwise.
    HugInner,
    /// Inner edge of the right line, robot circulates counter-clockwise.
    HugOuter,
}

impl LinePosture {
    pub fn flipped(self) -> Self {
        match self {
            LinePosture::HugInner => LinePosture::HugOuter,
            LinePosture::HugOuter => LinePosture::HugInner,
        }
    }
}

/// Steering for line following: a positive error means the robot has to hug
/// the line harder, so the signal speeds up one wheel and slows the other.
pub fn line_follow_command(base: f64, signal: f64, posture: LinePosture) -> WheelCommand {
    let signal = suppress_on_saturation(base, signal);
    match posture {
        LinePosture::HugInner => WheelCommand::new(base - signal, base + signal),
        LinePosture::HugOuter => WheelCommand::new(base + signal, base - signal),
    }
}

/// Steering for heading hold: the sign of the heading error picks which
/// wheel leads.
pub fn heading_hold_command(base: f64, signal: f64, error: f64) -> WheelCommand {
    let signal = suppress_on_saturation(base, signal);
    if error > 0.0 {
        WheelCommand::new(base + signal, base - signal)
    } else if error < 0.0 {
        WheelCommand::new(base - signal, base + signal)
    } else {
        WheelCommand::straight(base)
    }
}

/// A combined actuation at or beyond the duty limit zeroes the signal for
/// this tick instead of clamping. The robot coasts straight for a tick
/// rather than slamming a wheel into reverse at extreme error.
fn suppress_on_saturation(base: f64, signal: f64) -> f64 {
    if (base + signal).abs() >= MAX_DUTY {
        0.0
    } else {
        signal
    }
}

/// The pair of drive motors, addressed as one unit the way the maneuvers
/// see them.
pub struct Drivetrain {
    left: Box<dyn Motor>,
    right: Box<dyn Motor>,
}

impl Drivetrain {
    pub fn new(left: Box<dyn Motor>, right: Box<dyn Motor>) -> Self {
        Self { left, right }
    }

    pub async fn send(&mut self, command: WheelCommand) -> Result<()> {
        self.left.drive(command.left()).await?;
        self.right.drive(command.right()).await?;
        Ok(())
    }

    /// Stops both wheels and leaves them on a neutral setpoint.
    pub async fn halt(&mut self) -> Result<()> {
        self.send(WheelCommand::stopped()).await?;
        self.left.stop().await?;
        self.right.stop().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn hug_inner_steers_with_signal() {
        let command = line_follow_command(20.0, 5.0, LinePosture::HugInner);
        assert_relative_eq!(command.left(), 15.0);
        assert_relative_eq!(command.right(), 25.0);
    }

    #[test]
    fn hug_outer_mirrors_inner() {
        let command = line_follow_command(20.0, 5.0, LinePosture::HugOuter);
        assert_relative_eq!(command.left(), 25.0);
        assert_relative_eq!(command.right(), 15.0);
    }

    #[test]
    fn saturated_signal_is_suppressed_not_clamped() {
        // 90 + 20 = 110 over the limit: coast straight this tick
        let command = line_follow_command(90.0, 20.0, LinePosture::HugInner);
        assert_relative_eq!(command.left(), 90.0);
        assert_relative_eq!(command.right(), 90.0);
    }

    #[test]
    fn saturation_also_applies_in_reverse() {
        let command = line_follow_command(-90.0, -15.0, LinePosture::HugOuter);
        assert_relative_eq!(command.left(), -90.0);
        assert_relative_eq!(command.right(), -90.0);
    }

    #[test]
    fn heading_hold_positive_error_leads_left() {
        let command = heading_hold_command(20.0, 4.0, 5.0);
        assert_relative_eq!(command.left(), 24.0);
        assert_relative_eq!(command.right(), 16.0);
    }

    #[test]
    fn heading_hold_negative_error_leads_right() {
        let command = heading_hold_command(20.0, -4.0, -5.0);
        assert_relative_eq!(command.left(), 24.0);
        assert_relative_eq!(command.right(), 16.0);
    }

    #[test]
    fn heading_hold_zero_error_runs_straight() {
        let command = heading_hold_command(20.0, 3.0, 0.0);
        assert_eq!(command, WheelCommand::straight(20.0));
    }
}

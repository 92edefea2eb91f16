use serde::Deserialize;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PidError {
    #[error("error history capacity must be at least 1")]
    ZeroCapacity,
}

/// Gains and window size for one control loop, loaded from configuration.
#[derive(Deserialize, Debug, Clone, Copy)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub history: usize,
}

impl PidGains {
    pub fn controller(&self, setpoint: f64) -> Result<PidController, PidError> {
        PidController::new(self.kp, self.ki, self.kd, setpoint, self.history)
    }
}

/// PID loop filter over a sliding window of past errors.
///
/// The integral term is the sum of the errors currently in the window, so a
/// finite window doubles as anti-windup. There is no reset; construct a
/// fresh controller per maneuver.
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: f64,
    capacity: usize,
    errors: VecDeque<f64>,
    integral: f64,
}

impl PidController {
    pub fn new(
        kp: f64,
        ki: f64,
        kd: f64,
        setpoint: f64,
        capacity: usize,
    ) -> Result<Self, PidError> {
        if capacity == 0 {
            return Err(PidError::ZeroCapacity);
        }
        Ok(Self {
            kp,
            ki,
            kd,
            setpoint,
            capacity,
            errors: VecDeque::with_capacity(capacity),
            integral: 0.0,
        })
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// Feeds one measurement through the filter and returns
    /// `(signal, error)`.
    ///
    /// The signal is not clamped here. Saturation of the combined actuation
    /// is the drive policy's call, see [`crate::drive`].
    pub fn control_signal(&mut self, measurement: f64) -> (f64, f64) {
        let error = self.setpoint - measurement;
        if self.errors.len() == self.capacity {
            if let Some(evicted) = self.errors.pop_front() {
                self.integral -= evicted;
            }
        }
        self.errors.push_back(error);
        self.integral += error;

        let derivative = if self.errors.len() >= 2 {
            error - self.errors[self.errors.len() - 2]
        } else {
            0.0
        };

        let signal = self.kp * error + self.ki * self.integral + self.kd * derivative;
        (signal, error)
    }
}

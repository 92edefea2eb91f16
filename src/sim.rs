//! Deterministic stand-in for the robot hardware so the bin can run on a
//! desk. The course repeats a line segment followed by a bright gap; the
//! gyro integrates the wheel differential.

use anyhow::Result;
use async_trait::async_trait;
use beetle::{
    drive::MAX_DUTY,
    hardware::{Motor, Sensor},
};
use std::sync::{Arc, Mutex};

/// Yaw change in degrees per duty unit of wheel differential per tick.
const DUTY_TO_DEG: f64 = 0.05;
/// Distance units per duty unit of average wheel speed per tick.
const DUTY_TO_DIST: f64 = 0.005;
const LINE_LENGTH: f64 = 4.0;
const GAP_LENGTH: f64 = 1.5;
const MIDPOINT: f64 = 50.0;
const GAP_REFLECTIVITY: f64 = 90.0;

#[derive(Default)]
struct SimState {
    left_duty: f64,
    right_duty: f64,
    heading: f64,
    distance: f64,
}

impl SimState {
    /// Advances the world by one tick worth of motion.
    fn step(&mut self) {
        self.heading += (self.left_duty - self.right_duty) * DUTY_TO_DEG;
        self.distance += (self.left_duty + self.right_duty) / 2.0 * DUTY_TO_DIST;
    }

    fn reflectivity(&self) -> f64 {
        let phase = self.distance.rem_euclid(LINE_LENGTH + GAP_LENGTH);
        if phase < LINE_LENGTH {
            // wobble around the edge midpoint while on the line
            MIDPOINT + 2.0 * (self.distance * 3.0).sin()
        } else {
            GAP_REFLECTIVITY
        }
    }
}

#[derive(Clone, Default)]
pub struct SimRig {
    state: Arc<Mutex<SimState>>,
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

impl SimRig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn left_motor(&self) -> impl Motor {
        SimMotor {
            state: Arc::clone(&self.state),
            side: Side::Left,
        }
    }

    pub fn right_motor(&self) -> impl Motor {
        SimMotor {
            state: Arc::clone(&self.state),
            side: Side::Right,
        }
    }

    pub fn gyro_sensor(&self) -> impl Sensor {
        SimGyro {
            state: Arc::clone(&self.state),
        }
    }

    pub fn color_sensor(&self) -> impl Sensor {
        SimColor {
            state: Arc::clone(&self.state),
        }
    }
}

struct SimMotor {
    state: Arc<Mutex<SimState>>,
    side: Side,
}

#[async_trait]
impl Motor for SimMotor {
    async fn drive(&mut self, duty: f64) -> Result<()> {
        // the actuator boundary saturates, the core never clamps
        let duty = duty.clamp(-MAX_DUTY, MAX_DUTY);
        let mut state = self.state.lock().unwrap();
        match self.side {
            Side::Left => state.left_duty = duty,
            Side::Right => state.right_duty = duty,
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match self.side {
            Side::Left => state.left_duty = 0.0,
            Side::Right => state.right_duty = 0.0,
        }
        Ok(())
    }
}

/// The gyro is read once per control tick, so it doubles as the clock that
/// advances the simulated world.
struct SimGyro {
    state: Arc<Mutex<SimState>>,
}

#[async_trait]
impl Sensor for SimGyro {
    async fn read(&mut self) -> Result<f64> {
        let mut state = self.state.lock().unwrap();
        state.step();
        Ok(state.heading)
    }
}

struct SimColor {
    state: Arc<Mutex<SimState>>,
}

#[async_trait]
impl Sensor for SimColor {
    async fn read(&mut self) -> Result<f64> {
        let state = self.state.lock().unwrap();
        Ok(state.reflectivity())
    }
}

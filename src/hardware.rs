use anyhow::Result;
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// One scalar-valued sensor (color reflectivity, gyro heading, ...).
///
/// Reads are idempotent from the core's point of view; the value may be
/// stale between calls at whatever rate the hardware refreshes.
#[async_trait]
pub trait Sensor: Send {
    async fn read(&mut self) -> Result<f64>;
}

/// One drive motor. `drive` takes a signed duty cycle; implementations
/// saturate or reject values outside ±100 at this boundary, the control
/// core never clamps.
#[async_trait]
pub trait Motor: Send {
    async fn drive(&mut self, duty: f64) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
}

/// Cooperative abort, polled once per control tick.
pub trait AbortSignal: Send + Sync {
    fn is_requested(&self) -> bool;
}

/// Clonable abort flag that can be shared with a signal handler or another
/// task.
#[derive(Clone, Default)]
pub struct AbortFlag {
    requested: Arc<AtomicBool>,
}

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }
}

impl AbortSignal for AbortFlag {
    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

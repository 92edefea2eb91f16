use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("listener is already registered on channel {0:?}")]
    AlreadyRegistered(String),
    #[error("listener is not registered on channel {0:?}")]
    NotRegistered(String),
}

/// Anything that wants to observe a [`SignalChannel`].
///
/// Listeners are notified synchronously from `set_value` so they must not
/// touch the channel they are registered on from inside the callback.
pub trait ChannelListener: Send + Sync {
    fn on_update(&self, value: f64);
}

/// Named holder of the most recent sample from one sensor.
///
/// Every `set_value` fans the new value out to the registered listeners in
/// registration order. The channel owns its listener list for the duration
/// of a maneuver; callers keep their own `Arc` clones to query listener
/// state afterwards.
pub struct SignalChannel {
    name: String,
    value: Option<f64>,
    listeners: Vec<Arc<dyn ChannelListener>>,
}

impl SignalChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            listeners: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last stored value, `None` until the first `set_value`.
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Adds a listener. Listener identity is by instance, so the same
    /// `Arc` may not be registered twice while two equally configured
    /// latches may coexist.
    pub fn register(&mut self, listener: Arc<dyn ChannelListener>) -> Result<(), SignalError> {
        if self.listeners.iter().any(|known| same_listener(known, &listener)) {
            return Err(SignalError::AlreadyRegistered(self.name.clone()));
        }
        self.listeners.push(listener);
        Ok(())
    }

    pub fn unregister(&mut self, listener: &Arc<dyn ChannelListener>) -> Result<(), SignalError> {
        let index = self
            .listeners
            .iter()
            .position(|known| same_listener(known, listener))
            .ok_or_else(|| SignalError::NotRegistered(self.name.clone()))?;
        self.listeners.remove(index);
        Ok(())
    }

    /// Stores `value` and notifies every listener with it, in registration
    /// order.
    pub fn set_value(&mut self, value: f64) {
        self.value = Some(value);
        trace!("{} update = {}", self.name, value);
        for listener in &self.listeners {
            listener.on_update(value);
        }
    }
}

fn same_listener(a: &Arc<dyn ChannelListener>, b: &Arc<dyn ChannelListener>) -> bool {
    // compare data pointers only, the vtable pointer is not stable enough
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Which direction a value has to cross the goal to trigger a latch.
///
/// Both modes compare the observed value against the goal:
/// `LessThanOrEqual` triggers on `value <= goal`, `GreaterThanOrEqual` on
/// `value >= goal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    LessThanOrEqual,
    GreaterThanOrEqual,
}

/// Latches `true` the first time the observed value crosses the goal and
/// stays triggered for the rest of its lifetime.
pub struct ThresholdLatch {
    name: String,
    goal: f64,
    mode: TriggerMode,
    triggered: AtomicBool,
}

impl ThresholdLatch {
    pub fn new(name: impl Into<String>, goal: f64, mode: TriggerMode) -> Self {
        Self {
            name: name.into(),
            goal,
            mode,
            triggered: AtomicBool::new(false),
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl ChannelListener for ThresholdLatch {
    fn on_update(&self, value: f64) {
        if self.is_triggered() {
            return;
        }
        let crossed = match self.mode {
            TriggerMode::LessThanOrEqual => value <= self.goal,
            TriggerMode::GreaterThanOrEqual => value >= self.goal,
        };
        if crossed {
            self.triggered.store(true, Ordering::SeqCst);
            debug!("{} triggered at {}", self.name, value);
        }
    }
}

/// Collects every value pushed into a channel so the history can be
/// persisted after the maneuver finishes.
#[derive(Default)]
pub struct HistoryRecorder {
    samples: Mutex<Vec<f64>>,
}

impl HistoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<f64> {
        self.samples.lock().unwrap().clone()
    }
}

impl ChannelListener for HistoryRecorder {
    fn on_update(&self, value: f64) {
        self.samples.lock().unwrap().push(value);
    }
}

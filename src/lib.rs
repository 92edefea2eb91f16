pub mod configuration;
pub mod drive;
pub mod hardware;
pub mod maneuver;
pub mod pid;
pub mod signal;

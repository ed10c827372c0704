pub mod daemon;

pub use daemon::spawn_drain_daemon;

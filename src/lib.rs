pub mod app;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod demand;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod notify;
pub mod probe;
pub mod state;
pub mod store;

pub use app::{Backends, ComponentState, OndemandOrchestrator, ShutdownReason};
pub use clock::Clock;
pub use cluster::{wait_for_count, ClusterController, Convergence, TaskCount};
pub use config::ControllerConfig;
pub use demand::{DemandSignal, DemandSource};
pub use error::{ControllerError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, LifecycleEvent, LifecycleEventKind};
pub use lifecycle::{
    LaunchOutcome, Launcher, LifecycleTimings, RecoveryOutcome, ShutdownReport, WatchOutcome,
    Watchdog,
};
pub use notify::{NotificationChannel, NotificationDispatcher};
pub use probe::{ActivityProbe, ProbeReading};
pub use state::{ActivityRecord, DesiredState, StateRecord, TransitionLock};
pub use store::{StateCoordinator, StateStore};

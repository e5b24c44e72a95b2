/// Component lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Why the controller process is exiting
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
}

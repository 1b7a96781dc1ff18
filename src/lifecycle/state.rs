//! The worker's top-level state machine.

/// Worker lifecycle states. `Error` is absorbing for the currently loaded
/// model only; an explicit `unload_model` resets the worker to `Idle`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle = 0,
    Loading = 1,
    Ready = 2,
    Working = 3,
    Unloading = 4,
    Error = 5,
}

impl WorkerState {
    pub fn as_status_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Loading => "loading",
            WorkerState::Ready => "healthy",
            WorkerState::Working => "healthy",
            WorkerState::Unloading => "unloading",
            WorkerState::Error => "error",
        }
    }

    pub fn as_state_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Loading => "loading",
            WorkerState::Ready => "ready",
            WorkerState::Working => "working",
            WorkerState::Unloading => "unloading",
            WorkerState::Error => "error",
        }
    }

    /// Validate a proposed transition against the worker's state machine.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Idle, Loading)
                | (Loading, Ready)
                | (Loading, Error)
                | (Ready, Working)
                | (Working, Ready)
                | (Working, Working)
                | (Ready, Unloading)
                | (Working, Unloading)
                | (Error, Unloading)
                | (Unloading, Idle)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_cycle_is_valid() {
        assert!(WorkerState::Idle.can_transition_to(WorkerState::Loading));
        assert!(WorkerState::Loading.can_transition_to(WorkerState::Ready));
        assert!(WorkerState::Ready.can_transition_to(WorkerState::Working));
        assert!(WorkerState::Working.can_transition_to(WorkerState::Ready));
    }

    #[test]
    fn error_can_only_escape_via_unload() {
        assert!(WorkerState::Error.can_transition_to(WorkerState::Unloading));
        assert!(!WorkerState::Error.can_transition_to(WorkerState::Ready));
        assert!(!WorkerState::Error.can_transition_to(WorkerState::Loading));
    }

    #[test]
    fn idle_cannot_jump_to_working() {
        assert!(!WorkerState::Idle.can_transition_to(WorkerState::Working));
    }
}

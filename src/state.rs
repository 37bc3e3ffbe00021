use crate::{RenewalError, StartupMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Idle,
    Renewing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Start,
    /// Start hooks ran and the timer is armed.
    Armed,
    TimerFired,
    ManualTrigger,
    ReadinessSignal,
    AttemptFinished,
    Stop,
}

/// Lifecycle of the renewal service. All state changes go through
/// [StateMachine::apply].
#[derive(Debug, Clone)]
pub(crate) struct StateMachine {
    state: ServiceState,
    mode: StartupMode,
    /// Set once the first timer firing happened since the last start.
    fired: bool,
    triggered: bool,
    ready: bool,
    /// The current attempt was started while stopped and returns there.
    one_off: bool,
}

impl StateMachine {
    pub(crate) fn new(mode: StartupMode) -> Self {
        Self {
            state: ServiceState::Stopped,
            mode,
            fired: false,
            triggered: false,
            ready: false,
            one_off: false,
        }
    }

    pub(crate) fn state(&self) -> ServiceState {
        self.state
    }

    /// Whether the startup mode lets the timer fire.
    pub(crate) fn released(&self) -> bool {
        match self.mode {
            StartupMode::Immediate => true,
            StartupMode::Delayed => self.ready,
            StartupMode::Manual => self.triggered,
        }
    }

    pub(crate) fn apply(&mut self, trigger: Trigger) -> Result<ServiceState, RenewalError> {
        use ServiceState::*;
        let next = match (self.state, trigger) {
            (Stopped, Trigger::Start) => {
                self.fired = false;
                self.triggered = false;
                self.one_off = false;
                Starting
            }
            (Starting, Trigger::Armed) => Idle,
            (Idle, Trigger::TimerFired) if self.released() => {
                self.fired = true;
                Renewing
            }
            (Stopped, Trigger::TimerFired) => {
                self.one_off = true;
                Renewing
            }
            (Starting | Idle, Trigger::ManualTrigger)
                if self.mode == StartupMode::Manual && !self.fired =>
            {
                self.triggered = true;
                self.state
            }
            (state, Trigger::ReadinessSignal) => {
                if self.mode == StartupMode::Delayed {
                    self.ready = true;
                } else {
                    log::debug!("ignoring readiness signal in {:?} startup mode", self.mode);
                }
                state
            }
            (Renewing, Trigger::AttemptFinished) => match std::mem::take(&mut self.one_off) {
                true => Stopped,
                false => Idle,
            },
            // attempt outlived a stop
            (state, Trigger::AttemptFinished) => state,
            (_, Trigger::Stop) => {
                self.one_off = false;
                Stopped
            }
            (state, trigger) => return Err(RenewalError::InvalidTransition { state, trigger }),
        };
        if next != self.state {
            log::trace!("{:?} -> {:?} on {:?}", self.state, next, trigger);
        }
        self.state = next;
        Ok(next)
    }
}

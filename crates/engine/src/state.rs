//! Recorder lifecycle states and single-settlement request slots.

use castd_common::error::CastResult;
use tokio::sync::oneshot;

/// Compositor-side capture session lifecycle. Advances monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Init,
    Active,
    Stopped,
}

/// Media pipeline lifecycle. Advances monotonically; `Error` is absorbing
/// and unreachable from `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Playing,
    Flushing,
    Stopped,
    Error,
}

impl PipelineState {
    fn rank(self) -> u8 {
        match self {
            PipelineState::Init => 0,
            PipelineState::Playing => 1,
            PipelineState::Flushing => 2,
            PipelineState::Stopped => 3,
            PipelineState::Error => 4,
        }
    }

    fn can_advance(self, to: PipelineState) -> bool {
        match (self, to) {
            (PipelineState::Error, to) => to == PipelineState::Error,
            (PipelineState::Stopped, PipelineState::Error) => false,
            (from, to) => from.rank() <= to.rank(),
        }
    }
}

/// Combined session × pipeline state of one recorder.
///
/// Transitions must be monotone in both components; anything else is a bug
/// in the control loop and is refused rather than applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderState {
    pub session: SessionState,
    pub pipeline: PipelineState,
}

impl RecorderState {
    pub const INITIAL: Self = Self {
        session: SessionState::Init,
        pipeline: PipelineState::Init,
    };

    /// Whether the recorder is finished: the session is gone and the
    /// pipeline either finalized its output or died.
    pub fn is_terminal(&self) -> bool {
        self.session == SessionState::Stopped
            && matches!(self.pipeline, PipelineState::Stopped | PipelineState::Error)
    }

    /// Attempts a transition, refusing anything that would regress either
    /// component. Returns whether the transition was applied.
    pub fn advance(&mut self, session: SessionState, pipeline: PipelineState) -> bool {
        let next = RecorderState { session, pipeline };
        if self.session > session || !self.pipeline.can_advance(pipeline) {
            tracing::error!(from = ?self, to = ?next, "Refusing illegal state transition");
            return false;
        }
        *self = next;
        true
    }
}

/// A pending start or stop request that settles exactly once.
///
/// Settlement consumes the reply channel, so whichever code path settles
/// first wins and every later attempt is a no-op. This is what makes the
/// bail-out path idempotent with respect to already-delivered results.
pub struct Pending {
    label: &'static str,
    reply: Option<oneshot::Sender<CastResult<()>>>,
}

impl Pending {
    pub fn empty(label: &'static str) -> Self {
        Self { label, reply: None }
    }

    /// Arms the slot with a reply channel. The caller must not arm an
    /// already-armed slot; the previous requester would never hear back.
    pub fn arm(&mut self, reply: oneshot::Sender<CastResult<()>>) {
        debug_assert!(self.reply.is_none(), "pending {} armed twice", self.label);
        self.reply = Some(reply);
    }

    pub fn is_armed(&self) -> bool {
        self.reply.is_some()
    }

    /// Delivers `result` to the requester if the slot is still armed.
    /// Returns whether this call performed the settlement.
    pub fn settle(&mut self, result: CastResult<()>) -> bool {
        match self.reply.take() {
            Some(reply) => {
                if reply.send(result).is_err() {
                    tracing::debug!(request = self.label, "Requester went away before settlement");
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castd_common::error::CastError;

    #[test]
    fn session_states_are_ordered() {
        assert!(SessionState::Init < SessionState::Active);
        assert!(SessionState::Active < SessionState::Stopped);
    }

    #[test]
    fn pipeline_advances_forward_only() {
        assert!(PipelineState::Init.can_advance(PipelineState::Playing));
        assert!(PipelineState::Playing.can_advance(PipelineState::Flushing));
        assert!(PipelineState::Flushing.can_advance(PipelineState::Stopped));
        assert!(!PipelineState::Playing.can_advance(PipelineState::Init));
        assert!(!PipelineState::Stopped.can_advance(PipelineState::Flushing));
    }

    #[test]
    fn pipeline_error_is_absorbing_and_unreachable_from_stopped() {
        assert!(PipelineState::Init.can_advance(PipelineState::Error));
        assert!(PipelineState::Playing.can_advance(PipelineState::Error));
        assert!(PipelineState::Flushing.can_advance(PipelineState::Error));
        assert!(!PipelineState::Stopped.can_advance(PipelineState::Error));
        assert!(PipelineState::Error.can_advance(PipelineState::Error));
        assert!(!PipelineState::Error.can_advance(PipelineState::Stopped));
    }

    #[test]
    fn combined_state_refuses_regressions() {
        let mut state = RecorderState {
            session: SessionState::Active,
            pipeline: PipelineState::Playing,
        };
        assert!(!state.advance(SessionState::Init, PipelineState::Playing));
        assert_eq!(state.session, SessionState::Active);

        assert!(state.advance(SessionState::Active, PipelineState::Flushing));
        assert!(state.advance(SessionState::Stopped, PipelineState::Stopped));
        assert!(state.is_terminal());
    }

    #[test]
    fn error_terminal_state_is_recognized() {
        let mut state = RecorderState::INITIAL;
        assert!(!state.is_terminal());
        assert!(state.advance(SessionState::Stopped, PipelineState::Error));
        assert!(state.is_terminal());
    }

    #[test]
    fn pending_settles_exactly_once() {
        let (reply_tx, mut reply_rx) = oneshot::channel();
        let mut pending = Pending::empty("start");
        assert!(!pending.is_armed());

        pending.arm(reply_tx);
        assert!(pending.is_armed());
        assert!(pending.settle(Ok(())));
        assert!(!pending.settle(Err(CastError::recorder("too late"))));
        assert!(!pending.is_armed());
        assert!(matches!(reply_rx.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn settling_an_empty_slot_is_a_no_op() {
        let mut pending = Pending::empty("stop");
        assert!(!pending.settle(Ok(())));
    }
}

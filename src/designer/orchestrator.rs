use crate::designer::analysis::{RoomAnalysis, RoomContext};
use crate::designer::context::{ContextError, ContextStore};

/// Where a session currently sits in the upload → analyze → select →
/// generate → complete flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Analyzing,
    Selecting,
    Generating,
    Complete,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Analyzing => "analyzing",
            SessionPhase::Selecting => "selecting",
            SessionPhase::Generating => "generating",
            SessionPhase::Complete => "complete",
        }
    }
}

/// What a `Generating` phase was dispatched for; decides which stable phase
/// a failure falls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationKind {
    Initial,
    Refinement,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("a collaborator call is already in flight for this session")]
    Busy,
    #[error("operation is not allowed while the session is {phase:?}")]
    InvalidPhase { phase: SessionPhase },
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// The session state machine. Pure transitions, no I/O: the async session
/// driver calls the collaborators and feeds results back in, so any
/// presentation layer (or a test) can drive the same machine.
///
/// The original image and analysis recorded here are what every refinement
/// re-anchors to; intermediate edited images are display state only.
#[derive(Debug)]
pub struct Orchestrator {
    phase: SessionPhase,
    store: ContextStore,
    original_image: Option<Vec<u8>>,
    current_image: Option<Vec<u8>>,
    generation_kind: Option<GenerationKind>,
}

impl Orchestrator {
    pub fn new(room_context: RoomContext) -> Self {
        Orchestrator {
            phase: SessionPhase::Idle,
            store: ContextStore::new(room_context),
            original_image: None,
            current_image: None,
            generation_kind: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ContextStore {
        &mut self.store
    }

    pub fn original_image(&self) -> Option<&[u8]> {
        self.original_image.as_deref()
    }

    pub fn current_image(&self) -> Option<&[u8]> {
        self.current_image.as_deref()
    }

    fn reject_in_flight(&self) -> Result<(), OrchestratorError> {
        match self.phase {
            SessionPhase::Analyzing | SessionPhase::Generating => Err(OrchestratorError::Busy),
            _ => Ok(()),
        }
    }

    /// Accepted upload: `Idle -> Analyzing`.
    pub fn begin_analysis(&mut self, image: Vec<u8>) -> Result<(), OrchestratorError> {
        self.reject_in_flight()?;
        if self.phase != SessionPhase::Idle {
            return Err(OrchestratorError::InvalidPhase { phase: self.phase });
        }
        self.original_image = Some(image);
        self.phase = SessionPhase::Analyzing;
        Ok(())
    }

    /// `Analyzing -> Selecting`; records the immutable baseline.
    pub fn analysis_succeeded(&mut self, analysis: RoomAnalysis) -> Result<(), OrchestratorError> {
        if self.phase != SessionPhase::Analyzing {
            return Err(OrchestratorError::InvalidPhase { phase: self.phase });
        }
        self.store.record_analysis(analysis)?;
        self.phase = SessionPhase::Selecting;
        Ok(())
    }

    /// `Analyzing -> Idle`; no partial state is retained.
    pub fn analysis_failed(&mut self) -> Result<(), OrchestratorError> {
        if self.phase != SessionPhase::Analyzing {
            return Err(OrchestratorError::InvalidPhase { phase: self.phase });
        }
        self.original_image = None;
        self.phase = SessionPhase::Idle;
        Ok(())
    }

    /// `Selecting -> Generating` (initial) or `Complete -> Generating`
    /// (chat-triggered refinement). Rejects overlapping dispatches.
    pub fn begin_generation(&mut self) -> Result<GenerationKind, OrchestratorError> {
        self.reject_in_flight()?;
        let kind = match self.phase {
            SessionPhase::Selecting => GenerationKind::Initial,
            SessionPhase::Complete => GenerationKind::Refinement,
            phase => return Err(OrchestratorError::InvalidPhase { phase }),
        };
        self.generation_kind = Some(kind);
        self.phase = SessionPhase::Generating;
        Ok(kind)
    }

    /// `Generating -> Complete` with the new displayed image.
    pub fn generation_succeeded(&mut self, image: Vec<u8>) -> Result<(), OrchestratorError> {
        if self.phase != SessionPhase::Generating {
            return Err(OrchestratorError::InvalidPhase { phase: self.phase });
        }
        self.current_image = Some(image);
        self.generation_kind = None;
        self.phase = SessionPhase::Complete;
        Ok(())
    }

    /// Failure falls back to the phase the dispatch came from: `Selecting`
    /// for an initial transformation, `Complete` (previous image intact) for
    /// a refinement. Never `Idle`: user-visible work is not lost.
    pub fn generation_failed(&mut self) -> Result<(), OrchestratorError> {
        if self.phase != SessionPhase::Generating {
            return Err(OrchestratorError::InvalidPhase { phase: self.phase });
        }
        self.phase = match self.generation_kind.take() {
            Some(GenerationKind::Initial) | None => SessionPhase::Selecting,
            Some(GenerationKind::Refinement) => SessionPhase::Complete,
        };
        Ok(())
    }

    /// Explicit reset from any state: all session data is discarded.
    pub fn reset(&mut self) {
        let room_context = self.store.room_context();
        *self = Orchestrator::new(room_context);
    }
}

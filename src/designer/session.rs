use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::designer::analysis::{RoomAnalysis, RoomContext};
use crate::designer::collaborator::{
    AnalysisCollaborator, ChatCollaborator, CollaboratorError, EditCollaborator,
};
use crate::designer::context::{ChatEntry, ChatRole, ContextError};
use crate::designer::director::Director;
use crate::designer::orchestrator::{Orchestrator, OrchestratorError, SessionPhase};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("the session was reset while a collaborator call was in flight")]
    Cancelled,
    #[error("the session has no uploaded image to work from")]
    NoBaseImage,
}

struct Inner {
    orchestrator: Orchestrator,
    /// Bumped on every reset. A collaborator result whose captured epoch no
    /// longer matches is discarded instead of mutating state.
    epoch: u64,
}

/// One user's in-memory session: the orchestrator state machine behind a
/// lock that is never held across a collaborator await.
pub struct Session {
    id: Uuid,
    inner: Mutex<Inner>,
}

impl Session {
    pub fn new(room_context: RoomContext) -> Self {
        Session {
            id: Uuid::new_v4(),
            inner: Mutex::new(Inner {
                orchestrator: Orchestrator::new(room_context),
                epoch: 0,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().orchestrator.phase()
    }

    pub fn analysis(&self) -> Option<RoomAnalysis> {
        self.inner.lock().orchestrator.store().analysis().cloned()
    }

    pub fn current_image(&self) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .orchestrator
            .current_image()
            .map(<[u8]>::to_vec)
    }

    /// Explicit reset: discards all session data and invalidates any
    /// in-flight collaborator call.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.orchestrator.reset();
        inner.epoch += 1;
    }
}

/// Upload flow: `Idle -> Analyzing -> Selecting` (or back to `Idle` on
/// failure, retaining nothing).
pub async fn run_analysis(
    session: &Session,
    analyzer: &dyn AnalysisCollaborator,
    image: Vec<u8>,
) -> Result<RoomAnalysis, SessionError> {
    let (epoch, room_context) = {
        let mut inner = session.inner.lock();
        inner.orchestrator.begin_analysis(image.clone())?;
        (inner.epoch, inner.orchestrator.store().room_context())
    };

    let result = analyzer.analyze(&image, room_context).await;

    let mut inner = session.inner.lock();
    if inner.epoch != epoch {
        return Err(SessionError::Cancelled);
    }
    match result {
        Ok(analysis) => {
            inner.orchestrator.analysis_succeeded(analysis.clone())?;
            Ok(analysis)
        }
        Err(err) => {
            inner.orchestrator.analysis_failed()?;
            Err(SessionError::Collaborator(err))
        }
    }
}

/// Preset/custom-prompt transformation. Always anchored to the original
/// uploaded image; the instruction goes through the Director's preset path,
/// which bypasses intent classification.
pub async fn run_redesign(
    session: &Session,
    director: &Director,
    editor: &dyn EditCollaborator,
    prompt: &str,
) -> Result<Vec<u8>, SessionError> {
    let instruction = director.preset_instruction(prompt);

    let (epoch, base_image) = {
        let mut inner = session.inner.lock();
        let base = inner
            .orchestrator
            .original_image()
            .map(<[u8]>::to_vec)
            .ok_or(SessionError::NoBaseImage)?;
        inner.orchestrator.begin_generation()?;
        (inner.epoch, base)
    };

    let result = editor.edit(&base_image, &instruction).await;

    let mut inner = session.inner.lock();
    if inner.epoch != epoch {
        return Err(SessionError::Cancelled);
    }
    match result {
        Ok(image) => {
            inner.orchestrator.generation_succeeded(image.clone())?;
            Ok(image)
        }
        Err(err) => {
            inner.orchestrator.generation_failed()?;
            Err(SessionError::Collaborator(err))
        }
    }
}

#[derive(Debug)]
pub struct ChatOutcome {
    pub reply: String,
    pub edited_image: Option<Vec<u8>>,
    /// The composed instruction behind `edited_image`, for the project log.
    pub instruction: Option<String>,
    /// Present when the Director dispatched an edit and the collaborator
    /// failed; the session keeps its previous image and stays retryable.
    pub edit_error: Option<CollaboratorError>,
}

/// Chat turn: conversational replies leave the phase untouched; a validated
/// edit directive drives `-> Generating -> Complete`, re-anchored to the
/// original uploaded image and the original analysis.
pub async fn run_chat(
    session: &Session,
    director: &Director,
    chat: &dyn ChatCollaborator,
    editor: &dyn EditCollaborator,
    user_message: &str,
) -> Result<ChatOutcome, SessionError> {
    let (epoch, store_snapshot, displayed_image) = {
        let mut inner = session.inner.lock();
        match inner.orchestrator.phase() {
            SessionPhase::Analyzing | SessionPhase::Generating => {
                return Err(OrchestratorError::Busy.into());
            }
            SessionPhase::Idle => {
                return Err(SessionError::NoBaseImage);
            }
            SessionPhase::Selecting | SessionPhase::Complete => {}
        }
        let displayed = inner
            .orchestrator
            .current_image()
            .or_else(|| inner.orchestrator.original_image())
            .map(<[u8]>::to_vec)
            .ok_or(SessionError::NoBaseImage)?;
        inner
            .orchestrator
            .store_mut()
            .append_message(ChatRole::User, user_message)?;
        (
            inner.epoch,
            inner.orchestrator.store().clone(),
            displayed,
        )
    };

    let outcome = director
        .plan_refinement(chat, &store_snapshot, &displayed_image, user_message)
        .await;

    let (epoch, base_image, instruction) = {
        let mut inner = session.inner.lock();
        if inner.epoch != epoch {
            return Err(SessionError::Cancelled);
        }
        inner
            .orchestrator
            .store_mut()
            .append_message(ChatRole::Assistant, outcome.confirmation_text.clone())?;

        let Some(instruction) = outcome.edit else {
            return Ok(ChatOutcome {
                reply: outcome.confirmation_text,
                edited_image: None,
                instruction: None,
                edit_error: None,
            });
        };

        // Edits regenerate from the original upload, never from an
        // intermediate edited image, so drift cannot compound across turns.
        let base = inner
            .orchestrator
            .original_image()
            .map(<[u8]>::to_vec)
            .ok_or(SessionError::NoBaseImage)?;
        inner.orchestrator.begin_generation()?;
        inner
            .orchestrator
            .store_mut()
            .append_notice("Applying those specific adjustments now...");
        (inner.epoch, base, instruction)
    };

    let instruction_text = instruction.compose();
    let result = editor.edit(&base_image, &instruction_text).await;

    let mut inner = session.inner.lock();
    if inner.epoch != epoch {
        return Err(SessionError::Cancelled);
    }
    match result {
        Ok(image) => {
            inner.orchestrator.generation_succeeded(image.clone())?;
            Ok(ChatOutcome {
                reply: outcome.confirmation_text,
                edited_image: Some(image),
                instruction: Some(instruction_text),
                edit_error: None,
            })
        }
        Err(err) => {
            warn!("Chat-triggered edit failed: {err}");
            inner.orchestrator.generation_failed()?;
            Ok(ChatOutcome {
                reply: outcome.confirmation_text,
                edited_image: None,
                instruction: None,
                edit_error: Some(err),
            })
        }
    }
}

/// Transcript snapshot for persistence or display; includes notices.
pub fn transcript(session: &Session) -> Vec<ChatEntry> {
    session.inner.lock().orchestrator.store().entries().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::designer::collaborator::{ConverseReply, ConverseRequest, EditDirective};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn analysis() -> RoomAnalysis {
        RoomAnalysis {
            room_type: "Living Room".to_string(),
            architectural_features: vec![
                "Herringbone oak flooring".to_string(),
                "White drywall".to_string(),
            ],
            design_issues: vec![],
            decor_suggestions: vec![],
            suggested_prompts: vec![],
        }
    }

    struct OkAnalyzer;

    #[async_trait]
    impl AnalysisCollaborator for OkAnalyzer {
        async fn analyze(
            &self,
            _image: &[u8],
            _room_context: RoomContext,
        ) -> Result<RoomAnalysis, CollaboratorError> {
            Ok(analysis())
        }
    }

    struct FailingAnalyzer;

    #[async_trait]
    impl AnalysisCollaborator for FailingAnalyzer {
        async fn analyze(
            &self,
            _image: &[u8],
            _room_context: RoomContext,
        ) -> Result<RoomAnalysis, CollaboratorError> {
            Err(CollaboratorError::Api("analysis down".to_string()))
        }
    }

    /// Blocks until released so tests can interleave a reset.
    struct GatedAnalyzer {
        gate: Notify,
    }

    #[async_trait]
    impl AnalysisCollaborator for GatedAnalyzer {
        async fn analyze(
            &self,
            _image: &[u8],
            _room_context: RoomContext,
        ) -> Result<RoomAnalysis, CollaboratorError> {
            self.gate.notified().await;
            Ok(analysis())
        }
    }

    struct MockEditor {
        fail: bool,
        output: Vec<u8>,
        calls: AtomicUsize,
    }

    impl MockEditor {
        fn new(fail: bool) -> Self {
            MockEditor::with_output(fail, vec![0xED, 0x17])
        }

        fn with_output(fail: bool, output: Vec<u8>) -> Self {
            MockEditor {
                fail,
                output,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EditCollaborator for MockEditor {
        async fn edit(
            &self,
            _image: &[u8],
            instruction: &str,
        ) -> Result<Vec<u8>, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(!instruction.trim().is_empty());
            if self.fail {
                Err(CollaboratorError::NoPayload)
            } else {
                Ok(self.output.clone())
            }
        }
    }

    struct DirectiveChat {
        directive: Option<EditDirective>,
    }

    #[async_trait]
    impl ChatCollaborator for DirectiveChat {
        async fn converse(
            &self,
            request: ConverseRequest<'_>,
        ) -> Result<ConverseReply, CollaboratorError> {
            // notices must never reach the collaborator transcript
            assert!(!request.history.contains("Applying"));
            Ok(ConverseReply {
                text: "Here is what I changed.".to_string(),
                edit: self.directive.clone(),
            })
        }
    }

    fn rug_directive() -> EditDirective {
        EditDirective {
            target_elements: vec!["rug".to_string()],
            change_description: "swap in a pale blue wool rug".to_string(),
            preserve_elements: vec![],
            restore_elements: vec![],
        }
    }

    async fn session_at_complete() -> Session {
        let session = Session::new(RoomContext::Residential);
        run_analysis(&session, &OkAnalyzer, vec![1, 2, 3])
            .await
            .unwrap();
        let director = Director::new(2000);
        run_redesign(
            &session,
            &director,
            &MockEditor::new(false),
            "Redesign the room in a Japandi style with natural materials",
        )
        .await
        .unwrap();
        session
    }

    #[tokio::test]
    async fn analysis_success_moves_to_selecting() {
        let session = Session::new(RoomContext::Residential);
        let result = run_analysis(&session, &OkAnalyzer, vec![1]).await.unwrap();
        assert_eq!(result.room_type, "Living Room");
        assert_eq!(session.phase(), SessionPhase::Selecting);
    }

    #[tokio::test]
    async fn analysis_failure_returns_to_idle() {
        let session = Session::new(RoomContext::Residential);
        let err = run_analysis(&session, &FailingAnalyzer, vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Collaborator(_)));
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.analysis().is_none());
    }

    #[tokio::test]
    async fn reset_during_inflight_analysis_discards_the_result() {
        let session = std::sync::Arc::new(Session::new(RoomContext::Residential));
        let analyzer = std::sync::Arc::new(GatedAnalyzer {
            gate: Notify::new(),
        });

        let task = {
            let session = session.clone();
            let analyzer = analyzer.clone();
            tokio::spawn(async move { run_analysis(&session, analyzer.as_ref(), vec![1]).await })
        };

        // let the task park on the collaborator call, then reset under it
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        session.reset();
        analyzer.gate.notify_one();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(SessionError::Cancelled)));
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.analysis().is_none());
    }

    #[tokio::test]
    async fn redesign_failure_falls_back_to_selecting() {
        let session = Session::new(RoomContext::Residential);
        run_analysis(&session, &OkAnalyzer, vec![1]).await.unwrap();

        let director = Director::new(2000);
        let err = run_redesign(
            &session,
            &director,
            &MockEditor::new(true),
            "Redesign the room in an industrial chic style",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::Collaborator(_)));
        assert_eq!(session.phase(), SessionPhase::Selecting);
    }

    #[tokio::test]
    async fn conversational_chat_leaves_the_phase_untouched() {
        let session = session_at_complete().await;
        let director = Director::new(2000);
        let editor = MockEditor::new(false);
        let chat = DirectiveChat { directive: None };

        let outcome = run_chat(&session, &director, &chat, &editor, "what do you think?")
            .await
            .unwrap();
        assert!(outcome.edited_image.is_none());
        assert!(outcome.edit_error.is_none());
        assert_eq!(session.phase(), SessionPhase::Complete);
        assert_eq!(editor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chat_edit_success_updates_the_displayed_image() {
        let session = session_at_complete().await;
        let previous = session.current_image().unwrap();
        let director = Director::new(2000);
        let editor = MockEditor::with_output(false, vec![0xAB, 0xCD]);
        let chat = DirectiveChat {
            directive: Some(rug_directive()),
        };

        let outcome = run_chat(&session, &director, &chat, &editor, "change the rug")
            .await
            .unwrap();
        assert_eq!(outcome.edited_image, Some(vec![0xAB, 0xCD]));
        assert!(outcome.instruction.as_deref().unwrap().contains("CHANGE"));
        assert_eq!(session.phase(), SessionPhase::Complete);
        assert_ne!(session.current_image().unwrap(), previous);

        let entries = transcript(&session);
        assert!(entries
            .iter()
            .any(|entry| matches!(entry, ChatEntry::DisplayOnlyNotice(_))));
    }

    #[tokio::test]
    async fn failed_refinement_keeps_the_previous_image() {
        let session = session_at_complete().await;
        let previous = session.current_image().unwrap();
        let director = Director::new(2000);
        let editor = MockEditor::new(true);
        let chat = DirectiveChat {
            directive: Some(rug_directive()),
        };

        let outcome = run_chat(&session, &director, &chat, &editor, "change the rug")
            .await
            .unwrap();
        assert!(outcome.edited_image.is_none());
        assert!(outcome.edit_error.is_some());
        assert_eq!(session.phase(), SessionPhase::Complete);
        assert_eq!(session.current_image().unwrap(), previous);
    }

    #[tokio::test]
    async fn chat_is_rejected_before_any_upload() {
        let session = Session::new(RoomContext::Residential);
        let director = Director::new(2000);
        let editor = MockEditor::new(false);
        let chat = DirectiveChat { directive: None };

        let err = run_chat(&session, &director, &chat, &editor, "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoBaseImage));
    }
}

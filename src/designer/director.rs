use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::designer::analysis::{element_tokens, RoomAnalysis, RoomContext};
use crate::designer::collaborator::{
    ChatCollaborator, CollaboratorError, ConverseRequest, EditDirective,
};
use crate::designer::context::ContextStore;

/// Elements of the general image composition, always eligible for the
/// preserve enumeration alongside the recorded architectural features.
pub const GENERAL_COMPOSITION: [&str; 5] = ["walls", "floor", "ceiling", "furniture", "windows"];

const COMMERCIAL_SUPPRESSED: [&str; 4] = ["bed", "bedroom", "crib", "bunk"];
const RESIDENTIAL_SUPPRESSED: [&str; 3] = ["cubicle", "reception desk", "conference table"];

/// A validated, isolation-scoped edit. Produced fresh per Director
/// invocation and consumed immediately; never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditInstruction {
    pub target_elements: BTreeSet<String>,
    pub style_directive: String,
    pub preserve_elements: BTreeSet<String>,
    pub restoration_references: BTreeMap<String, String>,
}

impl EditInstruction {
    /// Render the instruction text: targets first, then the explicit
    /// preserve enumeration, then any restorations with the literal
    /// original material strings.
    pub fn compose(&self) -> String {
        let mut sections = Vec::new();

        if !self.target_elements.is_empty() {
            let targets = self
                .target_elements
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            sections.push(format!("CHANGE {}: {}.", targets, self.style_directive));
        }

        if !self.preserve_elements.is_empty() {
            let preserved = self
                .preserve_elements
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            sections.push(format!(
                "KEEP EXISTING {preserved} exactly as they appear in the input image."
            ));
        }

        for (element, material) in &self.restoration_references {
            sections.push(format!(
                "RESTORE the {element}: render it exactly as {material}, matching the original image."
            ));
        }

        sections.join("\n")
    }
}

#[derive(Debug)]
pub struct DirectorOutcome {
    pub confirmation_text: String,
    pub edit: Option<EditInstruction>,
}

/// Why a collaborator directive was rejected instead of dispatched.
#[derive(Debug, PartialEq, Eq)]
pub enum InstructionDefect {
    NothingToChange,
    UnderSpecifiedChange,
    UnknownRestorationTarget(String),
    ContextSuppressed(Vec<String>),
}

fn clean_list(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn tokens_overlap(left: &str, right: &str) -> bool {
    let right_tokens = element_tokens(right);
    element_tokens(left).iter().any(|token| {
        right_tokens
            .iter()
            .any(|other| other.contains(token.as_str()) || token.contains(other.as_str()))
    })
}

fn overlaps_any(candidate: &str, elements: &BTreeSet<String>) -> bool {
    elements.iter().any(|element| tokens_overlap(candidate, element))
}

fn is_full_scene(targets: &BTreeSet<String>) -> bool {
    const WHOLE_SCENE_TOKENS: [&str; 5] = ["room", "interior", "space", "everything", "scene"];
    targets.iter().any(|target| {
        element_tokens(target)
            .iter()
            .any(|token| WHOLE_SCENE_TOKENS.contains(&token.as_str()))
    })
}

fn context_conflict(room_context: RoomContext, element: &str) -> Option<&'static str> {
    let lowered = element.to_lowercase();
    let denied: &[&str] = match room_context {
        RoomContext::Commercial => &COMMERCIAL_SUPPRESSED,
        RoomContext::Residential => &RESIDENTIAL_SUPPRESSED,
    };
    denied.iter().copied().find(|term| lowered.contains(term))
}

/// Mechanical validation of a collaborator edit directive.
///
/// Applies, in order: the Context-Appropriateness Rule (drop elements that
/// contradict the declared room context unless the user explicitly asked for
/// them), the Restoration Rule (every restore element must resolve to an
/// exact recorded material, never a guess), and the Isolation Rule (when the
/// targets are a strict subset of the room, the preserve list is enumerated
/// from the recorded features plus the general composition, disjoint from
/// the targets). Pure and deterministic: the same inputs always yield the
/// same classification.
pub fn validate_directive(
    directive: &EditDirective,
    utterance: &str,
    analysis: Option<&RoomAnalysis>,
    room_context: RoomContext,
) -> Result<EditInstruction, InstructionDefect> {
    let utterance_lowered = utterance.to_lowercase();

    let mut suppressed = Vec::new();
    let mut targets: BTreeSet<String> = BTreeSet::new();
    for element in clean_list(&directive.target_elements) {
        match context_conflict(room_context, &element) {
            Some(term) if !utterance_lowered.contains(term) => suppressed.push(element),
            _ => {
                targets.insert(element);
            }
        }
    }

    let restore = clean_list(&directive.restore_elements);

    if targets.is_empty() && restore.is_empty() {
        if !suppressed.is_empty() {
            return Err(InstructionDefect::ContextSuppressed(suppressed));
        }
        return Err(InstructionDefect::NothingToChange);
    }

    let style_directive = directive.change_description.trim().to_string();
    if !targets.is_empty() && style_directive.is_empty() {
        return Err(InstructionDefect::UnderSpecifiedChange);
    }

    let mut restoration_references = BTreeMap::new();
    for element in restore {
        let Some(material) = analysis.and_then(|a| a.original_material_for(&element)) else {
            return Err(InstructionDefect::UnknownRestorationTarget(element));
        };
        restoration_references.insert(element, material.to_string());
    }

    let restored: BTreeSet<String> = restoration_references.keys().cloned().collect();

    let mut preserve: BTreeSet<String> = clean_list(&directive.preserve_elements)
        .into_iter()
        .collect();
    if !is_full_scene(&targets) {
        if let Some(analysis) = analysis {
            for feature in &analysis.architectural_features {
                preserve.insert(feature.clone());
            }
        }
        for element in GENERAL_COMPOSITION {
            preserve.insert(element.to_string());
        }
    }
    preserve.retain(|element| !overlaps_any(element, &targets) && !overlaps_any(element, &restored));

    Ok(EditInstruction {
        target_elements: targets,
        style_directive,
        preserve_elements: preserve,
        restoration_references,
    })
}

/// The Director: turns a user utterance plus session context into either a
/// conversational reply or a precisely-scoped edit instruction. Holds no
/// mutable state of its own.
pub struct Director {
    history_char_budget: usize,
}

impl Director {
    pub fn new(history_char_budget: usize) -> Self {
        Director {
            history_char_budget,
        }
    }

    /// Preset and custom prompts are already explicit target instructions;
    /// they bypass intent classification entirely.
    pub fn preset_instruction(&self, prompt: &str) -> String {
        prompt.trim().to_string()
    }

    /// Chat-triggered refinement path. Collaborator failures and rejected
    /// directives degrade to a conversational reply with no edit; an
    /// ambiguous instruction is never dispatched.
    pub async fn plan_refinement(
        &self,
        chat: &dyn ChatCollaborator,
        store: &ContextStore,
        current_image: &[u8],
        user_message: &str,
    ) -> DirectorOutcome {
        let history = store.history(self.history_char_budget);
        let request = ConverseRequest {
            history: &history,
            current_image,
            analysis: store.analysis(),
            user_message,
            room_context: store.room_context(),
        };

        let reply = match chat.converse(request).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!("Chat collaborator failed: {err}");
                return DirectorOutcome {
                    confirmation_text: apology_for(&err),
                    edit: None,
                };
            }
        };

        let reply_text = ensure_reply_text(reply.text);

        let Some(directive) = reply.edit else {
            return DirectorOutcome {
                confirmation_text: reply_text,
                edit: None,
            };
        };

        match validate_directive(
            &directive,
            user_message,
            store.analysis(),
            store.room_context(),
        ) {
            Ok(instruction) => DirectorOutcome {
                confirmation_text: reply_text,
                edit: Some(instruction),
            },
            Err(defect) => {
                warn!("Edit directive rejected: {defect:?}");
                DirectorOutcome {
                    confirmation_text: fallback_text(&defect, reply_text),
                    edit: None,
                }
            }
        }
    }
}

fn ensure_reply_text(text: String) -> String {
    if text.trim().is_empty() {
        "I'm having trouble understanding that.".to_string()
    } else {
        text
    }
}

fn apology_for(err: &CollaboratorError) -> String {
    if err.is_retryable_later() {
        "I'm handling a lot of requests right now. Give me a moment and try that again.".to_string()
    } else {
        "I'm sorry, I couldn't process that request right now.".to_string()
    }
}

fn fallback_text(defect: &InstructionDefect, reply_text: String) -> String {
    match defect {
        // Nothing actionable in the directive; treat the turn as purely
        // conversational and keep the collaborator's own wording.
        InstructionDefect::NothingToChange => reply_text,
        InstructionDefect::UnderSpecifiedChange => {
            "I want to get this exactly right before I change the image. \
             Could you describe the look you're after for that element?"
                .to_string()
        }
        InstructionDefect::UnknownRestorationTarget(element) => format!(
            "I don't have the original {element} on record from the analysis, \
             so I left the image untouched rather than guess at the material. \
             Could you describe what it should look like instead?"
        ),
        InstructionDefect::ContextSuppressed(elements) => format!(
            "I skipped {} because it wouldn't suit this kind of space. \
             Tell me explicitly if you want it anyway.",
            elements.join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::designer::collaborator::ConverseReply;
    use crate::designer::context::ChatRole;
    use async_trait::async_trait;

    fn living_room() -> RoomAnalysis {
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

    fn directive(targets: &[&str], change: &str, preserve: &[&str], restore: &[&str]) -> EditDirective {
        EditDirective {
            target_elements: targets.iter().map(|s| s.to_string()).collect(),
            change_description: change.to_string(),
            preserve_elements: preserve.iter().map(|s| s.to_string()).collect(),
            restore_elements: restore.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn rug_change_enumerates_the_preserve_list() {
        let analysis = living_room();
        let instruction = validate_directive(
            &directive(&["rug"], "replace with a hand-woven wool rug in warm terracotta", &[], &[]),
            "change the rug, keep everything else",
            Some(&analysis),
            RoomContext::Residential,
        )
        .expect("valid directive");

        assert!(instruction.target_elements.contains("rug"));
        for expected in [
            "Herringbone oak flooring",
            "White drywall",
            "furniture",
            "walls",
            "ceiling",
        ] {
            assert!(
                instruction.preserve_elements.contains(expected),
                "missing {expected} in preserve list"
            );
        }
        assert!(instruction
            .preserve_elements
            .iter()
            .all(|element| !element.contains("rug")));
    }

    #[test]
    fn restoration_uses_the_exact_original_material_string() {
        let analysis = living_room();
        let instruction = validate_directive(
            &directive(&[], "", &[], &["floor"]),
            "restore the original floor",
            Some(&analysis),
            RoomContext::Residential,
        )
        .expect("valid directive");

        assert_eq!(
            instruction.restoration_references.get("floor").map(String::as_str),
            Some("Herringbone oak flooring")
        );
        assert!(instruction.compose().contains("Herringbone oak flooring"));
    }

    #[test]
    fn unknown_restoration_target_is_rejected_not_guessed() {
        let analysis = living_room();
        let result = validate_directive(
            &directive(&[], "", &[], &["marble columns"]),
            "restore the original marble columns",
            Some(&analysis),
            RoomContext::Residential,
        );
        assert_eq!(
            result,
            Err(InstructionDefect::UnknownRestorationTarget(
                "marble columns".to_string()
            ))
        );
    }

    #[test]
    fn restoration_without_any_analysis_is_rejected() {
        let result = validate_directive(
            &directive(&[], "", &[], &["floor"]),
            "restore the floor",
            None,
            RoomContext::Residential,
        );
        assert!(matches!(
            result,
            Err(InstructionDefect::UnknownRestorationTarget(_))
        ));
    }

    #[test]
    fn commercial_context_suppresses_beds_unless_asked_for() {
        let analysis = living_room();
        let result = validate_directive(
            &directive(&["bed nook"], "add a cozy bed nook", &[], &[]),
            "make it cozier",
            Some(&analysis),
            RoomContext::Commercial,
        );
        assert!(matches!(result, Err(InstructionDefect::ContextSuppressed(_))));

        let explicit = validate_directive(
            &directive(&["bed nook"], "add a cozy bed nook", &[], &[]),
            "I really do want a bed in here",
            Some(&analysis),
            RoomContext::Commercial,
        );
        assert!(explicit.is_ok());
    }

    #[test]
    fn preserve_list_stays_disjoint_from_targets() {
        let analysis = living_room();
        let instruction = validate_directive(
            &directive(
                &["floor"],
                "switch to polished concrete",
                &["floor", "walls"],
                &[],
            ),
            "change the floor to concrete",
            Some(&analysis),
            RoomContext::Residential,
        )
        .expect("valid directive");

        assert!(!instruction.preserve_elements.contains("floor"));
        // the flooring feature names the same element and must not be pinned
        assert!(!instruction
            .preserve_elements
            .contains("Herringbone oak flooring"));
        assert!(instruction.preserve_elements.contains("walls"));
    }

    #[test]
    fn full_scene_restyle_skips_the_preserve_enumeration() {
        let analysis = living_room();
        let instruction = validate_directive(
            &directive(&["entire room"], "restyle in industrial chic", &[], &[]),
            "redo the whole room in industrial style",
            Some(&analysis),
            RoomContext::Residential,
        )
        .expect("valid directive");
        assert!(instruction.preserve_elements.is_empty());
    }

    #[test]
    fn empty_directive_is_classified_as_conversational() {
        let result = validate_directive(
            &directive(&[], "", &[], &[]),
            "what do you think of the room?",
            None,
            RoomContext::Residential,
        );
        assert_eq!(result, Err(InstructionDefect::NothingToChange));
    }

    #[test]
    fn targets_without_a_change_description_are_under_specified() {
        let result = validate_directive(
            &directive(&["rug"], "   ", &[], &[]),
            "do something with the rug",
            None,
            RoomContext::Residential,
        );
        assert_eq!(result, Err(InstructionDefect::UnderSpecifiedChange));
    }

    #[test]
    fn validation_is_deterministic_across_invocations() {
        let analysis = living_room();
        let d = directive(&["rug"], "swap in a jute rug", &[], &["floor"]);
        let first = validate_directive(&d, "new rug, original floor", Some(&analysis), RoomContext::Residential);
        let second = validate_directive(&d, "new rug, original floor", Some(&analysis), RoomContext::Residential);
        assert_eq!(first, second);
    }

    #[test]
    fn compose_orders_change_then_keep_then_restore() {
        let analysis = living_room();
        let instruction = validate_directive(
            &directive(&["rug"], "deep green velvet", &[], &["walls"]),
            "green rug, walls back to original",
            Some(&analysis),
            RoomContext::Residential,
        )
        .expect("valid directive");

        let text = instruction.compose();
        let change = text.find("CHANGE").expect("change section");
        let keep = text.find("KEEP EXISTING").expect("keep section");
        let restore = text.find("RESTORE").expect("restore section");
        assert!(change < keep && keep < restore);
        assert!(text.contains("White drywall"));
    }

    struct CannedChat {
        reply: Result<ConverseReply, CollaboratorError>,
    }

    #[async_trait]
    impl ChatCollaborator for CannedChat {
        async fn converse(
            &self,
            _request: ConverseRequest<'_>,
        ) -> Result<ConverseReply, CollaboratorError> {
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(_) => Err(CollaboratorError::Api("canned failure".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn conversational_reply_produces_no_edit() {
        let chat = CannedChat {
            reply: Ok(ConverseReply {
                text: "The oak floor really anchors the space.".to_string(),
                edit: None,
            }),
        };
        let mut store = ContextStore::new(RoomContext::Residential);
        store.record_analysis(living_room()).unwrap();
        store
            .append_message(ChatRole::User, "what do you think of the floor?")
            .unwrap();

        let director = Director::new(2000);
        let outcome = director
            .plan_refinement(&chat, &store, b"img", "what do you think of the floor?")
            .await;
        assert!(outcome.edit.is_none());
        assert_eq!(
            outcome.confirmation_text,
            "The oak floor really anchors the space."
        );
    }

    #[tokio::test]
    async fn impossible_restoration_falls_back_to_clarification() {
        let chat = CannedChat {
            reply: Ok(ConverseReply {
                text: "Restoring the fireplace now.".to_string(),
                edit: Some(directive(&[], "", &[], &["fireplace"])),
            }),
        };
        let mut store = ContextStore::new(RoomContext::Residential);
        store.record_analysis(living_room()).unwrap();

        let director = Director::new(2000);
        let outcome = director
            .plan_refinement(&chat, &store, b"img", "restore the original fireplace")
            .await;
        assert!(outcome.edit.is_none());
        assert!(outcome.confirmation_text.contains("fireplace"));
        assert!(outcome.confirmation_text.contains("on record"));
    }

    #[tokio::test]
    async fn collaborator_failure_degrades_to_an_apology() {
        let chat = CannedChat {
            reply: Err(CollaboratorError::Api("boom".to_string())),
        };
        let store = ContextStore::new(RoomContext::Residential);

        let director = Director::new(2000);
        let outcome = director
            .plan_refinement(&chat, &store, b"img", "make the sofa blue")
            .await;
        assert!(outcome.edit.is_none());
        assert!(outcome.confirmation_text.contains("sorry"));
    }
}

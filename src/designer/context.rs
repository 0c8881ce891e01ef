use uuid::Uuid;

use crate::designer::analysis::{RoomAnalysis, RoomContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub text: String,
}

/// One entry in the session log. Display-only notices ("applying those
/// adjustments now") are a separate variant so they can never leak into the
/// transcript fed back to the Director.
#[derive(Debug, Clone)]
pub enum ChatEntry {
    Message(ChatMessage),
    DisplayOnlyNotice(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("room analysis is already recorded for this session")]
    AlreadyInitialized,
    #[error("chat message text must not be empty")]
    EmptyMessage,
}

/// Read-mostly session context: the immutable original reality of the room
/// (analysis recorded once) plus the append-only conversation log.
#[derive(Debug, Clone)]
pub struct ContextStore {
    room_context: RoomContext,
    analysis: Option<RoomAnalysis>,
    log: Vec<ChatEntry>,
}

impl ContextStore {
    pub fn new(room_context: RoomContext) -> Self {
        ContextStore {
            room_context,
            analysis: None,
            log: Vec::new(),
        }
    }

    pub fn room_context(&self) -> RoomContext {
        self.room_context
    }

    /// Set the immutable baseline. A second call within the same session is
    /// an error; callers must reset the session first.
    pub fn record_analysis(&mut self, analysis: RoomAnalysis) -> Result<(), ContextError> {
        if self.analysis.is_some() {
            return Err(ContextError::AlreadyInitialized);
        }
        self.analysis = Some(analysis);
        Ok(())
    }

    pub fn analysis(&self) -> Option<&RoomAnalysis> {
        self.analysis.as_ref()
    }

    pub fn append_message(
        &mut self,
        role: ChatRole,
        text: impl Into<String>,
    ) -> Result<&ChatMessage, ContextError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ContextError::EmptyMessage);
        }
        self.log.push(ChatEntry::Message(ChatMessage {
            id: Uuid::new_v4(),
            role,
            text,
        }));
        match self.log.last() {
            Some(ChatEntry::Message(message)) => Ok(message),
            _ => unreachable!("just pushed a message entry"),
        }
    }

    pub fn append_notice(&mut self, text: impl Into<String>) {
        self.log.push(ChatEntry::DisplayOnlyNotice(text.into()));
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.log
    }

    /// Real messages only, oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.log.iter().filter_map(|entry| match entry {
            ChatEntry::Message(message) => Some(message),
            ChatEntry::DisplayOnlyNotice(_) => None,
        })
    }

    /// Transcript for prompting: non-notice messages, oldest first, clipped
    /// to `max_chars`. Truncation drops the oldest messages first; the most
    /// recent turns always survive.
    pub fn history(&self, max_chars: usize) -> String {
        let mut kept: Vec<String> = Vec::new();
        let mut used = 0usize;

        for message in self.messages().collect::<Vec<_>>().into_iter().rev() {
            let line = format!("{}: {}", message.role.as_str(), message.text);
            let cost = line.chars().count() + if kept.is_empty() { 0 } else { 1 };
            if used + cost > max_chars {
                break;
            }
            used += cost;
            kept.push(line);
        }

        kept.reverse();
        kept.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ContextStore {
        ContextStore::new(RoomContext::Residential)
    }

    fn analysis() -> RoomAnalysis {
        RoomAnalysis {
            room_type: "Living Room".to_string(),
            architectural_features: vec!["Herringbone oak flooring".to_string()],
            design_issues: vec![],
            decor_suggestions: vec![],
            suggested_prompts: vec![],
        }
    }

    #[test]
    fn analysis_is_recorded_exactly_once() {
        let mut store = store();
        assert!(store.record_analysis(analysis()).is_ok());
        assert_eq!(
            store.record_analysis(analysis()),
            Err(ContextError::AlreadyInitialized)
        );
        assert_eq!(store.analysis().unwrap().room_type, "Living Room");
    }

    #[test]
    fn empty_messages_are_rejected() {
        let mut store = store();
        assert!(matches!(
            store.append_message(ChatRole::User, "   "),
            Err(ContextError::EmptyMessage)
        ));
    }

    #[test]
    fn history_excludes_display_only_notices() {
        let mut store = store();
        store
            .append_message(ChatRole::User, "change the rug")
            .unwrap();
        store.append_notice("Applying those adjustments now...");
        store
            .append_message(ChatRole::Assistant, "Done, the rug is updated.")
            .unwrap();

        let history = store.history(1000);
        assert!(history.contains("user: change the rug"));
        assert!(history.contains("assistant: Done, the rug is updated."));
        assert!(!history.contains("Applying"));
    }

    #[test]
    fn truncation_drops_the_oldest_messages_first() {
        let mut store = store();
        store.append_message(ChatRole::User, "first message").unwrap();
        store.append_message(ChatRole::Assistant, "second message").unwrap();
        store.append_message(ChatRole::User, "third message").unwrap();

        let budget = "assistant: second message\nuser: third message".chars().count();
        let history = store.history(budget);
        assert!(!history.contains("first message"));
        assert!(history.contains("second message"));
        assert!(history.contains("third message"));
    }

    #[test]
    fn recent_message_survives_even_a_tiny_budget_overflow() {
        let mut store = store();
        store.append_message(ChatRole::User, "old").unwrap();
        store.append_message(ChatRole::User, "newest message here").unwrap();

        let history = store.history("user: newest message here".chars().count());
        assert_eq!(history, "user: newest message here");
    }
}

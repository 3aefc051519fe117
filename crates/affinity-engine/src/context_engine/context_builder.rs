//! Builds the message list sent to the completion endpoint for a session

use crate::context_engine::prompt_policy::{policy, PromptPolicy};
use crate::error::EngineResult;
use crate::intimacy::{level_of, IntimacyLedger};
use crate::memory::{Message, Role};
use crate::memory_db::{Session, SessionStore};
use std::sync::Arc;
use tracing::{debug, warn};

const STAY_IN_CHARACTER: &str = "Always stay in character and keep this persona's identity and traits throughout the conversation.";

/// Character persona the system message is synthesized from.
#[derive(Debug, Clone, Copy)]
pub struct CharacterProfile<'a> {
    pub name: &'a str,
    pub description: &'a str,
}

pub struct ContextBuilder {
    sessions: Arc<SessionStore>,
    ledger: Arc<IntimacyLedger>,
}

impl ContextBuilder {
    pub fn new(sessions: Arc<SessionStore>, ledger: Arc<IntimacyLedger>) -> Self {
        Self { sessions, ledger }
    }

    /// Ordered messages for the next completion.
    ///
    /// With a character name, the synthesized system message is written back into the
    /// session (replacing the existing one in place) and returned first. Without one, only
    /// the prior user/assistant turns are returned. An unknown or expired session yields
    /// an empty list.
    pub fn build(
        &self,
        session_id: &str,
        character_name: Option<&str>,
        character_description: Option<&str>,
    ) -> EngineResult<Vec<Message>> {
        let Some(session) = self.sessions.get(session_id)? else {
            debug!("No live session {}, building empty context", session_id);
            return Ok(Vec::new());
        };

        let Some(name) = character_name else {
            return Ok(prior_turns(&session).collect());
        };

        let score = self.ledger.get(&session.user_id, &session.character_id);
        let level = level_of(score);
        let is_first_message = !session.has_assistant_turn();
        let fragment = policy(level, is_first_message);

        let profile = CharacterProfile {
            name,
            description: character_description.unwrap_or(""),
        };
        let system_prompt = compose_system_prompt(profile, &fragment);

        // The stored history can shrink when the system message is first inserted.
        let Some(session) = self.sessions.upsert_system_message(session_id, &system_prompt)? else {
            warn!("Session {} expired while its context was being built", session_id);
            return Ok(Vec::new());
        };

        debug!(
            "Built context for session {}: level {}, first message {}, {} turns",
            session_id,
            level,
            is_first_message,
            session.messages.len()
        );

        let mut messages = Vec::with_capacity(session.messages.len());
        messages.push(Message::system(system_prompt));
        messages.extend(prior_turns(&session));
        Ok(messages)
    }
}

fn prior_turns(session: &Session) -> impl Iterator<Item = Message> + '_ {
    session
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| m.to_message())
}

pub fn compose_system_prompt(profile: CharacterProfile<'_>, fragment: &PromptPolicy) -> String {
    let persona = if profile.description.is_empty() {
        format!("You are {}.", profile.name)
    } else {
        format!("You are {}. {}", profile.name, profile.description)
    };
    format!("{}\n\n{}\n\n{}", persona, fragment.render(), STAY_IN_CHARACTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::{InMemoryRecordStore, Namespace, Precondition, RecordStore, SessionStoreConfig, VersionedRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        sessions: Arc<SessionStore>,
        ledger: Arc<IntimacyLedger>,
        builder: ContextBuilder,
    }

    fn fixture() -> Fixture {
        fixture_on(Arc::new(InMemoryRecordStore::new()), SessionStoreConfig::default())
    }

    fn fixture_on(records: Arc<dyn RecordStore>, config: SessionStoreConfig) -> Fixture {
        let sessions = Arc::new(SessionStore::new(records.clone(), config));
        let ledger = Arc::new(IntimacyLedger::new(records));
        let builder = ContextBuilder::new(sessions.clone(), ledger.clone());
        Fixture { sessions, ledger, builder }
    }

    #[test]
    fn test_missing_session_builds_empty() {
        let f = fixture();
        assert!(f.builder.build("nope", Some("Ada"), Some("A poet.")).unwrap().is_empty());
    }

    #[test]
    fn test_without_character_returns_turns_only() {
        let f = fixture();
        let id = f.sessions.create("c1", "u1", None).unwrap();
        f.sessions.append(&id, Role::User, "hi", None).unwrap();
        f.sessions.append(&id, Role::Assistant, "hello", None).unwrap();

        let messages = f.builder.build(&id, None, None).unwrap();
        assert_eq!(messages, vec![Message::user("hi"), Message::assistant("hello")]);
        assert!(f.sessions.get(&id).unwrap().unwrap().messages.iter().all(|m| m.role != Role::System));
    }

    #[test]
    fn test_system_message_leads_and_is_persisted_in_place() {
        let f = fixture();
        let id = f.sessions.create("c1", "u1", None).unwrap();
        f.sessions.append(&id, Role::User, "hi", None).unwrap();

        let messages = f.builder.build(&id, Some("Ada"), Some("A poet.")).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.starts_with("You are Ada. A poet."));
        assert!(messages[0].content.contains("stranger"));
        assert!(messages[0].content.contains("start of the conversation"));
        assert_eq!(messages[1], Message::user("hi"));

        f.builder.build(&id, Some("Ada"), Some("A poet.")).unwrap();
        let stored = f.sessions.get(&id).unwrap().unwrap();
        let system_count = stored.messages.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(system_count, 1);
        assert_eq!(stored.messages[0].role, Role::System);
    }

    #[test]
    fn test_first_message_flag_clears_after_assistant_reply() {
        let f = fixture();
        let id = f.sessions.create("c1", "u1", None).unwrap();
        f.sessions.append(&id, Role::User, "hi", None).unwrap();
        f.sessions.append(&id, Role::Assistant, "Good day.", None).unwrap();

        let messages = f.builder.build(&id, Some("Ada"), Some("A poet.")).unwrap();
        assert!(!messages[0].content.contains("start of the conversation"));
    }

    #[test]
    fn test_levels_change_fragment_but_not_turns() {
        let f = fixture();
        let id = f.sessions.create("c1", "u1", None).unwrap();
        f.sessions.append(&id, Role::User, "hi", None).unwrap();
        f.sessions.append(&id, Role::Assistant, "hello", None).unwrap();

        let before = f.builder.build(&id, Some("Ada"), Some("A poet.")).unwrap();
        for _ in 0..20 {
            f.ledger.increase("u1", "c1").unwrap();
        }
        let after = f.builder.build(&id, Some("Ada"), Some("A poet.")).unwrap();

        assert_ne!(before[0].content, after[0].content);
        assert!(after[0].content.contains("close-friends"));
        assert_eq!(before[1..], after[1..]);
    }

    #[test]
    fn test_build_on_full_session_respects_cap() {
        let config = SessionStoreConfig {
            max_messages: 3,
            ..Default::default()
        };
        let f = fixture_on(Arc::new(InMemoryRecordStore::new()), config);
        let id = f.sessions.create("c1", "u1", None).unwrap();
        for turn in ["one", "two", "three"] {
            f.sessions.append(&id, Role::User, turn, None).unwrap();
        }

        let messages = f.builder.build(&id, Some("Ada"), None).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1..], [Message::user("two"), Message::user("three")]);

        let stored = f.sessions.get(&id).unwrap().unwrap();
        assert_eq!(stored.messages.len(), 3);
        assert_eq!(stored.messages[0].role, Role::System);
    }

    /// Serves the first session read, then reports every session as gone.
    struct VanishingSessions {
        inner: InMemoryRecordStore,
        session_reads: AtomicUsize,
    }

    impl RecordStore for VanishingSessions {
        fn get(&self, namespace: Namespace, key: &str) -> EngineResult<Option<VersionedRecord>> {
            if namespace == Namespace::Sessions && self.session_reads.fetch_add(1, Ordering::SeqCst) > 0 {
                return Ok(None);
            }
            self.inner.get(namespace, key)
        }

        fn put(&self, namespace: Namespace, key: &str, value: &str, precondition: Precondition) -> EngineResult<u64> {
            self.inner.put(namespace, key, value, precondition)
        }

        fn delete(&self, namespace: Namespace, key: &str) -> EngineResult<bool> {
            self.inner.delete(namespace, key)
        }

        fn scan(&self, namespace: Namespace) -> EngineResult<Vec<(String, VersionedRecord)>> {
            self.inner.scan(namespace)
        }
    }

    #[test]
    fn test_session_vanishing_mid_build_yields_empty_context() {
        let records = Arc::new(VanishingSessions {
            inner: InMemoryRecordStore::new(),
            session_reads: AtomicUsize::new(0),
        });
        let f = fixture_on(records.clone(), SessionStoreConfig::default());
        let id = f.sessions.create("c1", "u1", None).unwrap();

        assert!(f.builder.build(&id, Some("Ada"), None).unwrap().is_empty());
        assert_eq!(records.session_reads.load(Ordering::SeqCst), 2);
    }
}

use affinity_engine::context_engine::PROACTIVE_GREETING_CUE;
use affinity_engine::memory_db::{Namespace, RecordStore};
use affinity_engine::{
    level_of, ChatOrchestrator, ChatTurn, CompletionClient, CompletionRequest, ContextBuilder, InMemoryRecordStore,
    IntimacyLedger, IntimacyLevel, LlmError, Role, SessionStore, SessionStoreConfig, SqliteRecordStore,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

struct Engine {
    sessions: Arc<SessionStore>,
    ledger: Arc<IntimacyLedger>,
    builder: ContextBuilder,
}

fn engine_on(records: Arc<dyn RecordStore>) -> Engine {
    let sessions = Arc::new(SessionStore::new(records.clone(), SessionStoreConfig::default()));
    let ledger = Arc::new(IntimacyLedger::new(records));
    let builder = ContextBuilder::new(sessions.clone(), ledger.clone());
    Engine { sessions, ledger, builder }
}

fn engine() -> Engine {
    engine_on(Arc::new(InMemoryRecordStore::new()))
}

#[test]
fn stranger_policy_until_five_increases() {
    let engine = engine();
    let id = engine.sessions.create("c1", "u1", None).unwrap();
    engine.sessions.append(&id, Role::User, "hi", Some("c1")).unwrap();

    let context = engine.builder.build(&id, Some("Ada"), Some("A poet.")).unwrap();
    assert_eq!(context[0].role, Role::System);
    assert!(context[0].content.contains("[Relationship level: stranger]"));
    assert!(context[0].content.contains("Never use bracketed action"));

    for _ in 0..5 {
        engine.ledger.increase("u1", "c1").unwrap();
    }
    assert_eq!(level_of(engine.ledger.get("u1", "c1")), IntimacyLevel::WarmingUp);

    let context = engine.builder.build(&id, Some("Ada"), Some("A poet.")).unwrap();
    assert!(context[0].content.contains("[Relationship level: warming-up]"));
    assert_eq!(context.last().unwrap().content, "hi");
}

#[test]
fn sixty_appends_keep_the_last_fifty_in_order() {
    let engine = engine();
    let id = engine.sessions.create("c1", "u1", None).unwrap();
    for i in 1..=60 {
        engine.sessions.append(&id, Role::User, &format!("message {}", i), None).unwrap();
    }

    let session = engine.sessions.get(&id).unwrap().unwrap();
    assert_eq!(session.messages.len(), 50);
    assert_eq!(session.messages.first().unwrap().content, "message 11");
    assert_eq!(session.messages.last().unwrap().content, "message 60");
    let expected: Vec<String> = (11..=60).map(|i| format!("message {}", i)).collect();
    let actual: Vec<String> = session.messages.iter().map(|m| m.content.clone()).collect();
    assert_eq!(actual, expected);
}

#[test]
fn sqlite_backed_engine_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("affinity.db");

    let id = {
        let engine = engine_on(Arc::new(SqliteRecordStore::new(&path).unwrap()));
        let id = engine.sessions.create("c1", "u1", Some("tok-1")).unwrap();
        engine.sessions.append(&id, Role::User, "remember me", None).unwrap();
        engine.ledger.increase("u1", "c1").unwrap();
        id
    };

    let store = Arc::new(SqliteRecordStore::new(&path).unwrap());
    assert!(store.get(Namespace::Sessions, &id).unwrap().is_some());
    let engine = engine_on(store);
    let session = engine.sessions.get(&id).unwrap().unwrap();
    assert_eq!(session.messages[0].content, "remember me");
    assert_eq!(engine.ledger.get("u1", "c1"), 1);
    assert_eq!(engine.sessions.latest_for("u1", "c1").unwrap(), Some(id));
}

/// Answers every request with the number of messages it saw.
#[derive(Default)]
struct CountingClient {
    seen: Mutex<Vec<CompletionRequest>>,
}

#[async_trait]
impl CompletionClient for CountingClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let reply = format!("saw {} messages", request.messages.len());
        self.seen.lock().unwrap().push(request);
        Ok(reply)
    }
}

#[test]
fn conversation_levels_up_over_turns() {
    let records: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
    let sessions = Arc::new(SessionStore::new(records.clone(), SessionStoreConfig::default()));
    let ledger = Arc::new(IntimacyLedger::new(records));
    let client = Arc::new(CountingClient::default());
    let orchestrator = ChatOrchestrator::new(sessions.clone(), ledger.clone(), client.clone(), Default::default());

    let base = ChatTurn {
        user_id: "u1".into(),
        authenticated: true,
        character_id: "c1".into(),
        character_name: Some("Ada".into()),
        character_description: Some("A poet.".into()),
        ..Default::default()
    };

    let greeting = tokio_test::block_on(orchestrator.chat_turn(ChatTurn {
        proactive_greeting: true,
        ..base.clone()
    }))
    .unwrap();
    let session_id = greeting.session_id.clone();
    assert!(greeting.intimacy.is_none());

    let mut last_level = IntimacyLevel::Stranger;
    for i in 0..10 {
        let reply = tokio_test::block_on(orchestrator.chat_turn(ChatTurn {
            session_id: Some(session_id.clone()),
            message: format!("turn {}", i),
            ..base.clone()
        }))
        .unwrap();
        let outcome = reply.intimacy.unwrap();
        assert!(outcome.new_level >= last_level);
        last_level = outcome.new_level;
    }
    assert_eq!(last_level, IntimacyLevel::FastFriends);

    let seen = client.seen.lock().unwrap();
    assert_eq!(seen[0].messages.last().unwrap().content, PROACTIVE_GREETING_CUE);
    assert!(seen.last().unwrap().messages[0].content.contains("warming-up"));

    let stored = sessions.get(&session_id).unwrap().unwrap();
    assert_eq!(stored.messages.iter().filter(|m| m.role == Role::System).count(), 1);
    assert_eq!(stored.messages.iter().filter(|m| m.role == Role::Assistant).count(), 11);
    assert_eq!(stored.messages.iter().filter(|m| m.role == Role::User).count(), 10);
}

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use shopkeep_agent::llm::{ModelChunk, ScriptedModel};
use shopkeep_agent::session::DriveOutcome;
use shopkeep_agent::tools::sync_system_tools;
use shopkeep_agent::{
    AgentRuntime, ConversationStore, ConversationTimeline, EntryKind, TimelineSession,
    ToolCallStatus, ToolDispatcher, ToolRegistry, TurnEvent, TurnRequest, Usage,
};
use shopkeep_core::config::AppConfig;
use shopkeep_core::{ContentBlock, MessageRole, TenantId};
use shopkeep_db::fixtures::DemoSeedDataset;
use shopkeep_db::repositories::{
    SqlAuditSink, SqlConversationRepository, SqlToolDefinitionRepository,
    SqlToolExecutionRepository,
};
use shopkeep_db::{connect_with_settings, migrations, DbPool};

async fn seeded_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    DemoSeedDataset::load(&pool).await.expect("seed");
    pool
}

async fn runtime(pool: &DbPool, model: ScriptedModel) -> AgentRuntime {
    let config = AppConfig::default();
    let definitions = Arc::new(SqlToolDefinitionRepository::new(pool.clone()));
    sync_system_tools(definitions.as_ref(), config.tools.default_max_execution_ms)
        .await
        .expect("sync tools");

    let dispatcher = ToolDispatcher::for_pool(pool.clone(), &config).expect("dispatcher");

    AgentRuntime::new(
        ConversationStore::new(Arc::new(SqlConversationRepository::new(pool.clone()))),
        Arc::new(dispatcher),
        Arc::new(model),
        config.agent,
    )
}

fn stock_check_model() -> ScriptedModel {
    ScriptedModel::new()
        .with_round(vec![
            ModelChunk::TextDelta("Let me check.".to_string()),
            ModelChunk::ToolUse {
                id: "toolu_stock".to_string(),
                name: "inventory".to_string(),
                input: json!({"action": "summary"}),
            },
            ModelChunk::Finished { usage: Usage { input_tokens: 120, output_tokens: 18, cost: None } },
        ])
        .with_round(vec![
            ModelChunk::TextDelta("You have 169 units in stock; ".to_string()),
            ModelChunk::TextDelta("3 items are running low.".to_string()),
            ModelChunk::Finished { usage: Usage { input_tokens: 300, output_tokens: 12, cost: None } },
        ])
}

fn kinds(timeline: &ConversationTimeline) -> Vec<EntryKind> {
    timeline.entries().iter().map(|entry| entry.kind.clone()).collect()
}

#[tokio::test]
async fn check_my_stock_streams_persists_and_restores_the_same_timeline() {
    let pool = seeded_pool().await;
    let runtime = runtime(&pool, stock_check_model()).await;
    let tenant = TenantId("tenant-demo".to_string());

    let session = TimelineSession::new();
    let ticket = session.begin_turn("check my stock").await.expect("begin turn");
    let (tx, rx) = mpsc::channel(64);

    let (turn, outcome) = tokio::join!(
        runtime.run_turn(TurnRequest::new(tenant.clone(), "check my stock"), tx),
        session.drive(ticket, rx),
    );
    let conversation_id = turn.expect("turn succeeds");
    assert_eq!(outcome, DriveOutcome::Completed);

    let live = session.snapshot().await;
    assert_eq!(live.conversation_id(), Some(&conversation_id));
    assert_eq!(live.last_usage().map(|usage| usage.input_tokens), Some(420));

    let live_kinds = kinds(&live);
    assert_eq!(live_kinds.len(), 4);
    assert_eq!(live_kinds[0], EntryKind::UserMessage { content: "check my stock".to_string() });
    assert_eq!(
        live_kinds[1],
        EntryKind::AssistantMessage { content: "Let me check.".to_string(), is_streaming: false }
    );
    match &live_kinds[2] {
        EntryKind::ToolCall { call_id, name, status, result, .. } => {
            assert_eq!(call_id.as_deref(), Some("toolu_stock"));
            assert_eq!(name, "inventory");
            assert_eq!(*status, ToolCallStatus::Success);
            let summary = result.as_ref().expect("summary result");
            assert_eq!(summary["total_units"], json!(169));
            assert_eq!(summary["low_stock_count"], json!(3));
        }
        other => panic!("expected tool call, got {other:?}"),
    }
    assert_eq!(
        live_kinds[3],
        EntryKind::AssistantMessage {
            content: "You have 169 units in stock; 3 items are running low.".to_string(),
            is_streaming: false,
        }
    );

    let history = runtime.store().restore_timeline(&conversation_id).await.expect("history");
    let shape: Vec<_> = history
        .iter()
        .map(|message| (message.role, message.is_tool_use, message.is_tool_result_turn()))
        .collect();
    assert_eq!(
        shape,
        [
            (MessageRole::User, false, false),
            (MessageRole::Assistant, true, false),
            (MessageRole::User, false, true),
            (MessageRole::Assistant, false, false),
        ]
    );
    assert!(matches!(
        &history[2].content[0],
        ContentBlock::ToolResult { tool_use_id, is_error: false, .. } if tool_use_id == "toolu_stock"
    ));

    let restored = ConversationTimeline::restored(&history);
    assert_eq!(kinds(&restored), live_kinds);

    let audit = SqlAuditSink::new(pool.clone())
        .list_for_trace(&conversation_id.0)
        .await
        .expect("audit trail");
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, "tool.inventory.summary");

    pool.close().await;
}

#[tokio::test]
async fn follow_up_turn_replays_history_to_the_model() {
    let pool = seeded_pool().await;
    let model = Arc::new(
        ScriptedModel::new()
            .with_round(vec![ModelChunk::TextDelta("Hi!".to_string())])
            .with_round(vec![ModelChunk::TextDelta("Still here.".to_string())]),
    );

    let config = AppConfig::default();
    let definitions = Arc::new(SqlToolDefinitionRepository::new(pool.clone()));
    let dispatcher = ToolDispatcher::new(
        Arc::new(ToolRegistry::from_config(definitions, &config.tools)),
        Arc::new(SqlToolExecutionRepository::new(pool.clone())),
        Arc::new(SqlAuditSink::new(pool.clone())),
    );
    let runtime = AgentRuntime::new(
        ConversationStore::new(Arc::new(SqlConversationRepository::new(pool.clone()))),
        Arc::new(dispatcher),
        model.clone(),
        config.agent,
    );
    let tenant = TenantId("tenant-demo".to_string());

    let (tx, mut rx) = mpsc::channel(16);
    let first = runtime.run_turn(TurnRequest::new(tenant.clone(), "hello"), tx).await.expect("first");
    let mut created = 0;
    while let Some(event) = rx.recv().await {
        if matches!(event, TurnEvent::ConversationCreated { .. }) {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let (tx, mut rx) = mpsc::channel(16);
    let second = runtime
        .run_turn(TurnRequest::new(tenant, "still there?").in_conversation(first.clone()), tx)
        .await
        .expect("second");
    assert_eq!(second, first);
    while let Some(event) = rx.recv().await {
        assert!(!matches!(event, TurnEvent::ConversationCreated { .. }));
    }

    let requests = model.requests().await;
    assert_eq!(requests.len(), 2);
    let replayed: Vec<_> = requests[1].messages.iter().map(|message| message.content.clone()).collect();
    assert_eq!(
        replayed,
        vec![
            vec![ContentBlock::text("hello")],
            vec![ContentBlock::text("Hi!")],
            vec![ContentBlock::text("still there?")],
        ]
    );

    pool.close().await;
}

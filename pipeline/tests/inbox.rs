mod common;

use chrono::Utc;
use common::*;
use database::{SqliteStore, Store};
use llm_interface::ReplyGenerator;
use pipeline::{InboxSettings, InboxWatcher};
use std::sync::Arc;
use subscout_core::{InteractionStatus, RedditApiError};

fn watcher(
    store: &SqliteStore,
    reddit: &Arc<FakeReddit>,
    tokens: &Arc<FakeTokens>,
    llm: &Arc<FakeLlm>,
) -> InboxWatcher {
    InboxWatcher::new(
        Arc::new(store.clone()),
        reddit.clone(),
        tokens.clone(),
        ReplyGenerator::new(llm.clone(), 1250),
        InboxSettings::default(),
    )
}

#[tokio::test]
async fn test_only_comments_without_an_interaction_are_processed() {
    let store = memory_store().await;
    seed_tenant(&store, false).await;

    let reddit = FakeReddit::new();
    let tokens = FakeTokens::new();
    let llm = FakeLlm::new();

    // c1 already answered by an earlier run
    reddit.set_inbox("token-1", vec![comment("c1", "alice", "first")]);
    watcher(&store, &reddit, &tokens, &llm).run().await.unwrap();
    assert_eq!(reddit.thread_calls(), vec!["c1"]);

    let reddit = FakeReddit::new();
    reddit.set_inbox(
        "token-1",
        vec![
            comment("c1", "alice", "first"),
            comment("c2", "bob", "second"),
            comment("c3", "carol", "third"),
        ],
    );
    let report = watcher(&store, &reddit, &tokens, &llm).run().await.unwrap();

    let mut fetched = reddit.thread_calls();
    fetched.sort();
    assert_eq!(fetched, vec!["c2", "c3"]);
    assert_eq!(report.total_interactions, 2);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM interactions").await, 3);
}

#[tokio::test]
async fn test_failed_generation_only_drops_its_own_comment() {
    let store = memory_store().await;
    seed_tenant(&store, false).await;

    let reddit = FakeReddit::new();
    let tokens = FakeTokens::new();
    let llm = FakeLlm::new();
    reddit.set_inbox(
        "token-1",
        vec![
            comment("c1", "alice", "How much does it cost?"),
            comment("c2", "bob", "FAIL this one"),
        ],
    );

    let report = watcher(&store, &reddit, &tokens, &llm).run().await.unwrap();

    assert!(report.success);
    assert_eq!(report.processed_users, 1);
    assert_eq!(report.total_interactions, 1);
    assert_eq!(report.failed_users, 0);
    assert_eq!(reddit.thread_calls().len(), 2);
    assert_eq!(llm.reply_requests(), 2);

    let ids = vec!["c1".to_string(), "c2".to_string()];
    let stored = store.existing_interaction_comment_ids("user-1", &ids).await.unwrap();
    assert!(stored.contains("c1"));
    assert!(!stored.contains("c2"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["processedUsers"], 1);
    assert_eq!(json["totalInteractions"], 1);
    assert_eq!(json["success"], true);
}

#[tokio::test]
async fn test_own_and_deleted_comments_are_ignored() {
    let store = memory_store().await;
    seed_tenant(&store, false).await;

    let reddit = FakeReddit::new();
    reddit.set_inbox(
        "token-1",
        vec![
            comment("c1", "Ledgerly_Team", "our own reply"),
            comment("c2", "[deleted]", "[deleted]"),
            comment("c3", "alice", "real question"),
            comment("c3", "alice", "real question"),
        ],
    );

    let report = watcher(&store, &reddit, &FakeTokens::new(), &FakeLlm::new())
        .run()
        .await
        .unwrap();

    assert_eq!(reddit.thread_calls(), vec!["c3"]);
    assert_eq!(report.total_interactions, 1);
}

#[tokio::test]
async fn test_interactions_capture_thread_and_feed_leads() {
    let store = memory_store().await;
    seed_tenant(&store, false).await;

    let reddit = FakeReddit::new();
    reddit.set_inbox(
        "token-1",
        vec![comment("c1", "alice", "pricing?"), comment("c2", "alice", "also, exports?")],
    );

    watcher(&store, &reddit, &FakeTokens::new(), &FakeLlm::new())
        .run()
        .await
        .unwrap();

    let leads = store.leads_needing_score(10).await.unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].author, "alice");
    assert_eq!(leads[0].interaction_count, 2);

    let conversation = store.lead_conversation(&leads[0]).await.unwrap();
    assert_eq!(conversation.len(), 2);
    let first = &conversation[0];
    assert_eq!(first.status, InteractionStatus::New);
    assert!(first.scheduled_for.is_none());
    assert_eq!(first.reddit_account_id, "acc-1");
    assert_eq!(first.thread_context.target_comment_id, first.reddit_comment_id);
    assert!(first.thread_context.find_comment(&first.reddit_comment_id).is_some());
    assert!(!first.our_content.is_empty());
}

#[tokio::test]
async fn test_auto_reply_schedules_new_interactions() {
    let store = memory_store().await;
    seed_tenant(&store, true).await;

    let reddit = FakeReddit::new();
    reddit.set_inbox("token-1", vec![comment("c1", "alice", "pricing?")]);

    let before = Utc::now();
    watcher(&store, &reddit, &FakeTokens::new(), &FakeLlm::new())
        .run()
        .await
        .unwrap();

    let lead = store.leads_needing_score(10).await.unwrap().remove(0);
    let interaction = store.lead_conversation(&lead).await.unwrap().remove(0);
    assert_eq!(interaction.status, InteractionStatus::Scheduled);
    let scheduled_for = interaction.scheduled_for.unwrap();
    assert!(scheduled_for >= before + chrono::Duration::minutes(30));
}

#[tokio::test]
async fn test_expired_tokens_are_refreshed_and_stored() {
    let store = memory_store().await;
    seed_tenant(&store, false).await;
    execute(
        &store,
        "UPDATE reddit_accounts SET token_expires_at = '2020-01-01T00:00:00+00:00' WHERE id = 'acc-1'",
    )
    .await;

    let reddit = FakeReddit::new();
    let tokens = FakeTokens::new();
    reddit.set_inbox("fresh-ledgerly_team", vec![comment("c1", "alice", "hi")]);

    let report = watcher(&store, &reddit, &tokens, &FakeLlm::new())
        .run()
        .await
        .unwrap();

    assert_eq!(tokens.refreshed(), vec!["ledgerly_team"]);
    assert_eq!(report.total_interactions, 1);
    let account = &store.active_tenants().await.unwrap()[0].accounts[0];
    assert_eq!(account.access_token.as_deref(), Some("fresh-ledgerly_team"));
}

#[tokio::test]
async fn test_accounts_without_credentials_are_skipped() {
    let store = memory_store().await;
    seed_tenant(&store, false).await;
    execute(
        &store,
        "INSERT INTO reddit_accounts (id, user_id, username, access_token, refresh_token) \
         VALUES ('acc-2', 'user-1', 'no_creds', NULL, NULL), \
                ('acc-3', 'user-1', 'revoked', NULL, 'stale')",
    )
    .await;

    let reddit = FakeReddit::new();
    let tokens = FakeTokens::new();
    tokens.fail_refresh_for("revoked");
    reddit.set_inbox("token-1", vec![comment("c1", "alice", "hi")]);

    let report = watcher(&store, &reddit, &tokens, &FakeLlm::new())
        .run()
        .await
        .unwrap();

    assert_eq!(report.skipped_accounts, 2);
    assert_eq!(report.processed_users, 1);
    assert_eq!(report.total_interactions, 1);
}

#[tokio::test]
async fn test_inbox_failure_on_one_account_does_not_stop_the_next() {
    let store = memory_store().await;
    seed_tenant(&store, false).await;
    execute(
        &store,
        "INSERT INTO reddit_accounts (id, user_id, username, access_token) \
         VALUES ('acc-0', 'user-1', 'aaa_broken', 'broken-token')",
    )
    .await;

    let reddit = FakeReddit::new();
    reddit.fail_inbox("broken-token", RedditApiError::Forbidden {
        resource: "/message/comments".to_string(),
    });
    reddit.set_inbox("token-1", vec![comment("c1", "alice", "hi")]);

    let report = watcher(&store, &reddit, &FakeTokens::new(), &FakeLlm::new())
        .run()
        .await
        .unwrap();

    assert_eq!(report.processed_users, 1);
    assert_eq!(report.failed_users, 0);
    assert_eq!(report.total_interactions, 1);
}

#[tokio::test]
async fn test_no_tenants_is_a_successful_empty_run() {
    let store = memory_store().await;
    let report = watcher(&store, &FakeReddit::new(), &FakeTokens::new(), &FakeLlm::new())
        .run()
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.processed_users, 0);
    assert_eq!(report.total_interactions, 0);
}

#[tokio::test]
async fn test_failed_lead_write_leaves_the_comment_for_the_next_run() {
    let store = memory_store().await;
    seed_tenant(&store, false).await;
    execute(
        &store,
        "CREATE TRIGGER reject_bob BEFORE INSERT ON leads WHEN NEW.author = 'bob' \
         BEGIN SELECT RAISE(ABORT, 'lead write rejected'); END",
    )
    .await;

    let tokens = FakeTokens::new();
    let llm = FakeLlm::new();
    let inbox = vec![comment("c1", "alice", "pricing?"), comment("c2", "bob", "demo?")];

    let reddit = FakeReddit::new();
    reddit.set_inbox("token-1", inbox.clone());
    let report = watcher(&store, &reddit, &tokens, &llm).run().await.unwrap();

    assert_eq!(report.failed_users, 1);
    assert_eq!(report.processed_users, 0);
    // Whatever made it in before the failure is still reported
    let stored = count(&store, "SELECT COUNT(*) FROM interactions").await;
    assert_eq!(report.total_interactions, stored as u64);
    assert_eq!(
        count(&store, "SELECT COUNT(*) FROM interactions WHERE author = 'bob'").await,
        0
    );
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(*) FROM interactions i WHERE NOT EXISTS \
             (SELECT 1 FROM leads l WHERE l.user_id = i.user_id AND l.author = i.author)",
        )
        .await,
        0
    );

    execute(&store, "DROP TRIGGER reject_bob").await;
    let reddit = FakeReddit::new();
    reddit.set_inbox("token-1", inbox);
    let report = watcher(&store, &reddit, &tokens, &llm).run().await.unwrap();

    assert_eq!(report.processed_users, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM interactions").await, 2);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM leads").await, 2);
}

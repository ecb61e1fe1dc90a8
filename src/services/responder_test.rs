use super::*;
use crate::rate_limit::RateLimitConfig;
use crate::state::test_helpers::{
    MockPromptStore, MockProvider, auth_error, rate_config, server_error, test_responder,
};

fn groq() -> Arc<MockProvider> {
    MockProvider::new(ProviderKind::Groq)
}

fn hf() -> Arc<MockProvider> {
    MockProvider::new(ProviderKind::HuggingFace)
}

fn no_prompts() -> Arc<dyn PromptStore> {
    Arc::new(MockPromptStore::default())
}

fn responder(
    primary: Option<Arc<MockProvider>>,
    fallback: Option<Arc<MockProvider>>,
    rate: RateLimitConfig,
) -> Responder {
    test_responder(primary, fallback, rate, no_prompts(), ResponderConfig::default())
}

fn auth_failing_groq() -> Arc<MockProvider> {
    MockProvider::scripted(ProviderKind::Groq, vec![Err(auth_error(ProviderKind::Groq))])
}

// =========================================================================
// happy path + persistence
// =========================================================================

#[tokio::test]
async fn primary_reply_is_persisted_in_order() {
    let (primary, fallback) = (groq(), hf());
    let r = responder(Some(primary.clone()), Some(fallback.clone()), rate_config(10, 100));

    let reply = r.respond("u1", "hi").await.unwrap();
    assert_eq!(reply.provider, ProviderKind::Groq);
    assert_eq!(reply.content, "reply from groq");
    assert_eq!(fallback.calls(), 0);
    assert_eq!(
        r.conversations().get_context("u1"),
        vec![Turn::user("hi"), Turn::assistant("reply from groq")]
    );
    assert_eq!(r.rate_limiter().global_request_count(), 1);

    let stats = r.stats();
    assert_eq!(stats.usage.primary_successes, 1);
    assert_eq!(stats.usage.primary_prompt_tokens, 12);
    assert_eq!(stats.usage.primary_completion_tokens, 5);
    assert_eq!(stats.last_provider, Some(ProviderKind::Groq));
}

#[tokio::test]
async fn history_and_default_prompt_reach_the_provider() {
    let primary = groq();
    let r = responder(Some(primary.clone()), None, rate_config(10, 100));

    r.respond("u1", "first").await.unwrap();
    r.respond("u1", "second").await.unwrap();

    let turns = primary.last_turns();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0], Turn::system(DEFAULT_SYSTEM_PROMPT));
    assert_eq!(turns[1], Turn::user("first"));
    assert_eq!(turns[2], Turn::assistant("reply from groq"));
    assert_eq!(turns[3], Turn::user("second"));
}

#[tokio::test]
async fn custom_prompt_replaces_default() {
    let primary = groq();
    let prompts: Arc<dyn PromptStore> = Arc::new(MockPromptStore::with_prompt("u1", "Talk like a pirate."));
    let r = test_responder(Some(primary.clone()), None, rate_config(10, 100), prompts, ResponderConfig::default());

    r.respond("u1", "hi").await.unwrap();
    assert_eq!(primary.last_turns()[0], Turn::system("Talk like a pirate."));

    r.respond("u2", "hi").await.unwrap();
    assert_eq!(primary.last_turns()[0], Turn::system(DEFAULT_SYSTEM_PROMPT));
}

#[tokio::test]
async fn prompt_store_failure_uses_default() {
    let primary = groq();
    let prompts: Arc<dyn PromptStore> = Arc::new(MockPromptStore::failing());
    let r = test_responder(Some(primary.clone()), None, rate_config(10, 100), prompts, ResponderConfig::default());

    assert!(r.respond("u1", "hi").await.is_ok());
    assert_eq!(primary.last_turns()[0], Turn::system(DEFAULT_SYSTEM_PROMPT));
}

#[tokio::test]
async fn slow_prompt_store_times_out_to_default() {
    let primary = groq();
    let prompts: Arc<dyn PromptStore> = Arc::new(MockPromptStore::slow(Duration::from_millis(500)));
    let config = ResponderConfig { prompt_lookup_timeout: Duration::from_millis(20), ..ResponderConfig::default() };
    let r = test_responder(Some(primary.clone()), None, rate_config(10, 100), prompts, config);

    assert!(r.respond("u1", "hi").await.is_ok());
    assert_eq!(primary.last_turns()[0], Turn::system(DEFAULT_SYSTEM_PROMPT));
}

// =========================================================================
// rate limiting
// =========================================================================

#[tokio::test]
async fn rate_limited_message_touches_nothing() {
    let (primary, fallback) = (groq(), hf());
    let r = responder(Some(primary.clone()), Some(fallback.clone()), rate_config(1, 100));

    r.respond("u1", "one").await.unwrap();
    let err = r.respond("u1", "two").await.unwrap_err();

    match err {
        RespondError::RateLimited { retry_after_secs } => assert!((1..=60).contains(&retry_after_secs)),
        other => panic!("expected RateLimited, got {other:?}"),
    }
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 0);
    assert_eq!(r.conversations().get_context("u1").len(), 2);
    assert_eq!(r.rate_limiter().global_request_count(), 1);
    assert_eq!(r.stats().usage.rate_limited, 1);
}

#[tokio::test]
async fn exhausted_quota_routes_to_fallback() {
    let (primary, fallback) = (groq(), hf());
    let r = responder(Some(primary.clone()), Some(fallback.clone()), rate_config(10, 3));
    r.rate_limiter().consume_global();
    r.rate_limiter().consume_global();

    let reply = r.respond("u1", "hi").await.unwrap();
    assert_eq!(reply.provider, ProviderKind::Groq);
    assert_eq!(r.rate_limiter().global_request_count(), 3);
    assert!(!r.rate_limiter().has_global_capacity());

    let reply = r.respond("u1", "again").await.unwrap();
    assert_eq!(reply.provider, ProviderKind::HuggingFace);
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 1);
    assert_eq!(r.rate_limiter().global_request_count(), 3);
}

// =========================================================================
// failover
// =========================================================================

#[tokio::test]
async fn primary_auth_failure_falls_back_without_retry() {
    let primary = auth_failing_groq();
    let fallback = hf();
    let r = responder(Some(primary.clone()), Some(fallback.clone()), rate_config(10, 100));

    let reply = r.respond("u1", "hi").await.unwrap();
    assert_eq!(reply.provider, ProviderKind::HuggingFace);
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 1);
    assert_eq!(r.rate_limiter().global_request_count(), 0);

    let stats = r.stats();
    assert_eq!(stats.usage.provider_failures, 1);
    assert_eq!(stats.usage.fallback_successes, 1);
    assert!(stats.primary_cooldown_secs.is_some());
}

#[tokio::test]
async fn parked_primary_is_skipped_until_selection_changes() {
    let primary = auth_failing_groq();
    let fallback = hf();
    let r = responder(Some(primary.clone()), Some(fallback.clone()), rate_config(10, 100));

    r.respond("u1", "one").await.unwrap();
    r.respond("u1", "two").await.unwrap();
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 2);

    r.set_selection(ProviderSelection::Auto);
    let reply = r.respond("u1", "three").await.unwrap();
    assert_eq!(reply.provider, ProviderKind::Groq);
    assert_eq!(primary.calls(), 2);
}

#[tokio::test]
async fn auto_returns_to_primary_after_transient_failure() {
    let primary = MockProvider::scripted(ProviderKind::Groq, vec![Err(server_error(ProviderKind::Groq))]);
    let fallback = hf();
    let r = responder(Some(primary.clone()), Some(fallback.clone()), rate_config(10, 100));

    assert_eq!(r.respond("u1", "one").await.unwrap().provider, ProviderKind::HuggingFace);
    assert_eq!(r.respond("u1", "two").await.unwrap().provider, ProviderKind::Groq);
    assert_eq!(r.selection(), ProviderSelection::Auto);
}

#[tokio::test]
async fn global_reset_lifts_park() {
    let primary = auth_failing_groq();
    let r = responder(Some(primary.clone()), Some(hf()), rate_config(10, 100));

    r.respond("u1", "one").await.unwrap();
    assert!(r.stats().primary_cooldown_secs.is_some());
    r.reset_global();
    assert!(r.stats().primary_cooldown_secs.is_none());
    assert_eq!(r.respond("u1", "two").await.unwrap().provider, ProviderKind::Groq);
}

#[tokio::test]
async fn quota_day_rollover_lifts_park() {
    let primary = auth_failing_groq();
    let r = responder(Some(primary.clone()), Some(hf()), rate_config(10, 100));

    assert_eq!(r.respond("u1", "one").await.unwrap().provider, ProviderKind::HuggingFace);
    assert!(r.stats().primary_cooldown_secs.is_some());

    // Whichever path rolls the day over, the park ends with it.
    let past_midnight = r.rate_limiter().global_reset_at() + time::Duration::seconds(1);
    assert!(r.rate_limiter().reset_global_if_due_at(past_midnight));
    assert!(r.stats().primary_cooldown_secs.is_none());
    assert_eq!(r.respond("u1", "two").await.unwrap().provider, ProviderKind::Groq);
    assert_eq!(primary.calls(), 2);
}

#[tokio::test]
async fn both_failing_persists_nothing() {
    let primary = MockProvider::scripted(ProviderKind::Groq, vec![Err(server_error(ProviderKind::Groq))]);
    let fallback = MockProvider::scripted(
        ProviderKind::HuggingFace,
        vec![Err(ProviderError::ModelLoading { provider: ProviderKind::HuggingFace, estimated_secs: Some(20.0) })],
    );
    let r = responder(Some(primary.clone()), Some(fallback.clone()), rate_config(10, 100));

    let err = r.respond("u1", "hi").await.unwrap_err();
    assert!(matches!(err, RespondError::NoProviderAvailable));
    assert!(r.conversations().get_context("u1").is_empty());
    assert_eq!(r.rate_limiter().user_request_count("u1"), Some(1));
    assert_eq!(r.rate_limiter().global_request_count(), 0);

    let stats = r.stats();
    assert_eq!(stats.usage.provider_failures, 2);
    assert_eq!(stats.usage.terminal_failures, 1);
    assert_eq!(stats.last_provider, None);
}

#[tokio::test]
async fn no_configured_providers_is_terminal() {
    let r = responder(None, None, rate_config(10, 100));
    assert!(matches!(r.respond("u1", "hi").await, Err(RespondError::NoProviderAvailable)));
}

// =========================================================================
// forced selections
// =========================================================================

#[tokio::test]
async fn forced_fallback_never_calls_primary() {
    let (primary, fallback) = (groq(), hf());
    let r = responder(Some(primary.clone()), Some(fallback.clone()), rate_config(10, 100));
    r.set_selection(ProviderSelection::ForcedFallback);

    assert_eq!(r.respond("u1", "hi").await.unwrap().provider, ProviderKind::HuggingFace);
    assert_eq!(primary.calls(), 0);
}

#[tokio::test]
async fn forced_primary_ignores_park_but_not_quota() {
    let primary = auth_failing_groq();
    let fallback = hf();
    let r = responder(Some(primary.clone()), Some(fallback.clone()), rate_config(10, 1));
    r.set_selection(ProviderSelection::ForcedPrimary);

    // Fails, parks, falls back.
    assert_eq!(r.respond("u1", "one").await.unwrap().provider, ProviderKind::HuggingFace);
    // Parked, but forced: primary is tried again and uses the last unit.
    assert_eq!(r.respond("u1", "two").await.unwrap().provider, ProviderKind::Groq);
    // Quota gone.
    assert_eq!(r.respond("u1", "three").await.unwrap().provider, ProviderKind::HuggingFace);
    assert_eq!(primary.calls(), 2);
}

#[test]
fn selection_serializes_as_admin_values() {
    assert_eq!(serde_json::to_value(ProviderSelection::Auto).unwrap(), "auto");
    assert_eq!(serde_json::to_value(ProviderSelection::ForcedPrimary).unwrap(), "primary");
    let parsed: ProviderSelection = serde_json::from_str("\"fallback\"").unwrap();
    assert_eq!(parsed, ProviderSelection::ForcedFallback);
}

// =========================================================================
// per-user serialization + housekeeping
// =========================================================================

#[tokio::test]
async fn concurrent_messages_from_one_user_both_persist() {
    let r = Arc::new(responder(Some(groq()), None, rate_config(10, 100)));

    let (a, b) = tokio::join!(r.respond("u1", "a"), r.respond("u1", "b"));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(r.conversations().get_context("u1").len(), 4);
}

#[tokio::test]
async fn idle_locks_are_pruned() {
    let r = responder(Some(groq()), None, rate_config(10, 100));
    r.respond("u1", "hi").await.unwrap();
    r.respond("u2", "hi").await.unwrap();
    assert_eq!(r.prune_idle_locks(), 2);
    assert_eq!(r.prune_idle_locks(), 0);
}

#[tokio::test]
async fn health_reports_each_configured_provider() {
    let primary = auth_failing_groq();
    let r = responder(Some(primary), Some(hf()), rate_config(10, 100));

    let report = r.provider_health().await;
    assert_eq!(report.len(), 2);
    assert_eq!((report[0].provider, report[0].role, report[0].healthy), (ProviderKind::Groq, "primary", false));
    assert_eq!((report[1].provider, report[1].role, report[1].healthy), (ProviderKind::HuggingFace, "fallback", true));
    assert_eq!(r.rate_limiter().global_request_count(), 0);
}

#[test]
fn respond_errors_carry_codes() {
    let limited = RespondError::RateLimited { retry_after_secs: 12 };
    assert_eq!(limited.error_code(), "E_RATE_LIMITED");
    assert!(limited.to_string().contains("12 seconds"));
    assert_eq!(RespondError::NoProviderAvailable.error_code(), "E_NO_PROVIDER");
}

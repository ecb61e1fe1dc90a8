//! Responder — one inbound chat message in, one reply out.
//!
//! DESIGN
//! ======
//! Each message runs the same pipeline:
//!
//! 1. Rate check. A rejected message touches nothing else.
//! 2. Context fetch, under a per-user async lock held until persist, so two
//!    messages from one user never interleave their reads and writes.
//! 3. Prompt resolve. The user's stored prompt, else the default. Lookup
//!    errors and timeouts fall back to the default.
//! 4. Primary attempt, if the primary is eligible (see [`ProviderSelection`]).
//!    Success consumes one unit of the daily quota.
//! 5. Fallback attempt, whenever the primary was skipped or failed.
//! 6. Persist the user turn then the assistant turn, only on success.
//!
//! Provider errors never reach the caller. They are logged and either feed
//! the next step or collapse into [`RespondError::NoProviderAvailable`].
//!
//! PROVIDER SELECTION
//! ==================
//! `Auto` re-evaluates the primary on every message: it must have quota
//! left and must not be parked after an authentication failure. The park
//! lasts `primary_auth_cooldown` and is lifted early by an admin selection
//! change or a global quota reset.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::config::{env_parse, env_string};
use crate::conversation::ConversationStore;
use crate::error::ErrorCode;
use crate::llm::ChatProvider;
use crate::llm::types::{Generation, ProviderError, ProviderKind, Role, Turn};
use crate::rate_limit::{GlobalReservation, RateLimiter};
use crate::services::prompt::PromptStore;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly assistant in a Discord server. \
     Keep answers concise, use Markdown sparingly, and say so when you are unsure.";
const DEFAULT_PROMPT_LOOKUP_TIMEOUT_MS: u64 = 2000;
const DEFAULT_PRIMARY_AUTH_COOLDOWN_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub default_system_prompt: String,
    pub prompt_lookup_timeout: Duration,
    pub primary_auth_cooldown: Duration,
}

impl ResponderConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            default_system_prompt: env_string("DEFAULT_SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            prompt_lookup_timeout: Duration::from_millis(env_parse(
                "PROMPT_LOOKUP_TIMEOUT_MS",
                DEFAULT_PROMPT_LOOKUP_TIMEOUT_MS,
            )),
            primary_auth_cooldown: Duration::from_secs(env_parse(
                "PRIMARY_AUTH_COOLDOWN_SECS",
                DEFAULT_PRIMARY_AUTH_COOLDOWN_SECS,
            )),
        }
    }
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            prompt_lookup_timeout: Duration::from_millis(DEFAULT_PROMPT_LOOKUP_TIMEOUT_MS),
            primary_auth_cooldown: Duration::from_secs(DEFAULT_PRIMARY_AUTH_COOLDOWN_SECS),
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// Which provider the responder prefers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSelection {
    /// Primary when eligible, else fallback. Decided per message.
    #[default]
    Auto,
    /// Primary whenever quota allows, even while parked.
    #[serde(rename = "primary")]
    ForcedPrimary,
    /// Never call the primary.
    #[serde(rename = "fallback")]
    ForcedFallback,
}

#[derive(Debug, thiserror::Error)]
pub enum RespondError {
    #[error("You're sending messages too quickly. Please wait {retry_after_secs} seconds and try again.")]
    RateLimited { retry_after_secs: u64 },
    #[error("Sorry, I'm having trouble responding right now. Please try again in a few minutes.")]
    NoProviderAvailable,
}

impl ErrorCode for RespondError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "E_RATE_LIMITED",
            Self::NoProviderAvailable => "E_NO_PROVIDER",
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

/// A reply ready for the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub content: String,
    pub provider: ProviderKind,
}

#[derive(Debug, Default)]
struct UsageCounters {
    primary_successes: AtomicU64,
    primary_prompt_tokens: AtomicU64,
    primary_completion_tokens: AtomicU64,
    fallback_successes: AtomicU64,
    provider_failures: AtomicU64,
    terminal_failures: AtomicU64,
    rate_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub primary_successes: u64,
    pub primary_prompt_tokens: u64,
    pub primary_completion_tokens: u64,
    pub fallback_successes: u64,
    pub provider_failures: u64,
    pub terminal_failures: u64,
    pub rate_limited: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponderStats {
    pub selection: ProviderSelection,
    pub primary_configured: bool,
    pub fallback_configured: bool,
    /// Seconds left on the primary's authentication park, if parked.
    pub primary_cooldown_secs: Option<u64>,
    pub last_provider: Option<ProviderKind>,
    pub usage: UsageStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: ProviderKind,
    pub role: &'static str,
    pub healthy: bool,
}

#[derive(Debug, Default)]
struct Routing {
    selection: ProviderSelection,
    park: Option<Park>,
    last_provider: Option<ProviderKind>,
}

/// Authentication park on the primary. Ends at `until` or when the daily
/// quota rolls over past `quota_reset_at`, whichever comes first.
#[derive(Debug, Clone, Copy)]
struct Park {
    until: Instant,
    quota_reset_at: OffsetDateTime,
}

// =============================================================================
// RESPONDER
// =============================================================================

pub struct Responder {
    rate_limiter: RateLimiter,
    conversations: ConversationStore,
    prompts: Arc<dyn PromptStore>,
    primary: Option<Arc<dyn ChatProvider>>,
    fallback: Option<Arc<dyn ChatProvider>>,
    config: ResponderConfig,
    routing: Mutex<Routing>,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    usage: UsageCounters,
}

impl Responder {
    #[must_use]
    pub fn new(
        rate_limiter: RateLimiter,
        conversations: ConversationStore,
        prompts: Arc<dyn PromptStore>,
        primary: Option<Arc<dyn ChatProvider>>,
        fallback: Option<Arc<dyn ChatProvider>>,
        config: ResponderConfig,
    ) -> Self {
        Self {
            rate_limiter,
            conversations,
            prompts,
            primary,
            fallback,
            config,
            routing: Mutex::new(Routing::default()),
            user_locks: Mutex::new(HashMap::new()),
            usage: UsageCounters::default(),
        }
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    #[must_use]
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    #[must_use]
    pub fn prompts(&self) -> &Arc<dyn PromptStore> {
        &self.prompts
    }

    fn routing(&self) -> std::sync::MutexGuard<'_, Routing> {
        self.routing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle one inbound message from `user_id`.
    ///
    /// # Errors
    ///
    /// `RateLimited` when the user is over their window (nothing else is
    /// touched), `NoProviderAvailable` when no provider produced a reply.
    pub async fn respond(&self, user_id: &str, message: &str) -> Result<Reply, RespondError> {
        // PHASE: RATE CHECK
        if !self.rate_limiter.admit_user(user_id) {
            self.usage.rate_limited.fetch_add(1, Ordering::Relaxed);
            let retry_after_secs = self
                .rate_limiter
                .retry_after(user_id)
                .map_or(1, |d| d.as_secs() + u64::from(d.subsec_nanos() > 0));
            info!(
                %user_id,
                retry_after_secs,
                window_count = self.rate_limiter.user_request_count(user_id),
                "responder: user rate limited"
            );
            return Err(RespondError::RateLimited { retry_after_secs });
        }

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        // PHASE: CONTEXT FETCH + PROMPT RESOLVE
        let history = self.conversations.get_context(user_id);
        let system_prompt = self.resolve_system_prompt(user_id).await;

        let mut turns = Vec::with_capacity(history.len() + 2);
        turns.push(Turn::system(system_prompt));
        turns.extend(history.into_iter().filter(|t| !t.is_system()));
        turns.push(Turn::user(message));

        // PHASE: PROVIDER ATTEMPTS
        let generation = self.generate(user_id, &turns).await?;

        // PHASE: PERSIST
        self.conversations.add_message(user_id, Role::User, message);
        self.conversations
            .add_message(user_id, Role::Assistant, generation.content.clone());
        debug!(%user_id, turns = self.conversations.turn_count(user_id), "responder: turn persisted");

        Ok(Reply { content: generation.content, provider: generation.provider })
    }

    async fn generate(&self, user_id: &str, turns: &[Turn]) -> Result<Generation, RespondError> {
        if let Some(primary) = &self.primary {
            if let Some(reservation) = self.reserve_primary(Instant::now()) {
                match primary.generate(turns).await {
                    Ok(generation) => {
                        self.record_success(&generation);
                        info!(
                            %user_id,
                            provider = %generation.provider,
                            model = %generation.model,
                            global_count = reservation.count(),
                            "responder: primary replied"
                        );
                        return Ok(generation);
                    }
                    Err(e) => {
                        self.rate_limiter.release_global(reservation);
                        self.record_failure(user_id, primary.kind(), &e, true);
                    }
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            match fallback.generate(turns).await {
                Ok(generation) => {
                    self.record_success(&generation);
                    info!(
                        %user_id,
                        provider = %generation.provider,
                        model = %generation.model,
                        "responder: fallback replied"
                    );
                    return Ok(generation);
                }
                Err(e) => self.record_failure(user_id, fallback.kind(), &e, false),
            }
        }

        self.usage.terminal_failures.fetch_add(1, Ordering::Relaxed);
        error!(%user_id, "responder: no provider available");
        Err(RespondError::NoProviderAvailable)
    }

    /// Claim a quota unit for the primary when the selection and park allow
    /// a call. Only successful calls keep their unit.
    fn reserve_primary(&self, now: Instant) -> Option<GlobalReservation> {
        match self.selection() {
            ProviderSelection::ForcedFallback => None,
            ProviderSelection::ForcedPrimary => self.rate_limiter.try_reserve_global(),
            ProviderSelection::Auto => {
                // Capacity first: it rolls the quota day over, which ends a park.
                if !self.rate_limiter.has_global_capacity() || self.park_remaining(now).is_some() {
                    return None;
                }
                self.rate_limiter.try_reserve_global()
            }
        }
    }

    /// Time left on the primary's park, if one is still in force.
    fn park_remaining(&self, now: Instant) -> Option<Duration> {
        let park = self.routing().park?;
        let rolled_over = OffsetDateTime::now_utc() >= park.quota_reset_at
            || park.quota_reset_at != self.rate_limiter.global_reset_at();
        if rolled_over {
            return None;
        }
        park.until.checked_duration_since(now).filter(|d| !d.is_zero())
    }

    fn record_success(&self, generation: &Generation) {
        match generation.provider {
            ProviderKind::Groq => {
                self.usage.primary_successes.fetch_add(1, Ordering::Relaxed);
                if let Some(usage) = generation.usage {
                    self.usage
                        .primary_prompt_tokens
                        .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
                    self.usage
                        .primary_completion_tokens
                        .fetch_add(usage.completion_tokens, Ordering::Relaxed);
                }
            }
            ProviderKind::HuggingFace => {
                self.usage.fallback_successes.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.routing().last_provider = Some(generation.provider);
    }

    fn record_failure(&self, user_id: &str, provider: ProviderKind, err: &ProviderError, is_primary: bool) {
        self.usage.provider_failures.fetch_add(1, Ordering::Relaxed);
        let code = err.error_code();
        let status = err.status();
        let body = err.body_excerpt();
        if err.is_authentication() {
            error!(%user_id, %provider, code, ?status, body, error = %err, "responder: provider rejected credentials");
            if is_primary {
                let park = Park {
                    until: Instant::now() + self.config.primary_auth_cooldown,
                    quota_reset_at: self.rate_limiter.global_reset_at(),
                };
                self.routing().park = Some(park);
            }
        } else {
            warn!(%user_id, %provider, code, ?status, body, error = %err, "responder: provider failed");
        }
    }

    async fn resolve_system_prompt(&self, user_id: &str) -> String {
        let lookup = self.prompts.get_user_prompt(user_id);
        match tokio::time::timeout(self.config.prompt_lookup_timeout, lookup).await {
            Ok(Ok(Some(prompt))) if !prompt.trim().is_empty() => prompt,
            Ok(Ok(_)) => self.config.default_system_prompt.clone(),
            Ok(Err(e)) => {
                warn!(%user_id, error = %e, "responder: prompt lookup failed; using default");
                self.config.default_system_prompt.clone()
            }
            Err(_) => {
                warn!(%user_id, "responder: prompt lookup timed out; using default");
                self.config.default_system_prompt.clone()
            }
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(user_id.to_string()).or_default().clone()
    }

    /// Drop per-user locks nobody holds or waits on. Returns how many went.
    pub fn prune_idle_locks(&self) -> usize {
        let mut locks = self.user_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    // -------------------------------------------------------------------------
    // admin
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn selection(&self) -> ProviderSelection {
        self.routing().selection
    }

    /// Force or release the provider preference. Also lifts any park.
    pub fn set_selection(&self, selection: ProviderSelection) {
        let mut routing = self.routing();
        routing.selection = selection;
        routing.park = None;
        info!(?selection, "responder: provider selection changed");
    }

    /// Lift the primary's authentication park.
    pub fn clear_primary_cooldown(&self) {
        self.routing().park = None;
    }

    /// Zero the daily quota and give the primary a fresh chance.
    pub fn reset_global(&self) -> u64 {
        let previous = self.rate_limiter.reset_global();
        self.clear_primary_cooldown();
        previous
    }

    #[must_use]
    pub fn stats(&self) -> ResponderStats {
        let primary_cooldown_secs = self.park_remaining(Instant::now()).map(|d| d.as_secs());
        let (selection, last_provider) = {
            let routing = self.routing();
            (routing.selection, routing.last_provider)
        };
        ResponderStats {
            selection,
            primary_configured: self.primary.is_some(),
            fallback_configured: self.fallback.is_some(),
            primary_cooldown_secs,
            last_provider,
            usage: UsageStats {
                primary_successes: self.usage.primary_successes.load(Ordering::Relaxed),
                primary_prompt_tokens: self.usage.primary_prompt_tokens.load(Ordering::Relaxed),
                primary_completion_tokens: self.usage.primary_completion_tokens.load(Ordering::Relaxed),
                fallback_successes: self.usage.fallback_successes.load(Ordering::Relaxed),
                provider_failures: self.usage.provider_failures.load(Ordering::Relaxed),
                terminal_failures: self.usage.terminal_failures.load(Ordering::Relaxed),
                rate_limited: self.usage.rate_limited.load(Ordering::Relaxed),
            },
        }
    }

    /// Probe each configured provider with a canned request. Probes do not
    /// count against the daily quota.
    pub async fn provider_health(&self) -> Vec<ProviderHealth> {
        let mut report = Vec::with_capacity(2);
        for (role, provider) in [("primary", &self.primary), ("fallback", &self.fallback)] {
            let Some(provider) = provider else {
                continue;
            };
            let healthy = provider.test_connection().await;
            if !healthy {
                warn!(provider = %provider.kind(), role, "responder: health probe failed");
            }
            report.push(ProviderHealth { provider: provider.kind(), role, healthy });
        }
        report
    }
}

#[cfg(test)]
#[path = "responder_test.rs"]
mod tests;

//! Background scheduling of delayed and retried deliveries
//!
//! The queue is in-memory only: a process restart loses pending scheduled
//! posts. Wiring in a durable store is a caller concern; nothing here hides
//! the limitation.
//!
//! One long-lived task scans the queue every poll interval. Due posts are
//! dispatched concurrently, bounded by a semaphore so a slow platform cannot
//! starve the rest, and a failure in one dispatch never halts the loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::publisher::PublisherClient;
use crate::resilience::RetryPolicy;
use crate::types::{Content, PublishStatus, ScheduleStatus, ScheduledPost};

/// Shared in-memory queue of scheduled posts.
///
/// Every mutation goes through a transition check; an illegal transition is
/// logged and ignored rather than corrupting the lifecycle.
#[derive(Clone)]
pub struct ScheduleStore {
    posts: Arc<Mutex<HashMap<String, ScheduledPost>>>,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self {
            posts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue a post for future delivery. Returns the queue id.
    pub fn enqueue(&self, content: Content, platform: &str, scheduled_at: i64) -> String {
        let post = ScheduledPost::new(content, platform, scheduled_at);
        let id = post.id.clone();
        debug!(post_id = id.as_str(), platform, scheduled_at, "post enqueued");
        self.posts.lock().unwrap().insert(id.clone(), post);
        id
    }

    /// Cancel a post. Idempotent and infallible: the first call on a pending
    /// post cancels it, the first call on an in-flight post prevents future
    /// attempts, anything else is a no-op returning false.
    pub fn cancel(&self, post_id: &str) -> bool {
        let mut posts = self.posts.lock().unwrap();
        let Some(post) = posts.get_mut(post_id) else {
            return false;
        };

        match post.status {
            ScheduleStatus::Scheduled => {
                post.status = ScheduleStatus::Cancelled;
                info!(post_id, "scheduled post cancelled");
                true
            }
            ScheduleStatus::Publishing if !post.cancel_requested => {
                // Cooperative: the in-flight dispatch finishes, but no
                // retry will be scheduled afterwards.
                post.cancel_requested = true;
                info!(post_id, "cancel requested for in-flight post");
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, post_id: &str) -> Option<ScheduledPost> {
        self.posts.lock().unwrap().get(post_id).cloned()
    }

    /// Claim every due post: marks them Publishing, bumps their attempt
    /// counter, and returns snapshots ordered by scheduled time.
    pub fn claim_due(&self, now: i64) -> Vec<ScheduledPost> {
        let mut posts = self.posts.lock().unwrap();
        let mut due: Vec<ScheduledPost> = Vec::new();

        for post in posts.values_mut() {
            if post.status == ScheduleStatus::Scheduled && post.scheduled_at <= now {
                post.status = ScheduleStatus::Publishing;
                post.attempts += 1;
                due.push(post.clone());
            }
        }

        due.sort_by_key(|p| p.scheduled_at);
        due
    }

    /// Record a successful delivery: Publishing -> Published.
    pub fn complete(&self, post_id: &str, external_id: &str) {
        self.transition(post_id, ScheduleStatus::Published, |post| {
            post.last_error = None;
            post.metadata_note(external_id);
        });
    }

    /// Record a terminal failure: Publishing -> Failed.
    pub fn fail(&self, post_id: &str, error: &str) {
        self.transition(post_id, ScheduleStatus::Failed, |post| {
            post.last_error = Some(error.to_string());
        });
    }

    /// Put a post back in the queue for a later attempt, unless a cancel
    /// arrived while it was in flight — then it goes terminal Cancelled.
    pub fn reschedule(&self, post_id: &str, scheduled_at: i64, error: &str) {
        let mut posts = self.posts.lock().unwrap();
        let Some(post) = posts.get_mut(post_id) else {
            warn!(post_id, "reschedule for unknown post ignored");
            return;
        };

        if post.cancel_requested {
            if ScheduleStatus::can_transition(post.status, ScheduleStatus::Cancelled) {
                post.status = ScheduleStatus::Cancelled;
                post.last_error = Some(error.to_string());
                info!(post_id, "retry suppressed by pending cancel");
            }
            return;
        }

        if ScheduleStatus::can_transition(post.status, ScheduleStatus::Scheduled) {
            post.status = ScheduleStatus::Scheduled;
            post.scheduled_at = scheduled_at;
            post.last_error = Some(error.to_string());
            debug!(post_id, scheduled_at, "post rescheduled");
        } else {
            warn!(
                post_id,
                from = %post.status,
                "illegal reschedule ignored"
            );
        }
    }

    /// Number of posts still awaiting delivery.
    pub fn pending_count(&self) -> usize {
        self.posts
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.status == ScheduleStatus::Scheduled)
            .count()
    }

    fn transition(
        &self,
        post_id: &str,
        to: ScheduleStatus,
        update: impl FnOnce(&mut ScheduledPost),
    ) {
        let mut posts = self.posts.lock().unwrap();
        let Some(post) = posts.get_mut(post_id) else {
            warn!(post_id, "transition for unknown post ignored");
            return;
        };

        if ScheduleStatus::can_transition(post.status, to) {
            post.status = to;
            update(post);
        } else {
            warn!(post_id, from = %post.status, to = %to, "illegal transition ignored");
        }
    }
}

impl Default for ScheduleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduledPost {
    fn metadata_note(&mut self, external_id: &str) {
        self.metadata_set("external_id", external_id);
    }

    fn metadata_set(&mut self, key: &str, value: &str) {
        let mut map = self
            .content
            .metadata
            .as_deref()
            .and_then(|m| serde_json::from_str::<serde_json::Value>(m).ok())
            .filter(|v| v.is_object())
            .unwrap_or_else(|| serde_json::json!({}));
        map[key] = serde_json::Value::String(value.to_string());
        self.content.metadata = Some(map.to_string());
    }
}

/// The background loop driving the queue.
pub struct Scheduler {
    publisher: Arc<PublisherClient>,
    store: ScheduleStore,
    config: SchedulerConfig,
    backoff: RetryPolicy,
    in_flight: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(publisher: Arc<PublisherClient>) -> Self {
        let config = publisher.scheduler_config().clone();
        let backoff = RetryPolicy::new(
            config.max_attempts,
            Duration::from_secs(config.retry_base_delay_secs),
            Duration::from_secs(config.retry_max_delay_secs),
            0.25,
        );
        let in_flight = Arc::new(Semaphore::new(config.max_in_flight));

        Self {
            store: publisher.schedule_store(),
            publisher,
            config,
            backoff,
            in_flight,
        }
    }

    /// Run the poll loop until `shutdown` is set. The sleep between ticks
    /// checks the flag every second so shutdown stays prompt.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        info!(
            poll_interval = self.config.poll_interval_secs,
            max_in_flight = self.config.max_in_flight,
            "scheduler loop starting"
        );

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested, stopping scheduler loop");
                break;
            }

            self.run_once().await;

            for _ in 0..self.config.poll_interval_secs {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                sleep(Duration::from_secs(1)).await;
            }
        }
    }

    /// One tick: claim due posts and dispatch them concurrently.
    pub async fn run_once(&self) {
        let now = chrono::Utc::now().timestamp();
        let due = self.store.claim_due(now);
        if due.is_empty() {
            return;
        }

        info!(count = due.len(), "dispatching due posts");

        let mut tasks = JoinSet::new();
        for post in due {
            let Ok(permit) = self.in_flight.clone().acquire_owned().await else {
                // Semaphore closed only on shutdown teardown
                break;
            };
            let publisher = Arc::clone(&self.publisher);
            let store = self.store.clone();
            let backoff = self.backoff.clone();
            let max_attempts = self.config.max_attempts;

            tasks.spawn(async move {
                let _permit = permit;
                process_post(publisher, store, backoff, max_attempts, post).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                // A panicking dispatch must not take the loop down with it
                error!("scheduled dispatch task failed: {e}");
            }
        }
    }

    pub fn store(&self) -> ScheduleStore {
        self.store.clone()
    }
}

async fn process_post(
    publisher: Arc<PublisherClient>,
    store: ScheduleStore,
    backoff: RetryPolicy,
    max_attempts: u32,
    post: ScheduledPost,
) {
    let result = match publisher.dispatch_now(&post.content, &post.platform).await {
        Ok(result) => result,
        Err(e) => {
            error!(post_id = post.id.as_str(), "dispatch rejected: {e}");
            store.fail(&post.id, &e.to_string());
            return;
        }
    };

    let now = chrono::Utc::now().timestamp();
    match result.status {
        PublishStatus::Published => {
            let external_id = result.external_id.as_deref().unwrap_or_default();
            info!(
                post_id = post.id.as_str(),
                platform = post.platform.as_str(),
                external_id,
                "scheduled post published"
            );
            store.complete(&post.id, external_id);
        }
        PublishStatus::Rejected => {
            // Validation failures are terminal; retrying cannot fix them
            store.fail(&post.id, &result.issues.join("; "));
        }
        PublishStatus::RateLimited => {
            let fallback = now + backoff.jittered_backoff(post.attempts).as_secs() as i64;
            let at = result.retry_after.unwrap_or(fallback).max(now + 1);
            retry_or_fail(&store, max_attempts, &post, at, "rate limited");
        }
        PublishStatus::Failed => {
            let reschedulable = result
                .failure
                .map(|kind| kind.is_reschedulable())
                .unwrap_or(true);
            let error = result.error.unwrap_or_else(|| "delivery failed".to_string());

            if reschedulable {
                let at = now + backoff.jittered_backoff(post.attempts).as_secs() as i64;
                retry_or_fail(&store, max_attempts, &post, at, &error);
            } else {
                store.fail(&post.id, &error);
            }
        }
        PublishStatus::Scheduled => {
            // dispatch_now never schedules; treat as a lost post rather
            // than silently dropping it
            warn!(post_id = post.id.as_str(), "unexpected scheduled result");
            store.fail(&post.id, "internal: dispatch returned scheduled");
        }
    }
}

fn retry_or_fail(
    store: &ScheduleStore,
    max_attempts: u32,
    post: &ScheduledPost,
    scheduled_at: i64,
    error: &str,
) {
    if post.attempts < max_attempts {
        warn!(
            post_id = post.id.as_str(),
            attempt = post.attempts,
            max_attempts,
            scheduled_at,
            "delivery failed, rescheduling: {error}"
        );
        store.reschedule(&post.id, scheduled_at, error);
    } else {
        warn!(
            post_id = post.id.as_str(),
            attempts = post.attempts,
            "retries exhausted, marking failed: {error}"
        );
        store.fail(&post.id, error);
    }
}

// Background maintenance tasks: dead pack removal and action expiry

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::registry::PackRegistry;
use super::storage::ActionStore;

/// First occurrence of `at` (UTC) strictly after `now`
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = Utc.from_utc_datetime(&now.date_naive().and_time(at));
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Remove packs not seen within `grace`, once a day at `at` (UTC)
pub fn spawn_dead_pack_sweeper(
    registry: Arc<PackRegistry>,
    at: NaiveTime,
    grace: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = next_daily_run(now, at);
            info!("🕛 Next dead pack sweep at {}", next.to_rfc3339());
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if let Err(e) = registry.sweep_dead(grace).await {
                error!("dead pack sweep failed: {}", e);
            }
        }
    })
}

/// Delete actions older than `ttl`, every `every`
pub fn spawn_action_expiry(
    actions: Arc<dyn ActionStore>,
    every: std::time::Duration,
    ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match actions.expire(ttl).await {
                Ok(0) => {}
                Ok(removed) => info!("⌛ Expired {} action(s)", removed),
                Err(e) => error!("action expiry failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::InMemoryActionStore;
    use crate::models::{Action, Event, Labels, Pack};
    use serde_json::json;

    fn utc(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_next_daily_run() {
        let at = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        assert_eq!(
            next_daily_run(utc("2024-03-05T10:00:00Z"), at),
            utc("2024-03-05T23:00:00Z")
        );
        assert_eq!(
            next_daily_run(utc("2024-03-05T23:00:00Z"), at),
            utc("2024-03-06T23:00:00Z")
        );
        assert_eq!(
            next_daily_run(utc("2024-12-31T23:30:00Z"), at),
            utc("2025-01-01T23:00:00Z")
        );
    }

    #[tokio::test]
    async fn test_action_expiry_task_removes_old_actions() {
        let store = Arc::new(InMemoryActionStore::new());
        let pack = Pack::new("Slack", Labels::new());
        let trigger = Event::new("MessageSent", &pack, json!({}), None);

        let mut old = Action::new("SendMessage", "Slack", Labels::new(), json!({}), trigger.clone());
        old.state.time = Utc::now() - Duration::days(2);
        let fresh = Action::new("SendMessage", "Slack", Labels::new(), json!({}), trigger);
        store.add(old.clone()).await.unwrap();
        store.add(fresh.clone()).await.unwrap();

        let task = spawn_action_expiry(
            store.clone(),
            std::time::Duration::from_millis(10),
            Duration::days(1),
        );
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        task.abort();

        assert!(store.get(&old.id).await.unwrap().is_none());
        assert!(store.get(&fresh.id).await.unwrap().is_some());
    }
}

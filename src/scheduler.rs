use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::AppConfig;
use crate::relay::Relay;

/// Absent timestamps are always stale.
pub fn needs_refresh(last: Option<DateTime<Utc>>, now: DateTime<Utc>, staleness: Duration) -> bool {
    match last {
        Some(last) => now - last > staleness,
        None => true,
    }
}

/// One heartbeat: refreshes the remote cache when it is stale. Returns
/// whether a refresh was attempted.
pub async fn refresh_if_stale(relay: &Relay, now: DateTime<Utc>, staleness: Duration) -> bool {
    let last = relay.store().remote_events_updated().unwrap_or_else(|err| {
        tracing::warn!("failed to read remote cache timestamp: {err}");
        None
    });
    if !needs_refresh(last, now, staleness) {
        tracing::debug!(last = ?last, "remote events still fresh");
        return false;
    }
    tracing::info!(last = ?last, "refreshing remote events");
    if let Err(err) = relay.fetch_remote_events().await {
        tracing::warn!("failed to refresh remote events: {err}");
    }
    true
}

/// Starts the heartbeat. The first check runs one full period after start.
pub fn init(relay: Arc<Relay>, config: &AppConfig) -> JoinHandle<()> {
    let period = config.refresh_interval();
    let staleness = config.staleness();
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tracing::debug!("heartbeat");
            refresh_if_stale(&relay, Utc::now(), staleness).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::remote::tests::FakeTransport;
    use crate::remote::EventsApi;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn relay_with_calls() -> (Relay, Arc<AtomicUsize>) {
        let transport = FakeTransport::new(200, r#"[{"id":"a"}]"#);
        let calls = transport.calls.clone();
        let store = Arc::new(Store::open_in_memory().expect("store"));
        store.set_api_token("secret").expect("token");
        let relay = Relay::new(store, EventsApi::new("https://api.test", Box::new(transport)));
        (relay, calls)
    }

    #[test]
    fn staleness_boundaries() {
        let now = Utc::now();
        let five = Duration::minutes(5);
        assert!(needs_refresh(None, now, five));
        assert!(needs_refresh(Some(now - Duration::minutes(6)), now, five));
        assert!(!needs_refresh(Some(now - Duration::minutes(4)), now, five));
        assert!(!needs_refresh(Some(now - five), now, five));
    }

    #[tokio::test]
    async fn stale_cache_triggers_exactly_one_call() {
        let (relay, calls) = relay_with_calls();
        let now = Utc::now();
        relay
            .store()
            .put_remote_events(&[], now - Duration::minutes(10))
            .expect("seed cache");

        assert!(refresh_if_stale(&relay, now, Duration::minutes(5)).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_cache_triggers_no_call() {
        let (relay, calls) = relay_with_calls();
        let now = Utc::now();
        relay
            .store()
            .put_remote_events(&[], now - Duration::minutes(2))
            .expect("seed cache");

        assert!(!refresh_if_stale(&relay, now, Duration::minutes(5)).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_refreshes_once_then_waits_for_staleness() {
        let (relay, calls) = relay_with_calls();
        let handle = init(Arc::new(relay), &AppConfig::default());

        tokio::time::sleep(std::time::Duration::from_secs(29)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(std::time::Duration::from_secs(90)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        handle.abort();
    }
}

//! Periodic poll loop.
//!
//! Each tick selects at most `concurrency` due feeds, ingests them in parallel
//! and waits for all of them before the next tick may start. A feed therefore
//! never has two ingest passes in flight.

use crate::feed::FeedFetcher;
use crate::ingest::IngestWorker;
use crate::storage::Database;
use futures::stream::{self, StreamExt};
use std::num::NonZeroUsize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Poll interval must be greater than zero")]
    ZeroInterval,
}

/// Outcome counts of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub selected: usize,
    pub succeeded: usize,
    /// Feeds whose fetch or mark-fetched failed, or whose task panicked
    pub failed: usize,
}

pub struct PollScheduler {
    db: Database,
    worker: IngestWorker,
    concurrency: NonZeroUsize,
    interval: Duration,
}

impl PollScheduler {
    pub fn new(
        db: Database,
        fetcher: FeedFetcher,
        concurrency: NonZeroUsize,
        interval: Duration,
    ) -> Result<Self, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::ZeroInterval);
        }

        Ok(Self {
            worker: IngestWorker::new(db.clone(), fetcher),
            db,
            concurrency,
            interval,
        })
    }

    /// Poll immediately, then every `interval` until `shutdown` turns `true`.
    ///
    /// The interval is measured between tick starts. When a tick overruns it,
    /// the missed ticks are skipped rather than run back to back. A tick in
    /// progress when shutdown is requested runs to completion first. Dropping
    /// the sender also stops the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            concurrency = self.concurrency.get(),
            interval_secs = self.interval.as_secs_f64(),
            "Starting feed poller"
        );

        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = timer.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            self.tick().await;
        }

        tracing::info!("Feed poller stopped");
    }

    /// Run one poll cycle and wait for every dispatched feed to finish.
    ///
    /// A failure to select feeds is logged and yields an empty report; the
    /// next tick simply tries again.
    pub async fn tick(&self) -> TickReport {
        let feeds = match self.db.select_due_feeds(self.concurrency.get()).await {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::error!(error = %e, "Failed to select due feeds, skipping tick");
                return TickReport::default();
            }
        };

        if feeds.is_empty() {
            tracing::debug!("No feeds due for refresh");
            return TickReport::default();
        }

        let selected = feeds.len();
        let outcomes: Vec<bool> = stream::iter(feeds)
            .map(|feed| {
                let worker = self.worker.clone();
                let feed_id = feed.id;

                async move {
                    // A task per feed so a panic stays inside that feed
                    match tokio::spawn(async move { worker.ingest(&feed).await }).await {
                        Ok(Ok(_)) => true,
                        // Already logged by the worker
                        Ok(Err(_)) => false,
                        Err(e) => {
                            tracing::error!(feed_id = feed_id, error = %e, "Ingest task failed");
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency.get())
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|ok| **ok).count();
        let report = TickReport {
            selected,
            succeeded,
            failed: selected - succeeded,
        };

        tracing::info!(
            selected = report.selected,
            succeeded = report.succeeded,
            failed = report.failed,
            "Tick complete"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(links: &[&str]) -> String {
        let items: String = links
            .iter()
            .map(|link| {
                format!(
                    "<item><title>{0}</title><link>{0}</link><pubDate>Mon, 02 Jan 2006 15:04:05 -0700</pubDate></item>",
                    link
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel>{}</channel></rss>"#,
            items
        )
    }

    fn scheduler(db: &Database, concurrency: usize, interval: Duration) -> PollScheduler {
        PollScheduler::new(
            db.clone(),
            FeedFetcher::new(reqwest::Client::new()),
            NonZeroUsize::new(concurrency).unwrap(),
            interval,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let db = Database::open(":memory:").await.unwrap();

        let result = PollScheduler::new(
            db,
            FeedFetcher::new(reqwest::Client::new()),
            NonZeroUsize::new(1).unwrap(),
            Duration::ZERO,
        );
        assert!(matches!(result, Err(SchedulerError::ZeroInterval)));
    }

    #[tokio::test]
    async fn test_tick_waits_for_slow_feed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&["http://fast/1"])))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&["http://slow/1"]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let fast = db
            .insert_feed(&format!("{}/fast", mock_server.uri()), "Fast")
            .await
            .unwrap();
        let slow = db
            .insert_feed(&format!("{}/slow", mock_server.uri()), "Slow")
            .await
            .unwrap();

        let started = Instant::now();
        let report = scheduler(&db, 2, Duration::from_secs(60)).tick().await;

        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(
            report,
            TickReport {
                selected: 2,
                succeeded: 2,
                failed: 0
            }
        );
        assert_eq!(db.get_posts_for_feed(fast).await.unwrap().len(), 1);
        assert_eq!(db.get_posts_for_feed(slow).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_feed_selected_first_next_tick() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&["http://ok/1"])))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let ok = db
            .insert_feed(&format!("{}/ok", mock_server.uri()), "Ok")
            .await
            .unwrap();
        let down = db
            .insert_feed(&format!("{}/down", mock_server.uri()), "Down")
            .await
            .unwrap();

        let report = scheduler(&db, 2, Duration::from_secs(60)).tick().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);

        assert_eq!(db.get_feed(down).await.unwrap().unwrap().last_fetched, None);
        let due: Vec<i64> = db
            .select_due_feeds(2)
            .await
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(due, vec![down, ok]);
    }

    #[tokio::test]
    async fn test_panicking_feed_counted_as_failed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&["http://ok/1"])))
            .mount(&mock_server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let ok = db
            .insert_feed(&format!("{}/ok", mock_server.uri()), "Ok")
            .await
            .unwrap();
        let broken = db
            .insert_feed(&format!("{}/broken", mock_server.uri()), "Broken")
            .await
            .unwrap();

        let mut scheduler = scheduler(&db, 2, Duration::from_secs(60));
        scheduler.worker = scheduler.worker.clone().panic_on_feed(broken);

        let report = scheduler.tick().await;
        assert_eq!(
            report,
            TickReport {
                selected: 2,
                succeeded: 1,
                failed: 1,
            }
        );
        assert_eq!(db.get_posts_for_feed(ok).await.unwrap().len(), 1);
        assert_eq!(db.get_feed(broken).await.unwrap().unwrap().last_fetched, None);
    }

    #[tokio::test]
    async fn test_batch_limited_to_concurrency() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[])))
            .expect(2)
            .mount(&mock_server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        for i in 0..5 {
            db.insert_feed(&format!("{}/feed/{}", mock_server.uri(), i), "Feed")
                .await
                .unwrap();
        }

        let report = scheduler(&db, 2, Duration::from_secs(60)).tick().await;
        assert_eq!(report.selected, 2);
    }

    #[tokio::test]
    async fn test_select_failure_skips_tick() {
        let db = Database::open(":memory:").await.unwrap();
        db.insert_feed("http://127.0.0.1:1/feed", "Feed")
            .await
            .unwrap();
        let scheduler = scheduler(&db, 1, Duration::from_secs(60));

        db.pool.close().await;

        assert_eq!(scheduler.tick().await, TickReport::default());
    }

    #[tokio::test]
    async fn test_run_polls_immediately_and_stops_on_shutdown() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&["http://x/1"])))
            .mount(&mock_server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        db.insert_feed(&format!("{}/feed", mock_server.uri()), "Feed")
            .await
            .unwrap();

        let scheduler = scheduler(&db, 1, Duration::from_secs(3600));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        // The first tick does not wait for the interval
        let deadline = Instant::now() + Duration::from_secs(5);
        while db.count_posts().await.unwrap() == 0 {
            assert!(Instant::now() < deadline, "first tick never ran");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_lets_in_flight_tick_finish() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&["http://x/1", "http://x/2"]))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&mock_server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        db.insert_feed(&format!("{}/feed", mock_server.uri()), "Feed")
            .await
            .unwrap();

        let scheduler = scheduler(&db, 1, Duration::from_secs(3600));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        // Ask to stop while the delayed response is still in flight
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();

        assert_eq!(db.count_posts().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_already_stopped_never_ticks() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[])))
            .expect(0)
            .mount(&mock_server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        db.insert_feed(&format!("{}/feed", mock_server.uri()), "Feed")
            .await
            .unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(true);
        scheduler(&db, 1, Duration::from_secs(3600))
            .run(shutdown_rx)
            .await;
    }
}

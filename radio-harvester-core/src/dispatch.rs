use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ShutdownPolicy;
use crate::download::Downloader;
use crate::model::SongDescriptor;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub dispatched: u64,
    /// Descriptors still queued when the stop signal won the race.
    pub dropped: u64,
    pub saved: u64,
}

enum Next {
    Song(SongDescriptor),
    Stop,
}

enum Dispatch {
    Spawned,
    /// Stop fired while waiting for a free slot.
    Dropped,
    Closed,
}

/// Hands descriptors from the channel to a bounded pool of download tasks.
pub struct DownloadDispatcher {
    downloader: Downloader,
    slots: Arc<Semaphore>,
    policy: ShutdownPolicy,
}

impl DownloadDispatcher {
    pub fn new(downloader: Downloader, workers: usize, policy: ShutdownPolicy) -> Self {
        Self {
            downloader,
            slots: Arc::new(Semaphore::new(workers.max(1))),
            policy,
        }
    }

    /// Consumes descriptors until `stop` fires (or the channel closes), then
    /// waits for every spawned download before returning.
    ///
    /// Under [`ShutdownPolicy::BestEffort`] a descriptor still waiting for a
    /// free slot when `stop` fires is dropped along with the rest of the queue.
    pub async fn run(
        &self,
        mut songs: mpsc::Receiver<SongDescriptor>,
        stop: CancellationToken,
    ) -> DispatchSummary {
        let tracker = TaskTracker::new();
        let saved = Arc::new(AtomicU64::new(0));
        let mut summary = DispatchSummary::default();

        loop {
            let song = match self.next(&mut songs, &stop).await {
                Next::Song(song) => song,
                Next::Stop => break,
            };
            match self.dispatch(&tracker, &saved, song, &stop).await {
                Dispatch::Spawned => summary.dispatched += 1,
                Dispatch::Dropped => {
                    summary.dropped += 1;
                    break;
                }
                Dispatch::Closed => break,
            }
        }

        match self.policy {
            ShutdownPolicy::Drain => {
                while let Ok(song) = songs.try_recv() {
                    match self.dispatch(&tracker, &saved, song, &stop).await {
                        Dispatch::Spawned => summary.dispatched += 1,
                        Dispatch::Dropped | Dispatch::Closed => break,
                    }
                }
            }
            ShutdownPolicy::BestEffort => {
                while let Ok(song) = songs.try_recv() {
                    warn!("stop signal arrived first, not downloading {:?}", song.title);
                    summary.dropped += 1;
                }
            }
        }

        info!("dispatched {} downloads, waiting for them", summary.dispatched);
        tracker.close();
        tracker.wait().await;
        info!("downloaded all possible files");

        summary.saved = saved.load(Ordering::Relaxed);
        summary
    }

    async fn next(
        &self,
        songs: &mut mpsc::Receiver<SongDescriptor>,
        stop: &CancellationToken,
    ) -> Next {
        let received = match self.policy {
            ShutdownPolicy::Drain => tokio::select! {
                biased;
                song = songs.recv() => song,
                _ = stop.cancelled() => return Next::Stop,
            },
            ShutdownPolicy::BestEffort => tokio::select! {
                song = songs.recv() => song,
                _ = stop.cancelled() => return Next::Stop,
            },
        };
        received.map_or(Next::Stop, Next::Song)
    }

    async fn dispatch(
        &self,
        tracker: &TaskTracker,
        saved: &Arc<AtomicU64>,
        song: SongDescriptor,
        stop: &CancellationToken,
    ) -> Dispatch {
        let slot = self.slots.clone().acquire_owned();
        let acquired = match self.policy {
            ShutdownPolicy::Drain => slot.await,
            ShutdownPolicy::BestEffort => tokio::select! {
                biased;
                permit = slot => permit,
                _ = stop.cancelled() => {
                    warn!("stop signal arrived while waiting for a slot, not downloading {:?}", song.title);
                    return Dispatch::Dropped;
                }
            },
        };
        let permit = match acquired {
            Ok(permit) => permit,
            Err(err) => {
                error!("download slots closed: {err}");
                return Dispatch::Closed;
            }
        };

        debug!(
            "title: {:?} [failed to parse: {}] link: {}",
            song.title, song.failed_to_parse, song.link
        );
        let downloader = self.downloader.clone();
        let saved = saved.clone();
        let span = info_span!("download", title = %song.title);
        tracker.spawn(
            async move {
                if downloader.download(song).await.is_saved() {
                    saved.fetch_add(1, Ordering::Relaxed);
                }
                drop(permit);
            }
            .instrument(span),
        );
        Dispatch::Spawned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_log::ErrorSink;
    use std::time::Duration;
    use tempfile::tempdir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn songs(n: usize, base: &str) -> Vec<SongDescriptor> {
        (0..n)
            .map(|i| SongDescriptor::new(format!("t{i}"), format!("{base}/t{i}.mp3"), "raw"))
            .collect()
    }

    #[tokio::test]
    async fn drain_dispatches_everything_queued_before_stop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a".to_vec()))
            .expect(5)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let (sink, collector) = ErrorSink::spawn();
        let downloader = Downloader::new(reqwest::Client::new(), dir.path(), sink);
        let dispatcher = DownloadDispatcher::new(downloader, 2, ShutdownPolicy::Drain);

        let (tx, rx) = mpsc::channel(20);
        for song in songs(5, &server.uri()) {
            tx.send(song).await.unwrap();
        }
        let stop = CancellationToken::new();
        stop.cancel();

        let summary = dispatcher.run(rx, stop).await;
        drop(dispatcher);

        assert_eq!(summary.dispatched, 5);
        assert_eq!(summary.dropped, 0);
        assert_eq!(summary.saved, 5);
        assert!(collector.finish().await.is_empty());
        for i in 0..5 {
            assert!(dir.path().join(format!("t{i}.mp3")).exists());
        }
    }

    #[tokio::test]
    async fn best_effort_accounts_for_every_queued_descriptor() {
        let dir = tempdir().unwrap();
        let (sink, collector) = ErrorSink::spawn();
        let downloader = Downloader::new(reqwest::Client::new(), dir.path(), sink);
        let dispatcher = DownloadDispatcher::new(downloader, 4, ShutdownPolicy::BestEffort);

        let (tx, rx) = mpsc::channel(20);
        for i in 0..10 {
            tx.send(SongDescriptor::new(format!("t{i}"), "", "raw"))
                .await
                .unwrap();
        }
        let stop = CancellationToken::new();
        stop.cancel();

        let summary = dispatcher.run(rx, stop).await;
        drop(dispatcher);

        assert_eq!(summary.dispatched + summary.dropped, 10);
        assert_eq!(
            collector.finish().await.len() as u64,
            summary.dispatched
        );
    }

    #[tokio::test]
    async fn best_effort_drops_queue_when_no_slot_frees_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let (sink, collector) = ErrorSink::spawn();
        let downloader = Downloader::new(reqwest::Client::new(), dir.path(), sink);
        let dispatcher = DownloadDispatcher::new(downloader, 1, ShutdownPolicy::BestEffort);
        let busy = dispatcher.slots.clone().acquire_owned().await.unwrap();

        let (tx, rx) = mpsc::channel(32);
        for song in songs(32, &server.uri()) {
            tx.send(song).await.unwrap();
        }
        let stop = CancellationToken::new();
        stop.cancel();

        let summary = dispatcher.run(rx, stop).await;
        drop(busy);
        drop(dispatcher);

        assert_eq!(summary.dispatched, 0);
        assert_eq!(summary.dropped, 32);
        assert_eq!(summary.saved, 0);
        assert!(collector.finish().await.is_empty());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn drain_waits_for_a_slot_instead_of_dropping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a".to_vec()))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let (sink, collector) = ErrorSink::spawn();
        let downloader = Downloader::new(reqwest::Client::new(), dir.path(), sink);
        let dispatcher = DownloadDispatcher::new(downloader, 1, ShutdownPolicy::Drain);
        let busy = dispatcher.slots.clone().acquire_owned().await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(busy);
        });

        let (tx, rx) = mpsc::channel(8);
        for song in songs(3, &server.uri()) {
            tx.send(song).await.unwrap();
        }
        let stop = CancellationToken::new();
        stop.cancel();

        let summary = dispatcher.run(rx, stop).await;
        drop(dispatcher);

        assert_eq!(summary.dispatched, 3);
        assert_eq!(summary.dropped, 0);
        assert_eq!(summary.saved, 3);
        assert!(collector.finish().await.is_empty());
    }

    #[tokio::test]
    async fn pool_size_caps_in_flight_downloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(100))
                    .set_body_bytes(b"a".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let (sink, _collector) = ErrorSink::spawn();
        let downloader = Downloader::new(reqwest::Client::new(), dir.path(), sink);
        let dispatcher = Arc::new(DownloadDispatcher::new(downloader, 2, ShutdownPolicy::Drain));

        let (tx, rx) = mpsc::channel(20);
        let stop = CancellationToken::new();
        let handle = {
            let dispatcher = dispatcher.clone();
            let stop = stop.clone();
            tokio::spawn(async move { dispatcher.run(rx, stop).await })
        };

        for song in songs(4, &server.uri()) {
            tx.send(song).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(dispatcher.slots.available_permits(), 0);

        stop.cancel();
        let summary = handle.await.unwrap();
        assert_eq!(summary.dispatched, 4);
        assert_eq!(summary.saved, 4);
        assert_eq!(dispatcher.slots.available_permits(), 2);
    }

    #[tokio::test]
    async fn closed_channel_counts_as_stop() {
        let dir = tempdir().unwrap();
        let (sink, _collector) = ErrorSink::spawn();
        let downloader = Downloader::new(reqwest::Client::new(), dir.path(), sink);
        let dispatcher = DownloadDispatcher::new(downloader, 1, ShutdownPolicy::Drain);

        let (tx, rx) = mpsc::channel::<SongDescriptor>(1);
        drop(tx);
        let summary = dispatcher.run(rx, CancellationToken::new()).await;
        assert_eq!(summary, DispatchSummary::default());
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch identification orchestrator
//!
//! Items run strictly one after another. Within an item, the location lookup
//! and the classification call run concurrently and are both awaited, so the
//! recorded elapsed time is the wall-clock time of the pair.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::capture::{CaptureMode, EncodedImage, ImageSource, ImageSourceAdapter};
use crate::classifier::{ClassificationOutcome, Classifier};
use crate::error::{CaptureError, ClassificationError};
use crate::geo::{Coordinates, GeolocationResolver};
use crate::profiles::ReferenceProfile;
use crate::{Result, VerdantError};

/// One finalized identification event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: String,
    #[serde(flatten)]
    pub outcome: ClassificationOutcome,
    pub captured_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub coordinates: Option<Coordinates>,
    pub source_image: EncodedImage,
    /// Owned by the history side; always false when produced here
    #[serde(default)]
    pub is_favorite: bool,
    /// Owned by the history side; always false when produced here
    #[serde(default)]
    pub is_incorrect: bool,
}

/// Receives each record as soon as its item finishes
pub trait ResultSink: Send + Sync {
    fn accept(&self, record: AnalysisRecord);
}

/// Progress and per-item error notifications
pub trait BatchObserver: Send + Sync {
    /// Called before item `index` (1-based) of `total` starts
    fn on_progress(&self, _index: usize, _total: usize, _source: &ImageSource) {}

    /// Called for an item that failed while the run carries on
    fn on_item_error(&self, _index: usize, _total: usize, _source: &str, _error: &VerdantError) {}
}

/// Observer that reports through `tracing`
pub struct TracingObserver;

impl BatchObserver for TracingObserver {
    fn on_progress(&self, index: usize, total: usize, source: &ImageSource) {
        info!("[{}/{}] Identifying {}", index, total, source);
    }

    fn on_item_error(&self, index: usize, total: usize, source: &str, error: &VerdantError) {
        error!("[{}/{}] Failed to identify {}: {}", index, total, source, error);
    }
}

/// Whether a batch run is processing an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running {
        index: usize,
        total: usize,
        item_started: Instant,
    },
}

/// Live elapsed time of the item currently being processed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElapsedTick {
    pub index: usize,
    pub total: usize,
    pub elapsed: Duration,
}

/// How a run treats per-item failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Keep going after a failed item (batch mode) or stop at the first (single mode)
    pub continue_on_error: bool,
}

impl RunOptions {
    pub fn batch() -> Self {
        Self { continue_on_error: true }
    }

    pub fn single() -> Self {
        Self { continue_on_error: false }
    }

    /// Batch semantics for more than one source, single otherwise
    pub fn for_count(count: usize) -> Self {
        if count > 1 {
            Self::batch()
        } else {
            Self::single()
        }
    }
}

/// The outcome of one item
#[derive(Debug)]
pub struct ItemReport {
    pub index: usize,
    pub total: usize,
    pub source: String,
    pub result: Result<AnalysisRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub index: usize,
    pub source: String,
    pub message: String,
}

/// Totals for a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<ItemFailure>,
}

/// Iteration state of one run. Dropping it returns the orchestrator to idle.
struct Cursor<'a> {
    pending: std::iter::Enumerate<std::vec::IntoIter<ImageSource>>,
    halted: bool,
    state: &'a watch::Sender<RunState>,
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        self.state.send_replace(RunState::Idle);
    }
}

/// Sequences image sources through capture, location and classification
pub struct BatchOrchestrator {
    classifier: Arc<dyn Classifier>,
    geolocation: GeolocationResolver,
    adapter: Mutex<ImageSourceAdapter>,
    observer: Arc<dyn BatchObserver>,
    state: watch::Sender<RunState>,
}

impl BatchOrchestrator {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        geolocation: GeolocationResolver,
        adapter: ImageSourceAdapter,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            classifier,
            geolocation,
            adapter: Mutex::new(adapter),
            observer: Arc::new(TracingObserver),
            state,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Switch the capture device, acquiring or releasing the camera
    pub async fn switch_mode(&self, mode: CaptureMode) -> std::result::Result<(), CaptureError> {
        self.adapter.lock().await.switch_mode(mode).await
    }

    /// Release any hardware stream
    pub async fn release_capture(&self) {
        self.adapter.lock().await.release();
    }

    /// Watch the run state
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Elapsed time of the current item, sampled every `period`.
    ///
    /// Yields `None` while idle. The stream never ends on its own; must be
    /// created inside a Tokio runtime.
    pub fn elapsed_ticks(&self, period: Duration) -> impl Stream<Item = Option<ElapsedTick>> + Send + 'static {
        let state = self.state.subscribe();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        stream::unfold((state, interval), |(state, mut interval)| async move {
            interval.tick().await;
            let current = *state.borrow();
            let tick = match current {
                RunState::Running { index, total, item_started } => Some(ElapsedTick {
                    index,
                    total,
                    elapsed: item_started.elapsed(),
                }),
                RunState::Idle => None,
            };
            Some((tick, (state, interval)))
        })
    }

    /// Lazily process `sources` in order, yielding one report per attempted item.
    ///
    /// The stream ends early after a failure unless `continue_on_error` is set,
    /// and always after an empty reference set. Restart by calling again.
    pub fn items<'a>(
        &'a self,
        sources: Vec<ImageSource>,
        profiles: &'a [ReferenceProfile],
        options: RunOptions,
    ) -> impl Stream<Item = ItemReport> + 'a {
        let total = sources.len();
        let cursor = Cursor {
            pending: sources.into_iter().enumerate(),
            halted: false,
            state: &self.state,
        };

        stream::unfold(cursor, move |mut cursor| async move {
            if cursor.halted {
                return None;
            }
            let (i, source) = cursor.pending.next()?;

            let report = self.process_item(i + 1, total, source, profiles).await;
            if let Err(e) = &report.result {
                if !options.continue_on_error || e.is_fatal_to_run() {
                    cursor.halted = true;
                }
            }
            Some((report, cursor))
        })
    }

    /// Process `sources`, handing each record to `sink` as soon as it exists.
    ///
    /// In batch mode failed items go to the observer and the run reaches every
    /// item. In single mode, or on an empty reference set, the first error is
    /// returned and nothing further is attempted.
    pub async fn run(
        &self,
        sources: Vec<ImageSource>,
        profiles: &[ReferenceProfile],
        sink: &dyn ResultSink,
        options: RunOptions,
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary {
            total: sources.len(),
            ..Default::default()
        };

        let items = self.items(sources, profiles, options);
        tokio::pin!(items);

        while let Some(report) = items.next().await {
            summary.attempted += 1;
            match report.result {
                Ok(record) => {
                    summary.succeeded += 1;
                    sink.accept(record);
                }
                Err(e) if !options.continue_on_error || e.is_fatal_to_run() => return Err(e),
                Err(e) => {
                    self.observer.on_item_error(report.index, report.total, &report.source, &e);
                    summary.failures.push(ItemFailure {
                        index: report.index,
                        source: report.source,
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Run finished: {}/{} identified, {} failed",
            summary.succeeded,
            summary.total,
            summary.failures.len()
        );
        Ok(summary)
    }

    async fn process_item(
        &self,
        index: usize,
        total: usize,
        source: ImageSource,
        profiles: &[ReferenceProfile],
    ) -> ItemReport {
        let label = source.label();
        let result = if profiles.is_empty() {
            Err(ClassificationError::EmptyDatabase.into())
        } else {
            self.observer.on_progress(index, total, &source);
            self.state.send_replace(RunState::Running {
                index,
                total,
                item_started: Instant::now(),
            });
            self.identify(index, total, &source, profiles).await
        };

        ItemReport {
            index,
            total,
            source: label,
            result,
        }
    }

    async fn identify(
        &self,
        index: usize,
        total: usize,
        source: &ImageSource,
        profiles: &[ReferenceProfile],
    ) -> Result<AnalysisRecord> {
        let image = self.adapter.lock().await.capture(source).await?;

        let started = Instant::now();
        self.state.send_replace(RunState::Running {
            index,
            total,
            item_started: started,
        });

        let (coordinates, outcome) = tokio::join!(
            self.geolocation.resolve(),
            self.classifier.classify(&image, profiles),
        );
        let elapsed = started.elapsed();
        let outcome = outcome?;

        if coordinates.is_none() {
            debug!("No location for item {}", index);
        }
        info!(
            "[{}/{}] {} ({:.0}%{}) in {:.2}s",
            index,
            total,
            outcome.matched_name,
            outcome.confidence * 100.0,
            if outcome.is_match() { "" } else { " absent" },
            elapsed.as_secs_f64()
        );

        Ok(AnalysisRecord {
            id: uuid::Uuid::new_v4().to_string(),
            outcome,
            captured_at: Utc::now(),
            elapsed_seconds: elapsed.as_secs_f64(),
            coordinates,
            source_image: image,
            is_favorite: false,
            is_incorrect: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::camera::tests::CountingCamera;
    use crate::capture::CameraSession;
    use crate::classifier::MatchedProfile;
    use crate::error::GeoError;
    use crate::geo::{FixedLocation, LocationProvider};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct CollectingSink {
        records: StdMutex<Vec<AnalysisRecord>>,
    }

    impl CollectingSink {
        fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }
    }

    impl ResultSink for CollectingSink {
        fn accept(&self, record: AnalysisRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    impl ResultSink for Arc<CollectingSink> {
        fn accept(&self, record: AnalysisRecord) {
            self.as_ref().accept(record);
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        progress: StdMutex<Vec<(usize, usize)>>,
        errors: StdMutex<Vec<usize>>,
    }

    impl BatchObserver for RecordingObserver {
        fn on_progress(&self, index: usize, total: usize, _source: &ImageSource) {
            self.progress.lock().unwrap().push((index, total));
        }

        fn on_item_error(&self, index: usize, _total: usize, _source: &str, _error: &VerdantError) {
            self.errors.lock().unwrap().push(index);
        }
    }

    /// Classifier with a fixed delay that fails on chosen calls (1-based)
    struct Scripted {
        delay: Duration,
        fail_on: Vec<usize>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        sink: Option<Arc<CollectingSink>>,
        sink_sizes: StdMutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(delay_ms: u64, fail_on: &[usize]) -> Self {
            Self {
                delay: Duration::from_millis(delay_ms),
                fail_on: fail_on.to_vec(),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                sink: None,
                sink_sizes: StdMutex::new(Vec::new()),
            }
        }

        fn watching(mut self, sink: Arc<CollectingSink>) -> Self {
            self.sink = Some(sink);
            self
        }
    }

    #[async_trait]
    impl Classifier for Scripted {
        async fn classify(
            &self,
            _image: &EncodedImage,
            profiles: &[ReferenceProfile],
        ) -> std::result::Result<ClassificationOutcome, ClassificationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(sink) = &self.sink {
                self.sink_sizes.lock().unwrap().push(sink.len());
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on.contains(&call) {
                return Err(ClassificationError::MalformedResponse("garbled".to_string()));
            }
            Ok(ClassificationOutcome {
                matched_name: profiles[0].common_name.clone(),
                scientific_name: profiles[0].scientific_name.clone(),
                is_invasive: profiles[0].is_invasive,
                confidence: 0.9,
                explanation: "Leaf shape matches.".to_string(),
                matched_profile_id: MatchedProfile::Profile(profiles[0].id.clone()),
            })
        }
    }

    struct SlowLocation(Duration);

    #[async_trait]
    impl LocationProvider for SlowLocation {
        async fn locate(&self) -> std::result::Result<Coordinates, GeoError> {
            tokio::time::sleep(self.0).await;
            Ok(Coordinates { lat: 48.85, lng: 2.35 })
        }
    }

    struct NeverLocates;

    #[async_trait]
    impl LocationProvider for NeverLocates {
        async fn locate(&self) -> std::result::Result<Coordinates, GeoError> {
            std::future::pending().await
        }
    }

    fn profiles() -> Vec<ReferenceProfile> {
        vec![ReferenceProfile {
            id: "knotweed".to_string(),
            common_name: "Japanese knotweed".to_string(),
            scientific_name: "Reynoutria japonica".to_string(),
            is_invasive: true,
            sample_images: vec![EncodedImage::from_bytes(b"ref", "image/jpeg", "ref.jpg")],
            notes: String::new(),
            created_at: Utc::now(),
        }]
    }

    fn photos(n: usize) -> Vec<ImageSource> {
        (0..n)
            .map(|i| {
                ImageSource::Encoded(EncodedImage::from_bytes(
                    format!("photo-{}", i).as_bytes(),
                    "image/jpeg",
                    format!("photo-{}.jpg", i),
                ))
            })
            .collect()
    }

    fn orchestrator(classifier: Arc<dyn Classifier>, geo: GeolocationResolver) -> BatchOrchestrator {
        let (camera, _) = CountingCamera::new();
        BatchOrchestrator::new(classifier, geo, ImageSourceAdapter::new(CameraSession::new(camera)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_continues_past_failed_item() {
        let classifier = Arc::new(Scripted::new(100, &[3]));
        let observer = Arc::new(RecordingObserver::default());
        let orchestrator = orchestrator(classifier.clone(), GeolocationResolver::default())
            .with_observer(observer.clone());
        let sink = CollectingSink::default();

        let summary = orchestrator
            .run(photos(5), &profiles(), &sink, RunOptions::for_count(5))
            .await
            .unwrap();

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 5);
        assert_eq!(sink.len(), 4);
        assert_eq!(summary.attempted, 5);
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].index, 3);
        assert_eq!(*observer.errors.lock().unwrap(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_image_failure_halts() {
        let classifier = Arc::new(Scripted::new(100, &[1]));
        let observer = Arc::new(RecordingObserver::default());
        let orchestrator = orchestrator(classifier.clone(), GeolocationResolver::default())
            .with_observer(observer.clone());
        let sink = CollectingSink::default();

        let err = orchestrator
            .run(photos(1), &profiles(), &sink, RunOptions::for_count(1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VerdantError::Classification(ClassificationError::MalformedResponse(_))
        ));
        assert_eq!(sink.len(), 0);
        // Returned to the caller, not also reported to the observer
        assert!(observer.errors.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_stops_remaining_items() {
        let classifier = Arc::new(Scripted::new(10, &[2]));
        let orchestrator = orchestrator(classifier.clone(), GeolocationResolver::default());
        let sink = CollectingSink::default();

        let result = orchestrator
            .run(photos(4), &profiles(), &sink, RunOptions::single())
            .await;

        assert!(result.is_err());
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_profiles_abort_batch_without_calls() {
        let classifier = Arc::new(Scripted::new(10, &[]));
        let orchestrator = orchestrator(classifier.clone(), GeolocationResolver::default());
        let sink = CollectingSink::default();

        let err = orchestrator
            .run(photos(3), &[], &sink, RunOptions::batch())
            .await
            .unwrap_err();

        assert!(err.is_fatal_to_run());
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_is_wall_clock_of_item() {
        let classifier = Arc::new(Scripted::new(500, &[]));
        let geo = GeolocationResolver::new(
            Arc::new(SlowLocation(Duration::from_millis(200))),
            Duration::from_millis(3000),
        );
        let orchestrator = orchestrator(classifier, geo);
        let sink = CollectingSink::default();

        orchestrator
            .run(photos(1), &profiles(), &sink, RunOptions::single())
            .await
            .unwrap();

        let records = sink.records.lock().unwrap();
        assert!((records[0].elapsed_seconds - 0.5).abs() < 0.02, "{}", records[0].elapsed_seconds);
        assert_eq!(records[0].coordinates, Some(Coordinates { lat: 48.85, lng: 2.35 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_includes_geolocation_wait() {
        let classifier = Arc::new(Scripted::new(500, &[]));
        let geo = GeolocationResolver::new(Arc::new(NeverLocates), Duration::from_millis(3000));
        let orchestrator = orchestrator(classifier, geo);
        let sink = CollectingSink::default();

        orchestrator
            .run(photos(1), &profiles(), &sink, RunOptions::single())
            .await
            .unwrap();

        let records = sink.records.lock().unwrap();
        assert!((records[0].elapsed_seconds - 3.0).abs() < 0.02, "{}", records[0].elapsed_seconds);
        assert_eq!(records[0].coordinates, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_run_sequentially_and_records_are_handed_off_immediately() {
        let sink = Arc::new(CollectingSink::default());
        let classifier = Arc::new(Scripted::new(50, &[]).watching(sink.clone()));
        let observer = Arc::new(RecordingObserver::default());
        let orchestrator = orchestrator(classifier.clone(), GeolocationResolver::default())
            .with_observer(observer.clone());

        orchestrator
            .run(photos(3), &profiles(), &sink, RunOptions::batch())
            .await
            .unwrap();

        assert_eq!(classifier.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(*classifier.sink_sizes.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(*observer.progress.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_are_complete_and_unflagged() {
        let classifier = Arc::new(Scripted::new(10, &[]));
        let geo = GeolocationResolver::new(
            Arc::new(FixedLocation(Coordinates { lat: 1.0, lng: 2.0 })),
            Duration::from_millis(3000),
        );
        let orchestrator = orchestrator(classifier, geo);
        let sink = CollectingSink::default();

        orchestrator
            .run(photos(2), &profiles(), &sink, RunOptions::batch())
            .await
            .unwrap();

        let records = sink.records.lock().unwrap();
        assert_ne!(records[0].id, records[1].id);
        for record in records.iter() {
            assert!(!record.is_favorite);
            assert!(!record.is_incorrect);
            assert!(record.elapsed_seconds >= 0.0);
            assert_eq!(record.outcome.matched_profile_id, MatchedProfile::Profile("knotweed".to_string()));
        }
        assert_eq!(records[1].source_image.origin, "photo-1.jpg");
    }

    #[tokio::test]
    async fn test_capture_failure_is_isolated_in_batch() {
        let classifier = Arc::new(Scripted::new(0, &[]));
        let observer = Arc::new(RecordingObserver::default());
        let orchestrator = orchestrator(classifier.clone(), GeolocationResolver::default())
            .with_observer(observer.clone());
        let sink = CollectingSink::default();

        let mut sources = photos(2);
        sources.insert(1, ImageSource::File(PathBuf::from("/no/such/photo.jpg")));
        sources.push(ImageSource::Video(PathBuf::from("walk.mp4")));

        let summary = orchestrator
            .run(sources, &profiles(), &sink, RunOptions::batch())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 4);
        assert_eq!(sink.len(), 2);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*observer.errors.lock().unwrap(), vec![2, 4]);
    }

    #[tokio::test]
    async fn test_camera_item_without_camera_mode_fails() {
        let classifier = Arc::new(Scripted::new(0, &[]));
        let orchestrator = orchestrator(classifier, GeolocationResolver::default());
        let sink = CollectingSink::default();

        let err = orchestrator
            .run(vec![ImageSource::Camera], &profiles(), &sink, RunOptions::single())
            .await
            .unwrap_err();
        assert!(matches!(err, VerdantError::Capture(CaptureError::DeviceUnavailable)));

        orchestrator.switch_mode(CaptureMode::Camera).await.unwrap();
        orchestrator
            .run(vec![ImageSource::Camera], &profiles(), &sink, RunOptions::single())
            .await
            .unwrap();
        orchestrator.release_capture().await;
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records.lock().unwrap()[0].source_image.mime, "image/png");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_stream_yields_per_item_reports() {
        let classifier = Arc::new(Scripted::new(10, &[2]));
        let orchestrator = orchestrator(classifier, GeolocationResolver::default());
        let refs = profiles();

        let reports: Vec<ItemReport> = orchestrator
            .items(photos(3), &refs, RunOptions::batch())
            .collect()
            .await;

        assert_eq!(reports.len(), 3);
        assert!(reports[0].result.is_ok());
        assert!(reports[1].result.is_err());
        assert!(reports[2].result.is_ok());
        assert_eq!(orchestrator.state(), RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_ticks_follow_current_item() {
        let classifier = Arc::new(Scripted::new(500, &[]));
        let orchestrator = orchestrator(classifier, GeolocationResolver::default());
        let sink = CollectingSink::default();
        let refs = profiles();

        let ticks = orchestrator.elapsed_ticks(Duration::from_millis(10));
        let (result, ticks) = tokio::join!(
            orchestrator.run(photos(1), &refs, &sink, RunOptions::single()),
            ticks.take(20).collect::<Vec<_>>(),
        );
        result.unwrap();

        assert!(ticks.iter().all(|t| t.map(|t| t.index) == Some(1)));
        let last = ticks.last().unwrap().unwrap();
        assert!(last.elapsed >= Duration::from_millis(150), "{:?}", last.elapsed);
        assert_eq!(orchestrator.state(), RunState::Idle);
    }

    #[test]
    fn test_record_wire_format() {
        let record = AnalysisRecord {
            id: "r-1".to_string(),
            outcome: ClassificationOutcome {
                matched_name: crate::classifier::NO_MATCH.to_string(),
                scientific_name: String::new(),
                is_invasive: false,
                confidence: 0.97,
                explanation: "Nothing similar in the set.".to_string(),
                matched_profile_id: MatchedProfile::Unknown,
            },
            captured_at: Utc::now(),
            elapsed_seconds: 1.25,
            coordinates: None,
            source_image: EncodedImage::from_bytes(b"x", "image/png", "camera"),
            is_favorite: false,
            is_incorrect: false,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["matchedProfileId"], "unknown");
        assert_eq!(value["elapsedSeconds"], 1.25);
        assert_eq!(value["isFavorite"], false);

        let back: AnalysisRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_run_options_from_cardinality() {
        assert!(!RunOptions::for_count(0).continue_on_error);
        assert!(!RunOptions::for_count(1).continue_on_error);
        assert!(RunOptions::for_count(2).continue_on_error);
    }
}

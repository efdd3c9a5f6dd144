//! Acquisition loop.
//!
//! ```text
//! Opening --ok--> Streaming --read/processing error--> Recovering
//!    |                ^                                    |
//!    | first open     +---------- reopen ok ---------------+
//!    v fails                                               (reopen fails: stay, back off again)
//! DeviceUnavailable       cancellation (loop top / backoff) --> Stopped
//! ```
//!
//! One frame per iteration flows through extractor -> window -> (full) normalizer ->
//! sink. Recovery is unbounded with a fixed backoff; only operator cancellation stops
//! the loop. Persistence failures drop the reading and keep the loop alive.

use chrono::Local;
use std::time::{Duration, Instant};

use crate::alert::ThresholdAlert;
use crate::control::{CancellationToken, SnapshotTrigger};
use crate::error::DustError;
use crate::extract::FeatureExtractor;
use crate::ingest::FrameSource;
use crate::severity::{Normalizer, ReadingClock, SeverityReading};
use crate::smoothing::TumblingWindow;
use crate::snapshot::SnapshotWriter;
use crate::storage::{Destination, ReadingSink};

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(3);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    Opening,
    Streaming,
    Recovering,
    Stopped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub frames_processed: u64,
    pub readings_emitted: u64,
    pub readings_persisted: u64,
    pub readings_dropped: u64,
    pub read_failures: u64,
    pub recoveries: u64,
    pub snapshots_saved: u64,
}

#[derive(Clone, Debug)]
pub struct MonitorSettings {
    /// Fixed wait between releasing and reopening a failed source.
    pub backoff: Duration,
    /// Write live readings to the sink (readings are still logged and alerted on).
    pub persist: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF,
            persist: true,
        }
    }
}

type TransitionHook = Box<dyn FnMut(MonitorState, MonitorState)>;

pub struct Monitor<S: FrameSource, K: ReadingSink> {
    source: S,
    extractor: FeatureExtractor,
    window: TumblingWindow,
    normalizer: Normalizer,
    sink: K,
    settings: MonitorSettings,
    snapshots: Option<(SnapshotWriter, SnapshotTrigger)>,
    alert: Option<ThresholdAlert>,
    on_transition: Option<TransitionHook>,
    state: MonitorState,
    stats: MonitorStats,
    clock: ReadingClock,
}

impl<S: FrameSource, K: ReadingSink> Monitor<S, K> {
    pub fn new(
        source: S,
        extractor: FeatureExtractor,
        window: TumblingWindow,
        normalizer: Normalizer,
        sink: K,
    ) -> Self {
        Self {
            source,
            extractor,
            window,
            normalizer,
            sink,
            settings: MonitorSettings::default(),
            snapshots: None,
            alert: None,
            on_transition: None,
            state: MonitorState::Opening,
            stats: MonitorStats::default(),
            clock: ReadingClock::default(),
        }
    }

    pub fn with_settings(mut self, settings: MonitorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_snapshots(mut self, writer: SnapshotWriter, trigger: SnapshotTrigger) -> Self {
        self.snapshots = Some((writer, trigger));
        self
    }

    pub fn with_alert(mut self, alert: ThresholdAlert) -> Self {
        self.alert = Some(alert);
        self
    }

    /// Called with `(from, to)` on every state change.
    pub fn on_transition(
        mut self,
        hook: impl FnMut(MonitorState, MonitorState) + 'static,
    ) -> Self {
        self.on_transition = Some(Box::new(hook));
        self
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run until `token` is cancelled.
    ///
    /// Fails only if the very first open of the source fails.
    pub fn run(&mut self, token: &CancellationToken) -> Result<MonitorStats, DustError> {
        self.transition(MonitorState::Opening);
        if let Err(err) = self.source.connect() {
            let locator = self.source.stats().locator;
            self.source.release();
            self.transition(MonitorState::Stopped);
            return Err(DustError::DeviceUnavailable {
                locator,
                reason: format!("{:#}", err),
            });
        }
        self.transition(MonitorState::Streaming);
        log::info!(
            "monitor streaming: algorithm={} window={} persist={}",
            self.extractor.algorithm(),
            self.window.size(),
            self.settings.persist
        );

        let mut last_health_log = Instant::now();
        loop {
            if token.is_cancelled() {
                break;
            }
            match self.state {
                MonitorState::Streaming => {
                    if let Err(err) = self.step() {
                        self.stats.read_failures += 1;
                        log::warn!("frame processing failed: {:#}", err);
                        self.transition(MonitorState::Recovering);
                    }
                }
                MonitorState::Recovering => {
                    self.source.release();
                    log::info!(
                        "source released, reopening in {}s",
                        self.settings.backoff.as_secs_f32()
                    );
                    if token.wait_timeout(self.settings.backoff) {
                        break;
                    }
                    match self.source.connect() {
                        Ok(()) => {
                            self.stats.recoveries += 1;
                            self.transition(MonitorState::Streaming);
                        }
                        Err(err) => log::warn!("reopen failed: {:#}", err),
                    }
                }
                MonitorState::Opening | MonitorState::Stopped => break,
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let source = self.source.stats();
                log::info!(
                    "source health={} frames={} locator={} readings={} dropped={} recoveries={}",
                    self.source.is_healthy(),
                    source.frames_captured,
                    source.locator,
                    self.stats.readings_emitted,
                    self.stats.readings_dropped,
                    self.stats.recoveries
                );
                last_health_log = Instant::now();
            }
        }

        self.source.release();
        self.transition(MonitorState::Stopped);
        log::info!("monitor stopped: {:?}", self.stats);
        Ok(self.stats.clone())
    }

    /// Read and process one frame. The frame is dropped before returning.
    fn step(&mut self) -> anyhow::Result<()> {
        let frame = self.source.next_frame()?;
        let signal = self.extractor.extract(&frame);
        self.stats.frames_processed += 1;
        log::trace!("raw signal {:.6}", signal);

        if let Some(smoothed) = self.window.push(signal) {
            self.emit(smoothed);
        }

        if let Some((writer, trigger)) = &self.snapshots {
            if trigger.take() {
                match writer.save(&frame) {
                    Ok(path) => {
                        self.stats.snapshots_saved += 1;
                        log::info!("snapshot saved to {}", path.display());
                    }
                    Err(err) => log::warn!("snapshot failed: {:#}", err),
                }
            }
        }
        Ok(())
    }

    fn emit(&mut self, smoothed: f64) {
        let timestamp = self.clock.stamp(Local::now());

        let reading = SeverityReading::new(timestamp, self.normalizer.normalize(smoothed));
        self.stats.readings_emitted += 1;
        log::info!(
            "dust level {:.2} (smoothed signal {:.6}) at {}",
            reading.value(),
            smoothed,
            reading.timestamp_label()
        );

        if self.settings.persist {
            match self.sink.append(&reading, Destination::Live) {
                Ok(()) => self.stats.readings_persisted += 1,
                Err(err) => {
                    self.stats.readings_dropped += 1;
                    log::warn!("reading dropped: {}", err);
                }
            }
        }

        if let Some(alert) = self.alert.as_mut() {
            match alert.evaluate(reading.value()) {
                Ok(Some(state)) => log::warn!(
                    "alert switched {:?} at dust level {:.2} (threshold {:.2})",
                    state,
                    reading.value(),
                    alert.threshold()
                ),
                Ok(None) => {}
                Err(err) => log::error!("alert actuator failed: {:#}", err),
            }
        }
    }

    fn transition(&mut self, to: MonitorState) {
        let from = self.state;
        self.state = to;
        if from == to {
            return;
        }
        log::info!("monitor state {:?} -> {:?}", from, to);
        if let Some(hook) = self.on_transition.as_mut() {
            hook(from, to);
        }
    }
}

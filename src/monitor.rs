//! The assembled temperature monitor.
//!
//! [`TemperatureMonitor`] wires a [`FrameReader`] to an [`IngestPipeline`]
//! that records into a [`SharedEngine`] and persists through a
//! [`RetentionLogger`]. On construction the retained history is loaded back
//! from the logs; on [`stop`](TemperatureMonitor::stop) the still-open hourly
//! and daily buckets are written out so a restart can keep averaging them.

use crate::aggregation::{AggregationEngine, Granularity, SharedEngine, Snapshot};
use crate::clock::{SharedClock, SystemClock};
use crate::config::MonitorConfig;
use crate::error::{AppResult, ReadFault};
use crate::measurement::FrameParser;
use crate::pipeline::{IngestPipeline, IngestStatsSnapshot};
use crate::reader::{ByteSource, Frame, FrameReader};
use crate::storage::RetentionLogger;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Reader, engine and logger running as one unit.
pub struct TemperatureMonitor {
    reader: FrameReader,
    pipeline: IngestPipeline,
    engine: SharedEngine,
    logger: Arc<Mutex<RetentionLogger>>,
    needs_flush: bool,
}

impl TemperatureMonitor {
    /// Open the configured serial device and the retention logs.
    ///
    /// Fails with [`MonitorError::Open`](crate::error::MonitorError::Open)
    /// when the device cannot be opened; no reader thread exists then.
    pub fn new(config: &MonitorConfig) -> AppResult<Self> {
        config.validate()?;
        let reader = FrameReader::open_with(&config.device)?;
        Self::assemble(config, reader, Arc::new(SystemClock))
    }

    /// Build a monitor around an already open source and a custom clock.
    pub fn with_source(
        config: &MonitorConfig,
        source: Box<dyn ByteSource>,
        clock: SharedClock,
    ) -> AppResult<Self> {
        config.validate()?;
        let reader = FrameReader::from_source(source)
            .with_terminator(config.device.terminator_byte())
            .with_max_frame_len(config.device.max_frame_len);
        Self::assemble(config, reader, clock)
    }

    fn assemble(config: &MonitorConfig, reader: FrameReader, clock: SharedClock) -> AppResult<Self> {
        let policy = config.retention.policy();
        let mut logger = RetentionLogger::open(&config.storage, policy, Arc::clone(&clock))?;

        match logger.trim_all() {
            Ok(0) => {}
            Ok(dropped) => info!(dropped, "Trimmed expired log records"),
            Err(e) => warn!("Could not trim retention logs: {}", e),
        }

        let mut engine = AggregationEngine::new(Arc::clone(&clock), policy);
        for granularity in Granularity::ALL {
            match logger.load(granularity) {
                Ok(points) if points.is_empty() => {}
                Ok(points) => {
                    info!(%granularity, points = points.len(), "Restored history");
                    engine.restore(granularity, points);
                }
                Err(e) => warn!(%granularity, "Could not restore history: {}", e),
            }
        }
        let engine = SharedEngine::new(engine);
        let logger = Arc::new(Mutex::new(logger));

        let pipeline = IngestPipeline::new(
            FrameParser::new(config.parser.marker.clone()),
            engine.clone(),
            Arc::clone(&logger),
            clock,
        );

        Ok(Self {
            reader,
            pipeline,
            engine,
            logger,
            needs_flush: false,
        })
    }

    /// Start ingesting on the reader thread.
    pub fn start(&mut self) -> AppResult<()> {
        let pipeline = self.pipeline.clone();
        self.reader.set_handler(move |frame: Frame| {
            pipeline.handle_frame(&frame);
        });
        self.reader.start()?;
        self.needs_flush = true;
        Ok(())
    }

    /// Stop the reader, then persist the open buckets. Idempotent.
    pub fn stop(&mut self) {
        self.reader.stop();
        if std::mem::take(&mut self.needs_flush) {
            self.pipeline.flush_open_buckets();
            let stats = self.stats();
            info!(
                frames = stats.frames,
                recorded = stats.recorded,
                malformed = stats.malformed,
                discarded = self.frames_discarded(),
                "Monitor stopped"
            );
        }
    }

    /// Whether the reader thread is alive.
    pub fn is_running(&self) -> bool {
        self.reader.is_running()
    }

    /// Device identifier.
    pub fn device(&self) -> &str {
        self.reader.device()
    }

    /// Point-in-time copy of one series.
    pub fn snapshot(&self, granularity: Granularity) -> Snapshot {
        self.engine.snapshot(granularity)
    }

    /// Shared engine handle.
    pub fn engine(&self) -> SharedEngine {
        self.engine.clone()
    }

    /// Ingest counters.
    pub fn stats(&self) -> IngestStatsSnapshot {
        self.pipeline.stats().snapshot()
    }

    /// Oversize frames dropped by the reader.
    pub fn frames_discarded(&self) -> u64 {
        self.reader.frames_discarded()
    }

    /// The fault that stopped the reader, if any.
    pub fn fault(&self) -> Option<ReadFault> {
        self.reader.fault()
    }

    /// Receiver notified when a fault stops the reader.
    pub fn subscribe_faults(&self) -> watch::Receiver<Option<ReadFault>> {
        self.reader.subscribe_faults()
    }

    /// Location of the log for `granularity`.
    pub fn log_path(&self, granularity: Granularity) -> PathBuf {
        self.logger.lock().path(granularity).to_path_buf()
    }
}

impl Drop for TemperatureMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

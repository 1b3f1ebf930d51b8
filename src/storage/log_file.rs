//! One append-only retention log.

use super::record;
use crate::aggregation::{Granularity, SeriesPoint};
use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Append-only CSV log for one granularity.
///
/// Appends go straight to the end of the file and are flushed before
/// returning. Trimming never edits the file in place: retained records are
/// written to a sibling `.tmp` file which then replaces the log by rename,
/// so an interrupted trim leaves the previous log intact.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    granularity: Granularity,
    /// Oldest timestamp on disk, once the file has been scanned.
    oldest: Option<DateTime<Utc>>,
    scanned: bool,
}

impl LogFile {
    /// Log at `path`, creating it if absent.
    ///
    /// A torn last line from an earlier crash is closed off so that the next
    /// append starts on a fresh line.
    pub fn open(path: impl Into<PathBuf>, granularity: Granularity) -> Result<Self, PersistenceError> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| PersistenceError::io(&path, e))?;
        repair_tail(&mut file).map_err(|e| PersistenceError::io(&path, e))?;

        debug!(path = %path.display(), %granularity, "Opened retention log");
        Ok(Self {
            path,
            granularity,
            oldest: None,
            scanned: false,
        })
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Series stored in this log.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Append one record and flush it.
    pub fn append(&mut self, point: &SeriesPoint) -> Result<(), PersistenceError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PersistenceError::io(&self.path, e))?;
        let mut writer = record::writer(file);
        record::write_point(&mut writer, self.granularity, point)
            .map_err(|e| PersistenceError::csv(&self.path, e))?;
        writer.flush().map_err(|e| PersistenceError::io(&self.path, e))?;

        if self.scanned {
            self.oldest = Some(match self.oldest {
                Some(oldest) => oldest.min(point.timestamp),
                None => point.timestamp,
            });
        }
        Ok(())
    }

    /// All readable records, oldest first.
    ///
    /// Aggregate logs may hold several records for one bucket (a bucket
    /// flushed at shutdown and completed after restart); the last one wins.
    pub fn read(&self) -> Result<Vec<SeriesPoint>, PersistenceError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };
        let mut points = record::read_points(file, self.granularity, &self.path)?;

        match self.granularity {
            Granularity::Raw => points.sort_by_key(|p| p.timestamp),
            Granularity::Hourly | Granularity::Daily => {
                let latest: BTreeMap<_, _> = points.into_iter().map(|p| (p.timestamp, p)).collect();
                points = latest.into_values().collect();
            }
        }
        Ok(points)
    }

    /// Remove records older than `cutoff`, returning how many were dropped.
    ///
    /// A no-op when the oldest record on disk is already within retention.
    /// Otherwise the whole log is read, rewritten and synced. With steady
    /// input that is once per expiring record: at 1 Hz a full raw log of
    /// about 86k lines is rewritten on nearly every append.
    pub fn trim(&mut self, cutoff: DateTime<Utc>) -> Result<usize, PersistenceError> {
        if self.scanned && self.oldest.map_or(true, |oldest| oldest >= cutoff) {
            return Ok(0);
        }

        let points = self.read()?;
        let total = points.len();
        let kept: Vec<SeriesPoint> = points.into_iter().filter(|p| p.timestamp >= cutoff).collect();
        let dropped = total - kept.len();

        if dropped > 0 || !self.scanned {
            self.rewrite(&kept)?;
        }
        self.oldest = kept.first().map(|p| p.timestamp);
        self.scanned = true;

        if dropped > 0 {
            info!(
                path = %self.path.display(),
                granularity = %self.granularity,
                dropped,
                kept = kept.len(),
                "Trimmed retention log"
            );
        }
        Ok(dropped)
    }

    /// Replace the log with `points` via write-then-rename.
    fn rewrite(&self, points: &[SeriesPoint]) -> Result<(), PersistenceError> {
        let tmp = temp_path(&self.path);
        let result = self.write_temp(&tmp, points).and_then(|()| {
            fs::rename(&tmp, &self.path).map_err(|e| PersistenceError::io(&self.path, e))
        });
        if result.is_err() {
            if let Err(e) = fs::remove_file(&tmp) {
                warn!(path = %tmp.display(), "Could not remove temporary log: {}", e);
            }
        }
        result
    }

    fn write_temp(&self, tmp: &Path, points: &[SeriesPoint]) -> Result<(), PersistenceError> {
        let file = File::create(tmp).map_err(|e| PersistenceError::io(tmp, e))?;
        let mut writer = record::writer(file);
        for point in points {
            record::write_point(&mut writer, self.granularity, point)
                .map_err(|e| PersistenceError::csv(tmp, e))?;
        }
        writer.flush().map_err(|e| PersistenceError::io(tmp, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| PersistenceError::io(tmp, e))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Terminate a last line left without its newline.
fn repair_tail(file: &mut File) -> std::io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        // Append mode writes at the end regardless of the read position
        file.write_all(b"\n")?;
        file.flush()?;
    }
    Ok(())
}

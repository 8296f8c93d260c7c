// Feedback Store - optional per-item rating aggregation that nudges fused
// scores. The adjustment is bounded so accumulated feedback can never move
// an item across the visibility threshold on its own, and the pipeline
// behaves identically when the store is absent.

use crate::errors::GovernanceError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Smoothing constant: an item needs several ratings before the
/// adjustment approaches its cap.
const RATING_SMOOTHING: f32 = 5.0;

/// One rating event, persisted as a JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub item_id: String,
    /// -1 (unhelpful) or +1 (helpful).
    pub rating: i8,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
struct RatingAggregate {
    sum: i64,
    count: u64,
}

/// Aggregated ratings with an optional append-only JSONL log.
pub struct FeedbackStore {
    ratings: RwLock<HashMap<String, RatingAggregate>>,
    max_adjustment: f32,
    log_path: Option<PathBuf>,
}

impl FeedbackStore {
    pub fn new(max_adjustment: f32) -> Self {
        Self {
            ratings: RwLock::new(HashMap::new()),
            max_adjustment,
            log_path: None,
        }
    }

    /// Open a store backed by a JSONL log, replaying existing records.
    /// A truncated final line (interrupted writer) is skipped, not fatal.
    pub fn open(path: &Path, max_adjustment: f32) -> Result<Self, GovernanceError> {
        let mut store = Self::new(max_adjustment);
        store.log_path = Some(path.to_path_buf());

        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                GovernanceError::Config(format!("cannot read feedback log {}: {e}", path.display()))
            })?;
            let mut ratings = store.ratings.write();
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<FeedbackRecord>(line) {
                    Ok(record) => {
                        let agg = ratings.entry(record.item_id).or_default();
                        agg.sum += record.rating as i64;
                        agg.count += 1;
                    }
                    Err(e) => {
                        warn!(line = lineno + 1, error = %e, "skipping unreadable feedback line");
                    }
                }
            }
        }
        Ok(store)
    }

    /// Record a rating and append it to the log when one is configured.
    pub fn record(&self, item_id: &str, rating: i8) -> Result<(), GovernanceError> {
        let rating = rating.clamp(-1, 1);
        {
            let mut ratings = self.ratings.write();
            let agg = ratings.entry(item_id.to_string()).or_default();
            agg.sum += rating as i64;
            agg.count += 1;
        }
        if let Some(path) = &self.log_path {
            let record = FeedbackRecord {
                item_id: item_id.to_string(),
                rating,
                timestamp: Utc::now(),
            };
            let line = serde_json::to_string(&record)
                .map_err(|e| GovernanceError::Internal(e.to_string()))?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    GovernanceError::Internal(format!(
                        "cannot append feedback log {}: {e}",
                        path.display()
                    ))
                })?;
            writeln!(file, "{line}")
                .map_err(|e| GovernanceError::Internal(format!("feedback append: {e}")))?;
        }
        Ok(())
    }

    /// Bounded score adjustment for an item: mean rating scaled by volume,
    /// capped at ±`max_adjustment`. Unrated items adjust by zero.
    pub fn adjustment(&self, item_id: &str) -> f32 {
        let ratings = self.ratings.read();
        let Some(agg) = ratings.get(item_id) else {
            return 0.0;
        };
        if agg.count == 0 {
            return 0.0;
        }
        let mean = agg.sum as f32 / agg.count as f32;
        let volume = agg.count as f32 / (agg.count as f32 + RATING_SMOOTHING);
        (mean * volume * self.max_adjustment).clamp(-self.max_adjustment, self.max_adjustment)
    }

    pub fn rated_item_count(&self) -> usize {
        self.ratings.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrated_item_has_zero_adjustment() {
        let store = FeedbackStore::new(0.05);
        assert_eq!(store.adjustment("const-s-x"), 0.0);
    }

    #[test]
    fn test_adjustment_is_capped() {
        let store = FeedbackStore::new(0.05);
        for _ in 0..1000 {
            store.record("const-s-x", 1).unwrap();
        }
        let adj = store.adjustment("const-s-x");
        assert!(adj > 0.0);
        assert!(adj <= 0.05);

        for _ in 0..5000 {
            store.record("const-q-y", -1).unwrap();
        }
        let adj = store.adjustment("const-q-y");
        assert!(adj < 0.0);
        assert!(adj >= -0.05);
    }

    #[test]
    fn test_few_ratings_stay_small() {
        let store = FeedbackStore::new(0.05);
        store.record("const-s-x", 1).unwrap();
        let one = store.adjustment("const-s-x");
        assert!(one < 0.05 / 2.0, "single rating should be well under cap");
    }

    #[test]
    fn test_jsonl_round_trip_tolerates_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.jsonl");

        let store = FeedbackStore::open(&path, 0.05).unwrap();
        store.record("const-s-x", 1).unwrap();
        store.record("const-s-x", 1).unwrap();
        store.record("const-q-y", -1).unwrap();
        drop(store);

        // Simulate an interrupted final write.
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"item_id\":\"const-q-y\",\"rat");
        std::fs::write(&path, content).unwrap();

        let reloaded = FeedbackStore::open(&path, 0.05).unwrap();
        assert_eq!(reloaded.rated_item_count(), 2);
        assert!(reloaded.adjustment("const-s-x") > 0.0);
        assert!(reloaded.adjustment("const-q-y") < 0.0);
    }
}

use std::path::PathBuf;

use tracing::warn;

use crate::limits::*;
use crate::model::Layout;

/// Runtime settings, read from `ROOMBLOCK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub layout: Layout,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            layout: Layout::default(),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing or unparsable values keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            let raw = lookup(key)?;
            let value = raw.parse().ok();
            if value.is_none() {
                warn!("ignoring {key}={raw}: not a valid value");
            }
            value
        }

        let defaults = Self::default();
        let layout = Layout {
            floors: parsed(&lookup, "ROOMBLOCK_FLOORS").unwrap_or(defaults.layout.floors),
            positions_per_floor: parsed(&lookup, "ROOMBLOCK_ROOMS_PER_FLOOR")
                .unwrap_or(defaults.layout.positions_per_floor),
            top_floor_positions: parsed(&lookup, "ROOMBLOCK_TOP_FLOOR_ROOMS")
                .unwrap_or(defaults.layout.top_floor_positions),
        };
        let layout = if layout_fits(&layout) {
            layout
        } else {
            warn!("ignoring layout {layout:?}: floors must be 1..={MAX_FLOORS}, rooms 1..={MAX_POSITIONS_PER_FLOOR}");
            defaults.layout
        };

        Self {
            data_dir: lookup("ROOMBLOCK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            layout,
            compact_threshold: parsed(&lookup, "ROOMBLOCK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "ROOMBLOCK_METRICS_PORT"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roomblock.wal")
    }
}

fn layout_fits(layout: &Layout) -> bool {
    (1..=MAX_FLOORS).contains(&layout.floors)
        && (1..=MAX_POSITIONS_PER_FLOOR).contains(&layout.positions_per_floor)
        && (1..=MAX_POSITIONS_PER_FLOOR).contains(&layout.top_floor_positions)
}

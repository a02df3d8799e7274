use crate::document::ChartDocument;
use crate::model::SchemaGeneration;
use firebeat_ports::storage::WallDefaults;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const LEGACY_CEILING_TYPE: i64 = 1;

/// Where a wall sits on the lane grid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WallExtent {
    pub beat: f64,
    pub duration: f64,
    pub line_index: i64,
    pub width: i64,
    pub layer: i64,
    pub height: i64,
}

/// Reads one legacy `_obstacles` record. Records without both `_lineLayer` and
/// `_height` fall back to the ceiling or full-height pair from `defaults`.
pub fn legacy_wall_extent(record: &Value, defaults: &WallDefaults) -> WallExtent {
    let int = |key: &str| record.get(key).and_then(Value::as_i64);
    let float = |key: &str| record.get(key).and_then(Value::as_f64).unwrap_or(0.0);

    let (layer, height) = match (int("_lineLayer"), int("_height")) {
        (Some(layer), Some(height)) => (layer, height),
        _ if int("_type") == Some(LEGACY_CEILING_TYPE) => {
            (defaults.ceiling_layer, defaults.ceiling_height)
        }
        _ => (defaults.full_layer, defaults.full_height),
    };

    WallExtent {
        beat: float("_time"),
        duration: float("_duration"),
        line_index: int("_lineIndex").unwrap_or(0),
        width: int("_width").unwrap_or(0),
        layer,
        height,
    }
}

fn modern_wall_extent(record: &Value) -> WallExtent {
    let int = |key: &str| record.get(key).and_then(Value::as_i64).unwrap_or(0);
    let float = |key: &str| record.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    WallExtent {
        beat: float("b"),
        duration: float("d"),
        line_index: int("x"),
        width: int("w"),
        layer: int("y"),
        height: int("h"),
    }
}

impl ChartDocument {
    /// Wall extents, for chart summaries. Walls never drive firing.
    pub fn walls(&self, defaults: &WallDefaults) -> Vec<WallExtent> {
        let (key, legacy) = match self.generation() {
            SchemaGeneration::Legacy => ("_obstacles", true),
            SchemaGeneration::Modern => ("obstacles", false),
        };
        self.records(key)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| record.is_object())
                    .map(|record| {
                        if legacy {
                            legacy_wall_extent(record, defaults)
                        } else {
                            modern_wall_extent(record)
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

use crate::document::{json_kind, parse_json_object, ChartDocument, ChartError};
use crate::model::SchemaGeneration;
use crate::reader::{ChartReader, Extraction, MapReader};
use crate::schedule::{ScheduleBuilder, ScheduleError};
use serde_json::{Map, Value};
use tracing::{info, warn};

const MODERN_MAJOR: u32 = 3;

/// The version marker as found in the chart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionMarker {
    Present(String),
    Missing,
    /// The marker key exists but is not a string.
    Malformed(String),
}

impl VersionMarker {
    pub fn from_root(root: &Map<String, Value>) -> Self {
        let value = root
            .get("_version")
            .filter(|value| !value.is_null())
            .or_else(|| root.get("version").filter(|value| !value.is_null()));
        match value {
            None => VersionMarker::Missing,
            Some(Value::String(marker)) => VersionMarker::Present(marker.clone()),
            Some(other) => VersionMarker::Malformed(json_kind(other).to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            VersionMarker::Present(marker) => Some(marker),
            _ => None,
        }
    }
}

/// Picks the schema generation for a version marker. Anything that is not a
/// recognizable 3.x marker reads as legacy.
pub fn detect_generation(marker: Option<&str>) -> SchemaGeneration {
    let major = marker
        .map(str::trim)
        .and_then(|marker| marker.split('.').next())
        .and_then(|major| major.parse::<u32>().ok());
    match major {
        Some(MODERN_MAJOR) => SchemaGeneration::Modern,
        _ => SchemaGeneration::Legacy,
    }
}

/// A reader bound to the document it was selected for. The JSON is parsed once.
#[derive(Clone, Debug)]
pub struct BoundReader {
    pub reader: ChartReader,
    pub document: ChartDocument,
    pub marker: VersionMarker,
}

impl BoundReader {
    pub fn generation(&self) -> SchemaGeneration {
        self.reader.generation()
    }

    /// True when the marker was missing or unusable and legacy was assumed.
    pub fn degraded(&self) -> bool {
        !matches!(self.marker, VersionMarker::Present(_))
    }

    pub fn extract_notes(&self, builder: &ScheduleBuilder) -> Result<Extraction, ScheduleError> {
        self.reader.extract_notes(&self.document, builder)
    }
}

pub fn select_reader(bytes: &[u8]) -> Result<BoundReader, ChartError> {
    let root = parse_json_object(bytes)?;
    Ok(select_reader_for(root))
}

pub fn select_reader_for(root: Map<String, Value>) -> BoundReader {
    let marker = VersionMarker::from_root(&root);
    match &marker {
        VersionMarker::Present(version) => info!(%version, "detected chart version"),
        VersionMarker::Missing => warn!("chart has no version marker; assuming legacy schema"),
        VersionMarker::Malformed(kind) => {
            warn!(kind = %kind, "chart version marker is not a string; assuming legacy schema")
        }
    }

    let generation = detect_generation(marker.as_str());
    let reader = ChartReader::for_generation(generation);
    info!(%generation, "selected chart reader");
    let document = reader.load_map(root);
    BoundReader {
        reader,
        document,
        marker,
    }
}

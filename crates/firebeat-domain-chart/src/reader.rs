use crate::document::{json_kind, ChartDocument};
use crate::model::{NormalizedNote, SchemaGeneration, Schedule};
use crate::schedule::{ScheduleBuilder, ScheduleError};
use crate::selector::VersionMarker;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

const LEGACY_NOTES: &str = "_notes";
const LEGACY_TIME: &str = "_time";
const LEGACY_LANE: &str = "_lineIndex";

const MODERN_COLLECTIONS: [&str; 2] = ["colorNotes", "basicBeatmapEvents"];
const MODERN_BEAT: &str = "b";
const MODERN_LANE: &str = "x";

/// Records that could not be turned into notes. Skipping is not fatal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractionReport {
    pub source: Option<String>,
    pub total_records: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

impl ExtractionReport {
    fn skip(&mut self, index: usize, reason: String) {
        warn!(record = index, %reason, "skipping malformed note record");
        self.skipped += 1;
        self.warnings.push(format!("record {index}: {reason}"));
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NoteExtraction {
    pub notes: Vec<NormalizedNote>,
    pub report: ExtractionReport,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Extraction {
    pub schedule: Schedule,
    pub report: ExtractionReport,
}

/// What every chart schema reader can do.
pub trait MapReader {
    fn generation(&self) -> SchemaGeneration;

    fn load_map(&self, root: Map<String, Value>) -> ChartDocument;

    fn read_notes(&self, document: &ChartDocument) -> NoteExtraction;

    fn extract_notes(
        &self,
        document: &ChartDocument,
        builder: &ScheduleBuilder,
    ) -> Result<Extraction, ScheduleError> {
        // Reject bad configuration before touching records.
        builder.validate()?;
        let NoteExtraction { notes, report } = self.read_notes(document);
        let schedule = builder.build(&notes)?;
        info!(
            generation = %self.generation(),
            pulses = schedule.len(),
            skipped = report.skipped,
            "extracted firing schedule"
        );
        Ok(Extraction { schedule, report })
    }
}

/// Reader for the flat `_notes` list of 2.x charts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LegacyReader;

/// Reader for 3.x charts (`colorNotes`, falling back to `basicBeatmapEvents`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModernReader;

impl MapReader for LegacyReader {
    fn generation(&self) -> SchemaGeneration {
        SchemaGeneration::Legacy
    }

    fn load_map(&self, root: Map<String, Value>) -> ChartDocument {
        let version = VersionMarker::from_root(&root).as_str().map(str::to_string);
        ChartDocument::new(SchemaGeneration::Legacy, version, root)
    }

    fn read_notes(&self, document: &ChartDocument) -> NoteExtraction {
        let mut report = ExtractionReport {
            source: Some(LEGACY_NOTES.to_string()),
            ..ExtractionReport::default()
        };
        let Some(records) = document.records(LEGACY_NOTES) else {
            warn!("chart has no {LEGACY_NOTES} list; wrong difficulty or format?");
            return NoteExtraction {
                notes: Vec::new(),
                report,
            };
        };

        let notes = collect_notes(records, LEGACY_TIME, LEGACY_LANE, &mut report);
        debug!(notes = notes.len(), "read legacy notes");
        NoteExtraction { notes, report }
    }
}

impl MapReader for ModernReader {
    fn generation(&self) -> SchemaGeneration {
        SchemaGeneration::Modern
    }

    fn load_map(&self, root: Map<String, Value>) -> ChartDocument {
        let version = VersionMarker::from_root(&root).as_str().map(str::to_string);
        ChartDocument::new(SchemaGeneration::Modern, version, root)
    }

    fn read_notes(&self, document: &ChartDocument) -> NoteExtraction {
        let Some((source, records)) = MODERN_COLLECTIONS.iter().find_map(|key| {
            document
                .records(key)
                .filter(|records| !records.is_empty())
                .map(|records| (*key, records))
        }) else {
            warn!("chart has neither colorNotes nor basicBeatmapEvents entries");
            return NoteExtraction::default();
        };

        let mut report = ExtractionReport {
            source: Some(source.to_string()),
            ..ExtractionReport::default()
        };
        let notes = collect_notes(records, MODERN_BEAT, MODERN_LANE, &mut report);
        debug!(source, notes = notes.len(), "read modern notes");
        NoteExtraction { notes, report }
    }
}

fn collect_notes(
    records: &[Value],
    beat_key: &str,
    lane_key: &str,
    report: &mut ExtractionReport,
) -> Vec<NormalizedNote> {
    report.total_records = records.len();
    let mut notes = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        match normalize_record(record, beat_key, lane_key) {
            Ok(note) => notes.push(note),
            Err(reason) => report.skip(index, reason),
        }
    }
    notes
}

fn normalize_record(
    record: &Value,
    beat_key: &str,
    lane_key: &str,
) -> Result<NormalizedNote, String> {
    let Some(fields) = record.as_object() else {
        return Err(format!("expected an object, found {}", json_kind(record)));
    };
    let beat_offset = match fields.get(beat_key) {
        None => return Err(format!("missing key {beat_key:?}")),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| format!("{beat_key:?} is {}, not a number", json_kind(value)))?,
    };
    if !beat_offset.is_finite() || beat_offset < 0.0 {
        return Err(format!("{beat_key:?} is negative ({beat_offset})"));
    }
    let lane_hint = fields.get(lane_key).and_then(Value::as_i64).unwrap_or(0);
    Ok(NormalizedNote {
        beat_offset,
        lane_hint,
    })
}

/// The closed set of readers, chosen by [`crate::selector::select_reader`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartReader {
    Legacy(LegacyReader),
    Modern(ModernReader),
}

impl ChartReader {
    pub fn for_generation(generation: SchemaGeneration) -> Self {
        match generation {
            SchemaGeneration::Legacy => ChartReader::Legacy(LegacyReader),
            SchemaGeneration::Modern => ChartReader::Modern(ModernReader),
        }
    }

    fn inner(&self) -> &dyn MapReader {
        match self {
            ChartReader::Legacy(reader) => reader,
            ChartReader::Modern(reader) => reader,
        }
    }
}

impl MapReader for ChartReader {
    fn generation(&self) -> SchemaGeneration {
        self.inner().generation()
    }

    fn load_map(&self, root: Map<String, Value>) -> ChartDocument {
        self.inner().load_map(root)
    }

    fn read_notes(&self, document: &ChartDocument) -> NoteExtraction {
        self.inner().read_notes(document)
    }
}

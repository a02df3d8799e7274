use crate::document::parse_json_object;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(thiserror::Error, Debug)]
pub enum InfoError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("info document has no {0}")]
    MissingField(&'static str),
}

/// What the scheduler needs from the package's info document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InfoDocument {
    pub bpm: f64,
    pub song_filename: String,
    pub song_name: Option<String>,
}

pub fn parse_info(bytes: &[u8]) -> Result<InfoDocument, InfoError> {
    let root = parse_json_object(bytes).map_err(|e| InfoError::Parse(e.to_string()))?;

    let bpm = lookup(&root, &["_beatsPerMinute", "beatsPerMinute"], "bpm")
        .and_then(Value::as_f64)
        .ok_or(InfoError::MissingField("bpm"))?;
    let song_filename = lookup(&root, &["_songFilename", "songFilename"], "songFilename")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .ok_or(InfoError::MissingField("song filename"))?
        .to_string();
    let song_name = lookup(&root, &["_songName", "songName"], "songName")
        .or_else(|| root.get("song").and_then(|song| song.get("title")))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(InfoDocument {
        bpm,
        song_filename,
        song_name,
    })
}

// 4.x info files nest audio fields under "audio".
fn lookup<'a>(root: &'a Map<String, Value>, flat: &[&str], nested: &str) -> Option<&'a Value> {
    flat.iter()
        .find_map(|key| root.get(*key).filter(|value| !value.is_null()))
        .or_else(|| root.get("audio").and_then(|audio| audio.get(nested)))
}

//! Segment file loading
//!
//! A release's raw segments come either from a directory holding one
//! `<segment>.json` / `<segment>.yaml` file per segment, or from a single file
//! mapping segment names to values. Loading only parses; schema validation is
//! left to normalization so every problem surfaces as a malformed segment.

use crate::error::LoadError;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;
use ua_fingerprint::{ReleaseFingerprint, SegmentName};

/// Raw segment values keyed by segment
pub type RawSegments = BTreeMap<SegmentName, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

fn format_of(path: &Path) -> Option<Format> {
    match path.extension()?.to_str()? {
        "json" => Some(Format::Json),
        "yaml" | "yml" => Some(Format::Yaml),
        _ => None,
    }
}

fn parse_file(path: &Path, format: Format) -> Result<JsonValue, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = match format {
        Format::Json => serde_json::from_str(&text).map_err(|e| e.to_string()),
        Format::Yaml => serde_yaml::from_str(&text).map_err(|e| e.to_string()),
    };
    parsed.map_err(|reason| LoadError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

/// Load raw segments from a directory or a single file
///
/// # Errors
/// Unreadable or unparsable files, unknown segment names, duplicates
pub fn load_segments(path: impl AsRef<Path>) -> Result<RawSegments, LoadError> {
    let path = path.as_ref();
    if path.is_dir() {
        load_dir(path)
    } else {
        load_file(path)
    }
}

fn load_dir(dir: &Path) -> Result<RawSegments, LoadError> {
    let io_err = |source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths: Vec<_> = fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()
        .map_err(io_err)?;
    paths.sort();

    let mut segments = RawSegments::new();
    for path in paths {
        let Some(format) = format_of(&path) else {
            debug!(path = %path.display(), "skipping non-segment file");
            continue;
        };
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let name: SegmentName = stem.parse().map_err(|_| LoadError::UnknownSegment {
            path: path.clone(),
            name: stem.to_string(),
        })?;
        if segments.contains_key(&name) {
            return Err(LoadError::Duplicate {
                path: dir.to_path_buf(),
                segment: name,
            });
        }
        segments.insert(name, parse_file(&path, format)?);
    }
    Ok(segments)
}

fn load_file(path: &Path) -> Result<RawSegments, LoadError> {
    let format = format_of(path).unwrap_or(Format::Json);
    let JsonValue::Object(map) = parse_file(path, format)? else {
        return Err(LoadError::Parse {
            path: path.to_path_buf(),
            reason: "expected an object keyed by segment name".into(),
        });
    };
    map.into_iter()
        .map(|(key, value)| {
            let name = key.parse().map_err(|_| LoadError::UnknownSegment {
                path: path.to_path_buf(),
                name: key.clone(),
            })?;
            Ok((name, value))
        })
        .collect()
}

/// Load a fingerprint previously emitted by `ua audit-fingerprint`
///
/// # Errors
/// Unreadable file or invalid fingerprint JSON
pub fn load_fingerprint(path: impl AsRef<Path>) -> Result<ReleaseFingerprint, LoadError> {
    let path = path.as_ref();
    let value = parse_file(path, format_of(path).unwrap_or(Format::Json))?;
    serde_json::from_value(value).map_err(|e| LoadError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn directory_with_mixed_formats() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("persona_tone.json"), r#"{"traits": {"warmth": 0.5}}"#).unwrap();
        fs::write(dir.path().join("feature_flags.yaml"), "voice_wake: false\n").unwrap();
        fs::write(dir.path().join("README.md"), "notes").unwrap();

        let segments = load_segments(dir.path()).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[&SegmentName::PersonaTone]["traits"]["warmth"], 0.5);
        assert_eq!(segments[&SegmentName::FeatureFlags], json!({"voice_wake": false}));
    }

    #[test]
    fn unknown_segment_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("themes.json"), "{}").unwrap();
        assert!(matches!(
            load_segments(dir.path()),
            Err(LoadError::UnknownSegment { name, .. }) if name == "themes"
        ));
    }

    #[test]
    fn duplicate_segment_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("style_tokens.json"), "{}").unwrap();
        fs::write(dir.path().join("style_tokens.yml"), "{}").unwrap();
        assert!(matches!(load_segments(dir.path()), Err(LoadError::Duplicate { .. })));
    }

    #[test]
    fn single_file_keyed_by_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release.yaml");
        fs::write(&path, "security_policy:\n  tls: required\nmigration_plan:\n  steps: []\n").unwrap();
        let segments = load_segments(&path).unwrap();
        assert_eq!(segments[&SegmentName::SecurityPolicy], json!({"tls": "required"}));
        assert!(segments.contains_key(&SegmentName::MigrationPlan));
    }

    #[test]
    fn unparsable_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release.json");
        fs::write(&path, "{not json").unwrap();
        match load_segments(&path).unwrap_err() {
            LoadError::Parse { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

//! Structured progress sentinel parsing.
//!
//! Children report progress by printing lines of the form
//! `PROGRESS:{"phase":"download","percent":42,...}`. Anything that is not
//! a well-formed sentinel is ordinary output; malformed JSON is never an
//! error.

use serde::Deserialize;

use crate::phase::Phase;

/// Sentinel prefix checked before attempting JSON parsing.
const SENTINEL_PREFIX: &str = "PROGRESS:{";

/// A progress update parsed from a sentinel line.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ProgressUpdate {
    /// Phase the update applies to; missing or unknown values map to
    /// [`Phase::Execute`].
    #[serde(default, deserialize_with = "deserialize_phase")]
    pub phase: Option<Phase>,
    /// Completion percentage, 0..=100.
    #[serde(default)]
    pub percent: Option<f64>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Bytes downloaded so far.
    #[serde(default)]
    pub bytes_downloaded: Option<u64>,
    /// Total bytes to download.
    #[serde(default)]
    pub bytes_total: Option<u64>,
    /// Items completed so far.
    #[serde(default)]
    pub items_completed: Option<u64>,
    /// Total items.
    #[serde(default)]
    pub items_total: Option<u64>,
}

impl ProgressUpdate {
    /// The phase this update applies to, defaulting to Execute.
    pub fn effective_phase(&self) -> Phase {
        self.phase.unwrap_or(Phase::Execute)
    }
}

fn deserialize_phase<'de, D>(deserializer: D) -> Result<Option<Phase>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    // Unknown phase strings degrade to Execute rather than rejecting the
    // whole sentinel.
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(|s| s.parse::<Phase>().unwrap_or(Phase::Execute)))
}

/// Try to parse a sentinel line.
///
/// Returns `None` for ordinary output, including lines that carry the
/// prefix but contain malformed JSON, and sentinel lines with trailing
/// garbage after the closing brace.
pub fn parse_sentinel(line: &str) -> Option<ProgressUpdate> {
    let line = line.trim_end_matches(['\r', '\n']);
    if !line.starts_with(SENTINEL_PREFIX) || !line.ends_with('}') {
        return None;
    }
    let json = &line["PROGRESS:".len()..];
    serde_json::from_str(json).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn plain_line_is_not_a_sentinel() {
        assert!(parse_sentinel("Unpacking libfoo (1.2-3) ...").is_none());
    }

    #[test]
    fn full_sentinel_parses() {
        let update = parse_sentinel(
            r#"PROGRESS:{"phase":"download","percent":42.5,"message":"fetching","bytes_downloaded":1024,"bytes_total":2048}"#,
        )
        .unwrap();
        assert_eq!(update.effective_phase(), Phase::Download);
        assert_eq!(update.percent, Some(42.5));
        assert_eq!(update.message.as_deref(), Some("fetching"));
        assert_eq!(update.bytes_downloaded, Some(1024));
        assert_eq!(update.bytes_total, Some(2048));
    }

    #[test]
    fn items_fields_parse() {
        let update =
            parse_sentinel(r#"PROGRESS:{"phase":"execute","items_completed":3,"items_total":9}"#)
                .unwrap();
        assert_eq!(update.items_completed, Some(3));
        assert_eq!(update.items_total, Some(9));
    }

    #[test]
    fn missing_phase_defaults_to_execute() {
        let update = parse_sentinel(r#"PROGRESS:{"percent":10}"#).unwrap();
        assert_eq!(update.effective_phase(), Phase::Execute);
    }

    #[test]
    fn unknown_phase_defaults_to_execute() {
        let update = parse_sentinel(r#"PROGRESS:{"phase":"verify","percent":10}"#).unwrap();
        assert_eq!(update.effective_phase(), Phase::Execute);
    }

    #[test]
    fn malformed_json_is_plain_output() {
        assert!(parse_sentinel(r#"PROGRESS:{"percent":"#).is_none());
        assert!(parse_sentinel("PROGRESS:{not json}").is_none());
    }

    #[test]
    fn trailing_text_is_plain_output() {
        assert!(parse_sentinel(r#"PROGRESS:{"percent":10} and more"#).is_none());
    }

    #[test]
    fn crlf_terminated_sentinel_parses() {
        assert!(parse_sentinel("PROGRESS:{\"percent\":10}\r").is_some());
    }
}

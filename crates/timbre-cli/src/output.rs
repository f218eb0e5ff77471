//! JSON output formatting

use serde::Serialize;
use timbre_core::{Analysis, AnalysisError, ErrorReport, MidiAnalysis, Result};

/// Outcome of analysing one input file
#[derive(Debug, Serialize)]
pub struct InputReport {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
    /// Harmony of a MIDI input, which has no embedding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi: Option<MidiAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    /// Library record written for this input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
}

impl InputReport {
    pub fn from_result(input: impl Into<String>, result: Result<Analysis>) -> Self {
        let (analysis, error) = match result {
            Ok(analysis) => (Some(analysis), None),
            Err(e) => (None, Some(e.report())),
        };
        Self {
            input: input.into(),
            analysis,
            midi: None,
            error,
            record: None,
        }
    }

    pub fn from_midi_result(input: impl Into<String>, result: Result<MidiAnalysis>) -> Self {
        let (midi, error) = match result {
            Ok(midi) => (Some(midi), None),
            Err(e) => (None, Some(e.report())),
        };
        Self {
            input: input.into(),
            analysis: None,
            midi,
            error,
            record: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing output: {}", e),
    }
}

/// Print an error as `{ "kind", "message" }`
pub fn print_error(error: &AnalysisError) {
    print_json(&error.report());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_input_serializes_kind_and_message() {
        let report = InputReport::from_result("silence.wav", Err(AnalysisError::EmptyInput));
        assert!(report.is_error());

        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["input"], "silence.wav");
        assert_eq!(json["error"]["kind"], "empty_input");
        assert_eq!(json["error"]["message"], "input decoded to zero samples");
        assert!(json.get("analysis").is_none());
        assert!(json.get("midi").is_none());
        assert!(json.get("record").is_none());
    }
}

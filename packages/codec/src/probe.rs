//! Parsing of ffprobe's JSON report.

use serde::Deserialize;

use crate::CodecError;

/// Duration and sample-rate metadata read back from an encoded file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioInfo {
    pub duration_secs: f64,
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    sample_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -of json` output. A missing or non-numeric duration is an error;
/// the sample rate is optional.
pub fn parse_probe_output(stdout: &[u8]) -> Result<AudioInfo, CodecError> {
    let report: ProbeReport =
        serde_json::from_slice(stdout).map_err(|e| CodecError::Probe(e.to_string()))?;

    let raw = report
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| CodecError::Probe("no format duration reported".into()))?;
    let duration_secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| CodecError::Probe(format!("duration is not a number: {raw}")))?;
    if !duration_secs.is_finite() || duration_secs < 0.0 {
        return Err(CodecError::Probe(format!("duration out of range: {raw}")));
    }

    let sample_rate = report
        .streams
        .iter()
        .find_map(|s| s.sample_rate.as_deref())
        .and_then(|s| s.trim().parse().ok());

    Ok(AudioInfo {
        duration_secs,
        sample_rate,
    })
}

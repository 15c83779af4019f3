//! Codec errors.

use std::time::Duration;

/// Errors raised by transcoder invocations and waveform math.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} exited with {status}: {stderr}")]
    Failed {
        stage: &'static str,
        status: String,
        stderr: String,
    },

    #[error("{stage} timed out after {}s", .timeout.as_secs())]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },

    #[error("ffmpeg has no {encoder} encoder")]
    EncoderUnavailable { encoder: String },

    #[error("unreadable probe output: {0}")]
    Probe(String),

    #[error("no audio samples decoded ({bytes} bytes of output)")]
    NoSamples { bytes: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Keep the last lines of a tool's stderr so error messages stay readable.
pub(crate) fn stderr_tail(stderr: &[u8]) -> String {
    const MAX_LINES: usize = 12;

    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return "no diagnostic output".to_string();
    }
    let start = lines.len().saturating_sub(MAX_LINES);
    lines[start..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_lines() {
        let stderr: String = (0..20).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(stderr.as_bytes());
        assert!(tail.starts_with("line 8"));
        assert!(tail.ends_with("line 19"));
    }

    #[test]
    fn empty_stderr_is_named() {
        assert_eq!(stderr_tail(b"\n  \n"), "no diagnostic output");
    }

    #[test]
    fn timeout_message_names_stage() {
        let err = CodecError::Timeout {
            stage: "normalize",
            timeout: Duration::from_secs(300),
        };
        assert_eq!(err.to_string(), "normalize timed out after 300s");
    }
}

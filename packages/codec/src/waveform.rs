//! Waveform peak extraction and SVG rendering.
//!
//! One bucket per pixel column, peak = max absolute sample in the bucket,
//! normalized against the loudest bucket. Bars are drawn as vertical strokes
//! centered on the horizontal midline.

use std::fmt::Write as _;

use crate::CodecError;

const BACKGROUND: &str = "#1a1a1e";
const STROKE: &str = "#00d4ff";
const MIDLINE: &str = "#333";

/// A rendered waveform and the normalized peaks it was drawn from.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub peaks: Vec<f32>,
    pub svg: String,
}

impl Waveform {
    /// Compute peaks for `width` columns and render them onto a `width x height` canvas.
    pub fn generate(samples: &[f32], width: u32, height: u32) -> Result<Self, CodecError> {
        if samples.is_empty() {
            return Err(CodecError::NoSamples { bytes: 0 });
        }
        let peaks = compute_peaks(samples, width as usize);
        let svg = render_svg(&peaks, width, height);
        Ok(Self { peaks, svg })
    }
}

/// Interpret raw `f32le` bytes. A trailing partial sample is ignored.
pub fn decode_f32le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Split `samples` into `buckets` contiguous ranges and return each range's peak in `[0, 1]`.
///
/// Non-finite samples are skipped. Silence yields all zeros.
pub fn compute_peaks(samples: &[f32], buckets: usize) -> Vec<f32> {
    if buckets == 0 {
        return Vec::new();
    }

    let len = samples.len();
    let mut peaks: Vec<f32> = (0..buckets)
        .map(|i| {
            let start = i * len / buckets;
            let end = ((i + 1) * len / buckets).max(start);
            samples[start..end]
                .iter()
                .filter(|s| s.is_finite())
                .fold(0.0_f32, |acc, s| acc.max(s.abs()))
        })
        .collect();

    let loudest = peaks.iter().copied().fold(0.0_f32, f32::max);
    if loudest > 0.0 {
        for p in &mut peaks {
            *p /= loudest;
        }
    }
    peaks
}

/// Render normalized peaks as a single stroked SVG path over a dark background.
pub fn render_svg(peaks: &[f32], width: u32, height: u32) -> String {
    let mid = height as f32 / 2.0;
    let column = if peaks.is_empty() {
        0.0
    } else {
        width as f32 / peaks.len() as f32
    };

    let mut d = String::with_capacity(peaks.len() * 24);
    for (i, peak) in peaks.iter().enumerate() {
        let x = (i as f32 + 0.5) * column;
        let half = peak.clamp(0.0, 1.0) * mid;
        let _ = write!(d, "M{:.2} {:.2}V{:.2}", x, mid - half, mid + half);
    }

    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" "#,
            r#"viewBox="0 0 {w} {h}" preserveAspectRatio="none">"#,
            r#"<rect width="100%" height="100%" fill="{bg}"/>"#,
            r#"<line x1="0" y1="{mid:.2}" x2="{w}" y2="{mid:.2}" stroke="{ml}" stroke-width="0.5"/>"#,
            r#"<path d="{d}" stroke="{fg}" stroke-width="{sw:.2}" fill="none" opacity="0.8"/>"#,
            "</svg>"
        ),
        w = width,
        h = height,
        bg = BACKGROUND,
        ml = MIDLINE,
        fg = STROKE,
        mid = mid,
        d = d,
        sw = column.max(1.0),
    )
}

use tracing::{debug, info};

use dpctf_core::config::AudioConfig;
use dpctf_core::types::AudioSegment;

use crate::aligner::SignalAligner;
use crate::error::AudioError;
use crate::mezzanine::MezzanineSegment;
use crate::trim::{trim, TrimParams};

/// Output of [`decode_segments`].
#[derive(Debug, Clone, Default)]
pub struct DecodedAudio {
    /// Trim offset of the first chunk, in samples.
    pub first_offset: usize,
    pub segments: Vec<AudioSegment>,
}

impl DecodedAudio {
    pub fn first_offset_ms(&self, sample_rate: u32) -> f64 {
        self.first_offset as f64 / samples_per_ms(sample_rate) as f64
    }
}

pub fn samples_per_ms(sample_rate: u32) -> usize {
    (sample_rate / 1000).max(1) as usize
}

/// Decode the subject recording into one [`AudioSegment`] per observation
/// period of every expected mezzanine chunk.
///
/// Each chunk is trimmed against the full subject first; every period is
/// then located with a local alignment inside a neighbourhood window around
/// its nominal position. Only the whole seconds of a chunk are decoded.
pub fn decode_segments(
    start_media_time: f64,
    chunks: &[MezzanineSegment],
    subject: &[i16],
    sample_rate: u32,
    sample_length_ms: u32,
    config: &AudioConfig,
) -> Result<DecodedAudio, AudioError> {
    let spms = samples_per_ms(sample_rate);
    let op = spms * sample_length_ms as usize;
    let neighborhood = spms * config.observation_neighborhood_ms as usize;
    let second = sample_rate.max(1) as usize;
    let params = TrimParams {
        observation_period: op,
        check_count: config.alignment_check_count,
    };
    if op == 0 {
        return Err(AudioError::Alignment(
            "Observation period must not be empty".to_string(),
        ));
    }

    let mut aligner = SignalAligner::new();
    let mut first_offset = None;
    let mut segments = Vec::new();
    let mut media_time = start_media_time;

    for chunk in chunks {
        let (trimmed, offset) = trim(&mut aligner, subject, &chunk.data, params)?;
        first_offset.get_or_insert(offset);
        debug!(
            content_id = %chunk.content_id,
            trim_from = offset,
            trimmed_len = trimmed.len(),
            "Trimmed recording"
        );

        let periods = chunk.data.len() / second * second / op;
        for i in 0..periods {
            if trimmed.len() < neighborhood {
                return Err(AudioError::Alignment(
                    "Too little valid data in the recorded audio".to_string(),
                ));
            }
            let (start, end) = neighborhood_window(i * op, neighborhood, trimmed.len());
            let pattern = &chunk.data[i * op..(i + 1) * op];
            let position = aligner.find_offset(&trimmed[start..end], pattern) + start;

            segments.push(AudioSegment {
                content_id: chunk.content_id.clone(),
                media_time: media_time + (i as f64) * f64::from(sample_length_ms),
                audio_segment_timing: (position + offset) as f64 / spms as f64,
                duration: f64::from(sample_length_ms),
            });
        }
        media_time += (periods as f64) * f64::from(sample_length_ms);
    }

    info!(segments = segments.len(), "Audio segments decoded");
    Ok(DecodedAudio {
        first_offset: first_offset.unwrap_or(0),
        segments,
    })
}

/// `[nominal - w/2, nominal + w/2)` shifted to lie inside `[0, len)`.
fn neighborhood_window(nominal: usize, width: usize, len: usize) -> (usize, usize) {
    let half = width / 2;
    let mut start = nominal.saturating_sub(half);
    let mut end = nominal + half;
    if nominal < half {
        start = 0;
        end = width;
    }
    if end > len {
        start = len.saturating_sub(width);
        end = len;
    }
    (start, end)
}

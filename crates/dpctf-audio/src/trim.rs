use tracing::debug;

use crate::aligner::SignalAligner;
use crate::error::AudioError;

/// Window geometry shared by the trim searches.
#[derive(Debug, Clone, Copy)]
pub struct TrimParams {
    /// Samples per observation period.
    pub observation_period: usize,
    /// Candidate positions tried before giving up.
    pub check_count: usize,
}

fn window(data: &[i16], start: usize, end: usize) -> &[i16] {
    let end = end.min(data.len());
    let start = start.min(end);
    &data[start..end]
}

/// Position in `subject` where the watermark `pattern` begins.
///
/// Tries consecutive window pairs from the start of the pattern; a candidate
/// is accepted once three adjacent windows line up one period apart.
pub fn find_trim_start(
    aligner: &mut SignalAligner,
    subject: &[i16],
    pattern: &[i16],
    params: TrimParams,
) -> Result<usize, AudioError> {
    let op = params.observation_period;
    for count in 0..params.check_count {
        let mut aligned = 0;
        let mut candidate = 0i64;
        for i in count..count + 2 {
            let first = window(pattern, op * i, op * (i + 1));
            let second = window(pattern, op * (i + 1), op * (i + 2));
            let offset1 = aligner.find_offset(subject, first) as i64;
            let offset2 = aligner.find_offset(subject, second) as i64;

            if i == count {
                // Window `count` sits `count` periods into the pattern, so the
                // pattern itself starts that many periods earlier.
                candidate = offset1 - (op * count) as i64;
            }
            let diff = offset2 - offset1;
            if diff < 0 || diff > (op * 2) as i64 {
                break;
            }
            aligned += 1;
        }

        if aligned > 1 {
            debug!(count, trim_from = candidate, "Watermark start aligned");
            return Ok(candidate.max(0) as usize);
        }
    }

    Err(AudioError::Alignment(
        "Unable to align the start of the mezzanine watermark with the recording".to_string(),
    ))
}

/// Position in `subject` just past the end of the watermark `pattern`.
///
/// Mirror of [`find_trim_start`], walking windows back from the pattern end.
pub fn find_trim_end(
    aligner: &mut SignalAligner,
    subject: &[i16],
    pattern: &[i16],
    params: TrimParams,
) -> Result<usize, AudioError> {
    let op = params.observation_period;
    let len = pattern.len();
    for count in 1..=params.check_count {
        let mut aligned = 0;
        let mut candidate = 0i64;
        for i in count..count + 2 {
            let first = window(
                pattern,
                len.saturating_sub(op * i),
                len.saturating_sub(op * (i - 1)),
            );
            let second = window(
                pattern,
                len.saturating_sub(op * (i + 1)),
                len.saturating_sub(op * i),
            );
            let offset1 = aligner.find_offset(subject, first) as i64;
            let offset2 = aligner.find_offset(subject, second) as i64;

            if i == count {
                candidate = offset1 + (op * count) as i64;
            }
            let diff = offset1 - offset2;
            if diff < 0 || diff > (op * 2) as i64 {
                break;
            }
            aligned += 1;
        }

        if aligned > 1 {
            debug!(count, trim_to = candidate, "Watermark end aligned");
            return Ok((candidate.max(0) as usize).min(subject.len()));
        }
    }

    Err(AudioError::Alignment(
        "Unable to align the end of the mezzanine watermark with the recording".to_string(),
    ))
}

/// Crop `subject` to the watermarked region of `pattern`.
///
/// Returns the cropped samples and the start offset within `subject`.
pub fn trim<'a>(
    aligner: &mut SignalAligner,
    subject: &'a [i16],
    pattern: &[i16],
    params: TrimParams,
) -> Result<(&'a [i16], usize), AudioError> {
    let trim_from = find_trim_start(aligner, subject, pattern, params)?;
    let trim_to = find_trim_end(aligner, subject, pattern, params)?;
    if trim_to <= trim_from {
        return Err(AudioError::Alignment(format!(
            "Watermark end {trim_to} is not after start {trim_from}"
        )));
    }
    Ok((&subject[trim_from..trim_to], trim_from))
}

//! DPCTF Audio crate - PN watermark alignment, recording trim and segment decoding.
//!
//! Provides FFT cross-correlation alignment of watermark windows against a
//! recording, the three-point trim search that finds where the watermark
//! starts and ends, per-period segment decoding, and WAV/manifest loading of
//! the mezzanine watermark files.

pub mod aligner;
pub mod decoder;
pub mod error;
pub mod mezzanine;
pub mod trim;

pub use aligner::{find_offset, next_power_of_two, SignalAligner};
pub use decoder::{decode_segments, samples_per_ms, DecodedAudio};
pub use error::AudioError;
pub use mezzanine::{MezzanineLibrary, MezzanineSegment, Recording};
pub use trim::{find_trim_end, find_trim_start, trim, TrimParams};

#[cfg(test)]
pub(crate) mod test_support {
    /// Deterministic pseudo-noise samples.
    pub fn pn_sequence(len: usize, seed: u64) -> Vec<i16> {
        let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                if state & 1 == 0 {
                    8000
                } else {
                    -8000
                }
            })
            .collect()
    }

    /// Silence, the watermark, then silence.
    pub fn synthetic_recording(watermark: &[i16], lead: usize, tail: usize) -> Vec<i16> {
        let mut out = vec![0i16; lead];
        out.extend_from_slice(watermark);
        out.extend(std::iter::repeat(0).take(tail));
        out
    }
}

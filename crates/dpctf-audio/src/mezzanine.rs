use std::collections::HashMap;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::Deserialize;
use tracing::{debug, info};

use dpctf_core::config::AudioConfig;

use crate::decoder::samples_per_ms;
use crate::error::AudioError;

/// Expected watermark audio for one contiguous piece of content.
#[derive(Debug, Clone, PartialEq)]
pub struct MezzanineSegment {
    pub content_id: String,
    pub data: Vec<i16>,
}

impl MezzanineSegment {
    pub fn new(content_id: impl Into<String>, data: Vec<i16>) -> Self {
        Self {
            content_id: content_id.into(),
            data,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "Mezzanine")]
    mezzanine: ManifestEntry,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    name: String,
    md5: String,
}

/// Read the left channel of a PCM WAV file.
///
/// Anything other than the required sample rate and integer bit depth is a
/// fatal format error.
pub fn read_wav(
    path: &Path,
    sample_rate: u32,
    bits_per_sample: u16,
) -> Result<Vec<i16>, AudioError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate != sample_rate {
        return Err(AudioError::Format(format!(
            "{} has sample rate {} Hz, expected {} Hz",
            path.display(),
            spec.sample_rate,
            sample_rate
        )));
    }
    if spec.bits_per_sample != bits_per_sample
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(AudioError::Format(format!(
            "{} is {}b {:?}, expected {}b PCM",
            path.display(),
            spec.bits_per_sample,
            spec.sample_format,
            bits_per_sample
        )));
    }

    let channels = usize::from(spec.channels.max(1));
    let samples = reader
        .samples::<i16>()
        .step_by(channels)
        .collect::<Result<Vec<_>, _>>()?;
    debug!(path = %path.display(), samples = samples.len(), channels, "WAV loaded");
    Ok(samples)
}

/// Check `wav_path` against the MD5 recorded in its JSON manifest.
pub fn verify_manifest(wav_path: &Path, manifest_path: &Path) -> Result<(), AudioError> {
    let manifest: Manifest = serde_json::from_str(&std::fs::read_to_string(manifest_path)?)
        .map_err(|e| AudioError::Integrity(format!("{}: {e}", manifest_path.display())))?;

    let bytes = std::fs::read(wav_path)?;
    let digest = format!("{:x}", Md5::digest(&bytes));
    if !digest.eq_ignore_ascii_case(manifest.mezzanine.md5.trim()) {
        return Err(AudioError::Integrity(format!(
            "{} appears corrupted: md5 {} does not match manifest {} for {}",
            wav_path.display(),
            digest,
            manifest.mezzanine.md5,
            manifest.mezzanine.name
        )));
    }
    Ok(())
}

/// PN watermark files keyed by content id, loaded on first use.
///
/// Files live at `<dir>/<content_id>.wav` next to `<content_id>.json`
/// manifests.
pub struct MezzanineLibrary {
    dir: PathBuf,
    sample_rate: u32,
    bits_per_sample: u16,
    cache: HashMap<String, Vec<i16>>,
}

impl MezzanineLibrary {
    pub fn new(dir: impl Into<PathBuf>, config: &AudioConfig) -> Self {
        Self {
            dir: dir.into(),
            sample_rate: config.required_sample_rate,
            bits_per_sample: config.required_bits_per_sample,
            cache: HashMap::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Register already decoded watermark samples.
    pub fn insert(&mut self, content_id: impl Into<String>, samples: Vec<i16>) {
        self.cache.insert(content_id.into(), samples);
    }

    pub fn load(&mut self, content_id: &str) -> Result<&[i16], AudioError> {
        if !self.cache.contains_key(content_id) {
            let wav = self.dir.join(format!("{content_id}.wav"));
            let manifest = self.dir.join(format!("{content_id}.json"));
            verify_manifest(&wav, &manifest)?;
            let samples = read_wav(&wav, self.sample_rate, self.bits_per_sample)?;
            info!(content_id, path = %wav.display(), "Mezzanine audio loaded");
            self.cache.insert(content_id.to_string(), samples);
        }
        Ok(self
            .cache
            .get(content_id)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    /// Samples of `content_id` covering `[start_ms, end_ms)`.
    pub fn segment(
        &mut self,
        content_id: &str,
        start_ms: f64,
        end_ms: f64,
    ) -> Result<MezzanineSegment, AudioError> {
        let spms = samples_per_ms(self.sample_rate) as f64;
        let samples = self.load(content_id)?;
        let start = ((start_ms.max(0.0) * spms) as usize).min(samples.len());
        let end = ((end_ms.max(0.0) * spms) as usize).clamp(start, samples.len());
        Ok(MezzanineSegment::new(content_id, samples[start..end].to_vec()))
    }
}

/// Recorded audio of the whole session.
#[derive(Debug, Clone)]
pub struct Recording {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl Recording {
    pub fn open(path: &Path, config: &AudioConfig) -> Result<Self, AudioError> {
        let samples = read_wav(
            path,
            config.required_sample_rate,
            config.required_bits_per_sample,
        )?;
        info!(path = %path.display(), samples = samples.len(), "Recording audio loaded");
        Ok(Self {
            sample_rate: config.required_sample_rate,
            samples,
        })
    }

    /// Samples from `start_ms` onward, the subject of one test.
    pub fn subject_from_ms(&self, start_ms: f64) -> &[i16] {
        let start = (start_ms.max(0.0) * samples_per_ms(self.sample_rate) as f64) as usize;
        &self.samples[start.min(self.samples.len())..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(path: &Path, rate: u32, bits: u16, channels: u16, frames: &[(i16, i16)]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: bits,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for (left, right) in frames {
            writer.write_sample(*left).unwrap();
            if channels == 2 {
                writer.write_sample(*right).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn write_manifest(dir: &Path, name: &str, md5: &str) {
        let manifest = serde_json::json!({"Mezzanine": {"name": name, "md5": md5}});
        std::fs::write(dir.join(format!("{name}.json")), manifest.to_string()).unwrap();
    }

    fn md5_of(path: &Path) -> String {
        format!("{:x}", Md5::digest(std::fs::read(path).unwrap()))
    }

    // =========================================================================
    // WAV reading
    // =========================================================================

    #[test]
    fn test_read_wav_left_channel_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 48_000, 16, 2, &[(1, -1), (2, -2), (3, -3)]);

        let samples = read_wav(&path, 48_000, 16).unwrap();
        assert_eq!(samples, vec![1, 2, 3]);
    }

    #[test]
    fn test_read_wav_rejects_wrong_sample_rate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cd.wav");
        write_wav(&path, 44_100, 16, 1, &[(0, 0)]);

        let err = read_wav(&path, 48_000, 16).unwrap_err();
        assert!(matches!(err, AudioError::Format(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_read_wav_rejects_wrong_bit_depth() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("eight.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(1i8).unwrap();
        writer.finalize().unwrap();

        assert!(matches!(read_wav(&path, 48_000, 16), Err(AudioError::Format(_))));
    }

    // =========================================================================
    // Manifest and library
    // =========================================================================

    #[test]
    fn test_manifest_match_and_mismatch() {
        let dir = TempDir::new().unwrap();
        let wav = dir.path().join("PN01.wav");
        write_wav(&wav, 48_000, 16, 1, &[(5, 0), (6, 0)]);

        write_manifest(dir.path(), "PN01", &md5_of(&wav).to_uppercase());
        verify_manifest(&wav, &dir.path().join("PN01.json")).unwrap();

        write_manifest(dir.path(), "PN01", "00000000000000000000000000000000");
        let err = verify_manifest(&wav, &dir.path().join("PN01.json")).unwrap_err();
        assert!(matches!(err, AudioError::Integrity(_)));
    }

    #[test]
    fn test_library_loads_and_slices() {
        let dir = TempDir::new().unwrap();
        let wav = dir.path().join("PN02.wav");
        let frames: Vec<(i16, i16)> = (0..480).map(|i| (i as i16, 0)).collect();
        write_wav(&wav, 48_000, 16, 1, &frames);
        write_manifest(dir.path(), "PN02", &md5_of(&wav));

        let mut library = MezzanineLibrary::new(dir.path(), &AudioConfig::default());
        assert_eq!(library.load("PN02").unwrap().len(), 480);

        // 48 samples per ms
        let segment = library.segment("PN02", 2.0, 4.0).unwrap();
        assert_eq!(segment.content_id, "PN02");
        assert_eq!(segment.data.len(), 96);
        assert_eq!(segment.data[0], 96);

        let tail = library.segment("PN02", 9.0, 50.0).unwrap();
        assert_eq!(tail.data.len(), 48);
    }

    #[test]
    fn test_library_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut library = MezzanineLibrary::new(dir.path(), &AudioConfig::default());
        assert!(matches!(library.load("PN09"), Err(AudioError::Io(_))));
    }

    #[test]
    fn test_library_insert_bypasses_disk() {
        let mut library = MezzanineLibrary::new("/nonexistent", &AudioConfig::default());
        library.insert("PN03", vec![7; 96]);
        assert_eq!(library.segment("PN03", 0.0, 1.0).unwrap().data, vec![7; 48]);
    }

    #[test]
    fn test_recording_subject_from_ms() {
        let recording = Recording {
            sample_rate: 48_000,
            samples: (0..960).map(|i| i as i16).collect(),
        };
        assert_eq!(recording.subject_from_ms(10.0).len(), 480);
        assert_eq!(recording.subject_from_ms(10.0)[0], 480);
        assert!(recording.subject_from_ms(100.0).is_empty());
    }
}

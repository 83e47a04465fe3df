use crate::error::DecodeError;
use crate::protocol::models::MediaChunk;
use base64::Engine as _;
use base64::engine::general_purpose;

/// Outbound microphone rate.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Inbound model speech rate, also assumed for untagged inbound audio.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

const PCM_MIME_PREFIX: &str = "audio/pcm";
const PCM16_SCALE: f32 = 32767.0;

/// A block of PCM16 little-endian audio, immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    sample_rate: u32,
    channel_count: u16,
    payload: Vec<u8>,
}

impl AudioChunk {
    #[must_use]
    pub const fn from_pcm16_bytes(sample_rate: u32, channel_count: u16, payload: Vec<u8>) -> Self {
        Self { sample_rate, channel_count, payload }
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn channel_count(&self) -> u16 {
        self.channel_count
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Playback length implied by the payload size.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 || self.channel_count == 0 {
            return 0.0;
        }
        let frames = self.payload.len() / 2 / usize::from(self.channel_count);
        frames as f64 / f64::from(self.sample_rate)
    }

    /// Wire form: base64 payload tagged with `audio/pcm;rate=N`.
    #[must_use]
    pub fn to_media(&self) -> MediaChunk {
        MediaChunk {
            mime_type: format!("{PCM_MIME_PREFIX};rate={}", self.sample_rate),
            data: general_purpose::STANDARD.encode(&self.payload),
        }
    }

    /// Parse an inbound media blob. Untagged PCM is taken to be 24 kHz mono.
    ///
    /// # Errors
    /// Returns `DecodeError` if the MIME type is not PCM audio, the rate tag is
    /// unreadable, or the payload is not valid base64.
    pub fn from_media(media: &MediaChunk) -> Result<Self, DecodeError> {
        let sample_rate = parse_pcm_rate(&media.mime_type)?;
        let payload = general_purpose::STANDARD.decode(media.data.as_bytes())?;
        Ok(Self::from_pcm16_bytes(sample_rate, 1, payload))
    }
}

fn parse_pcm_rate(mime_type: &str) -> Result<u32, DecodeError> {
    let mut parts = mime_type.split(';').map(str::trim);
    if parts.next() != Some(PCM_MIME_PREFIX) {
        return Err(DecodeError::UnsupportedMime(mime_type.to_string()));
    }
    for param in parts {
        if let Some(rate) = param.strip_prefix("rate=") {
            return rate
                .parse::<u32>()
                .ok()
                .filter(|rate| *rate > 0)
                .ok_or_else(|| DecodeError::UnsupportedMime(mime_type.to_string()));
        }
    }
    Ok(PLAYBACK_SAMPLE_RATE)
}

/// Clamp to [-1, 1], scale by 32767 and pack as mono PCM16 little-endian.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode(samples: &[f32], sample_rate: u32) -> AudioChunk {
    let mut payload = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        let value = (clamped * PCM16_SCALE).round() as i16;
        payload.extend_from_slice(&value.to_le_bytes());
    }
    AudioChunk::from_pcm16_bytes(sample_rate, 1, payload)
}

/// Inverse of [`encode`] modulo quantization.
///
/// # Errors
/// Returns `DecodeError::OddLength` if the payload is not a whole number of samples.
pub fn decode(chunk: &AudioChunk) -> Result<Vec<f32>, DecodeError> {
    let bytes = chunk.payload();
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        // i16::MIN is one step past -32767.
        .map(|pair| (f32::from(i16::from_le_bytes([pair[0], pair[1]])) / PCM16_SCALE).max(-1.0))
        .collect())
}

/// Average interleaved channels to mono, then linearly resample.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn downmix_and_resample(
    samples: &[f32],
    channels: usize,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let mono: Vec<f32> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    if source_rate == target_rate || source_rate == 0 || mono.is_empty() {
        return mono;
    }

    let ratio = f64::from(source_rate) / f64::from(target_rate);
    let out_len = ((mono.len() as f64) / ratio).floor() as usize;
    interpolate(&mono, ratio, out_len)
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn interpolate(mono: &[f32], ratio: f64, out_len: usize) -> Vec<f32> {
    let Some(last) = mono.len().checked_sub(1) else {
        return Vec::new();
    };
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = mono[idx.min(last)];
            let b = mono[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

/// Resamples consecutive mono segments of one stream. The fractional frame
/// left over by each segment is carried into the next, so the total output
/// length tracks the summed input duration to within one frame.
#[derive(Debug, Clone, Default)]
pub struct SegmentResampler {
    /// Leftover output, in units of `1 / rates.0` frames.
    remainder: u64,
    rates: (u32, u32),
}

impl SegmentResampler {
    #[must_use]
    pub const fn new() -> Self {
        Self { remainder: 0, rates: (0, 0) }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn resample(&mut self, mono: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
        if source_rate == target_rate || source_rate == 0 || target_rate == 0 || mono.is_empty() {
            return mono.to_vec();
        }
        if self.rates != (source_rate, target_rate) {
            self.rates = (source_rate, target_rate);
            self.remainder = 0;
        }
        let scaled = mono.len() as u64 * u64::from(target_rate) + self.remainder;
        let out_len = scaled / u64::from(source_rate);
        self.remainder = scaled % u64::from(source_rate);
        let ratio = f64::from(source_rate) / f64::from(target_rate);
        interpolate(mono, ratio, out_len as usize)
    }

    /// Forget the carried fraction, for a stream that restarts from silence.
    pub const fn reset(&mut self) {
        self.remainder = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_little_endian_and_scaled() {
        let chunk = encode(&[1.0, -1.0, 0.0], CAPTURE_SAMPLE_RATE);
        assert_eq!(chunk.payload(), &[0xFF, 0x7F, 0x01, 0x80, 0x00, 0x00]);
        assert_eq!(chunk.sample_rate(), 16_000);
        assert_eq!(chunk.channel_count(), 1);
    }

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let chunk = encode(&[4.0, -9.5], CAPTURE_SAMPLE_RATE);
        let decoded = decode(&chunk).unwrap();
        assert!((decoded[0] - 1.0).abs() < f32::EPSILON);
        assert!((decoded[1] + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn decode_preserves_sign_and_magnitude_within_quantization() {
        let samples: Vec<f32> = (-50..=50).map(|i| i as f32 / 50.0 * 0.999).collect();
        let decoded = decode(&encode(&samples, CAPTURE_SAMPLE_RATE)).unwrap();
        for (orig, back) in samples.iter().zip(&decoded) {
            assert!((orig - back).abs() <= 1.0 / 32767.0 + f32::EPSILON, "{orig} -> {back}");
            if orig.abs() > 1.0 / 32767.0 {
                assert_eq!(orig.is_sign_negative(), back.is_sign_negative());
            }
        }
        assert!(decoded.windows(2).all(|w| w[0] <= w[1]), "monotonic");
    }

    #[test]
    fn decode_rejects_odd_length() {
        let chunk = AudioChunk::from_pcm16_bytes(PLAYBACK_SAMPLE_RATE, 1, vec![1, 2, 3]);
        assert_eq!(decode(&chunk), Err(DecodeError::OddLength(3)));
    }

    #[test]
    fn duration_follows_rate() {
        let chunk = AudioChunk::from_pcm16_bytes(PLAYBACK_SAMPLE_RATE, 1, vec![0; 48_000]);
        assert!((chunk.duration_seconds() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn media_tags_rate_and_parses_it_back() {
        let chunk = encode(&[0.25; 8], CAPTURE_SAMPLE_RATE);
        let media = chunk.to_media();
        assert_eq!(media.mime_type, "audio/pcm;rate=16000");
        assert_eq!(AudioChunk::from_media(&media).unwrap(), chunk);
    }

    #[test]
    fn untagged_media_defaults_to_playback_rate() {
        let media = MediaChunk { mime_type: "audio/pcm".into(), data: "AAAA".into() };
        assert_eq!(AudioChunk::from_media(&media).unwrap().sample_rate(), PLAYBACK_SAMPLE_RATE);
    }

    #[test]
    fn non_pcm_media_is_rejected() {
        let media = MediaChunk { mime_type: "image/jpeg".into(), data: "AAAA".into() };
        assert!(matches!(AudioChunk::from_media(&media), Err(DecodeError::UnsupportedMime(_))));
        let bad = MediaChunk { mime_type: "audio/pcm;rate=abc".into(), data: "AAAA".into() };
        assert!(matches!(AudioChunk::from_media(&bad), Err(DecodeError::UnsupportedMime(_))));
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        let media = MediaChunk { mime_type: "audio/pcm;rate=24000".into(), data: "@@".into() };
        assert!(matches!(AudioChunk::from_media(&media), Err(DecodeError::Base64(_))));
    }

    #[test]
    fn downmix_averages_and_resample_shrinks() {
        let stereo = [1.0, 0.0, 0.5, 0.5];
        assert_eq!(downmix_and_resample(&stereo, 2, 16_000, 16_000), vec![0.5, 0.5]);

        let mono = vec![0.1; 48_000];
        let out = downmix_and_resample(&mono, 1, 48_000, 16_000);
        assert_eq!(out.len(), 16_000);
        assert!(out.iter().all(|s| (s - 0.1).abs() < 1e-6));
    }

    #[test]
    fn decode_keeps_most_negative_sample_in_range() {
        let chunk = AudioChunk::from_pcm16_bytes(PLAYBACK_SAMPLE_RATE, 1, vec![0x00, 0x80, 0xFF, 0x7F]);
        let samples = decode(&chunk).unwrap();
        assert!((samples[0] - -1.0).abs() < f32::EPSILON);
        assert!((samples[1] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn segment_resampler_does_not_drift_across_chunks() {
        let mut resampler = SegmentResampler::new();
        let chunk = vec![0.25; 4096];
        // 4096 frames at 24 kHz are 7526.4 frames at 44.1 kHz.
        let total: usize = (0..10)
            .map(|_| resampler.resample(&chunk, 24_000, 44_100).len())
            .sum();
        assert_eq!(total, 75_264);

        resampler.reset();
        assert_eq!(resampler.resample(&chunk, 24_000, 44_100).len(), 7526);
    }
}

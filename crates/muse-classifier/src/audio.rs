//! Audio decoding and resampling to 16kHz mono f32.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::types::{ClassifierError, Result};

/// Sample rate the classifier consumes.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Minimum waveform length (one second at [`TARGET_SAMPLE_RATE`]).
pub const MIN_SAMPLES: usize = TARGET_SAMPLE_RATE as usize;

/// Decode audio bytes into 16kHz mono f32 samples.
///
/// `extension` (with or without the dot) is passed to the format probe as a
/// hint; the probe still sniffs the content, so a wrong hint is harmless.
/// Multi-channel audio is mixed to mono by averaging.
pub fn decode_audio(data: Vec<u8>, extension: Option<&str>) -> Result<Vec<f32>> {
    if data.is_empty() {
        return Err(ClassifierError::Decode("empty input".into()));
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension.map(|e| e.trim_start_matches('.')).filter(|e| !e.is_empty()) {
        let _ = hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ClassifierError::Decode(format!("probe failed: {e}")))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ClassifierError::Decode("no audio track found".into()))?;

    let codec_params = track.codec_params.clone();
    let track_id = track.id;
    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| ClassifierError::Decode("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| ClassifierError::Decode(format!("codec init failed: {e}")))?;

    let mut mono: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(ClassifierError::Decode(format!("packet read: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // corrupt frame: skip it, keep the rest of the stream
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(error = e, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(ClassifierError::Decode(format!("decode: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let samples = sample_buf.samples();

        if channels > 1 {
            #[allow(clippy::cast_precision_loss)]
            let scale = 1.0 / channels as f32;
            mono.extend(
                samples
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() * scale),
            );
        } else {
            mono.extend_from_slice(samples);
        }
    }

    // a valid container with no frames is silence, not a decode failure
    if mono.is_empty() {
        debug!(source_rate, "decoded zero samples");
        return Ok(mono);
    }

    debug!(
        source_rate,
        samples = mono.len(),
        "decoded audio"
    );

    if source_rate == TARGET_SAMPLE_RATE {
        Ok(mono)
    } else {
        resample(&mono, source_rate, TARGET_SAMPLE_RATE)
    }
}

/// Zero-pad `samples` on the right to at least `min_len`.
pub fn pad_to_min_length(mut samples: Vec<f32>, min_len: usize) -> Vec<f32> {
    if samples.len() < min_len {
        samples.resize(min_len, 0.0);
    }
    samples
}

/// Number of output samples for `input_len` samples resampled by rate.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn resampled_len(input_len: usize, from_rate: u32, to_rate: u32) -> usize {
    (input_len as f64 * f64::from(to_rate) / f64::from(from_rate)).ceil() as usize
}

/// Resample mono audio from `from_rate` to `to_rate` using rubato.
///
/// The output is aligned to the input (the filter delay is removed) and is
/// exactly [`resampled_len`] samples long.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let chunk_size = 1024;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk_size, 1)
        .map_err(|e| ClassifierError::Resample(format!("init: {e}")))?;

    let expected = resampled_len(samples.len(), from_rate, to_rate);
    let delay = resampler.output_delay();
    let needed = delay + expected;

    let mut output = Vec::with_capacity(needed + chunk_size);
    let mut chunks = samples.chunks(chunk_size);

    // Keep feeding silence after the input runs out until the delayed tail
    // has been flushed.
    while output.len() < needed {
        let mut block = chunks.next().map_or_else(Vec::new, <[f32]>::to_vec);
        block.resize(chunk_size, 0.0);

        let input = vec![block];
        let resampled = resampler
            .process(&input, None)
            .map_err(|e| ClassifierError::Resample(format!("process: {e}")))?;

        match resampled.first() {
            Some(channel) if !channel.is_empty() => output.extend_from_slice(channel),
            _ => return Err(ClassifierError::Resample("resampler produced no output".into())),
        }
    }

    let _ = output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a 16-bit PCM WAV file holding a sine tone.
    pub(crate) fn generate_test_wav(sample_rate: u32, channels: u16, num_frames: u32) -> Vec<u8> {
        let bits_per_sample: u16 = 16;
        let block_align = channels * bits_per_sample / 8;
        let byte_rate = sample_rate * u32::from(block_align);
        let data_size = num_frames * u32::from(block_align);

        let mut buf = Vec::with_capacity(44 + data_size as usize);
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data_size).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        buf.extend_from_slice(&byte_rate.to_le_bytes());
        buf.extend_from_slice(&block_align.to_le_bytes());
        buf.extend_from_slice(&bits_per_sample.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_size.to_le_bytes());
        for i in 0..num_frames {
            let t = i as f32 / sample_rate as f32;
            let value = ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
            for _ in 0..channels {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        buf
    }

    #[test]
    fn decode_garbage_is_decode_error() {
        let result = decode_audio(b"not audio data".to_vec(), Some(".wav"));
        assert!(matches!(result, Err(ClassifierError::Decode(_))));
    }

    #[test]
    fn decode_empty_is_decode_error() {
        let result = decode_audio(Vec::new(), Some("wav"));
        assert!(matches!(result, Err(ClassifierError::Decode(_))));
    }

    #[test]
    fn decode_zero_frame_wav_is_empty() {
        let wav = generate_test_wav(44_100, 2, 0);
        let samples = decode_audio(wav, Some(".wav")).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn decode_flac_resamples_to_exact_length() {
        // 0.5s 440 Hz tone, 22.05kHz mono, verbatim subframes
        let flac = include_bytes!("../tests/fixtures/tone.flac").to_vec();
        let samples = decode_audio(flac, Some(".flac")).unwrap();
        assert_eq!(samples.len(), 8_000);
        assert!(samples.iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn decode_mp3_resamples_to_16k() {
        // 20 silent MPEG-1 layer III frames, 44.1kHz mono
        let mp3 = include_bytes!("../tests/fixtures/silence.mp3").to_vec();
        let samples = decode_audio(mp3, Some(".mp3")).unwrap();
        assert!(!samples.is_empty());
        assert!(samples.len() <= resampled_len(20 * 1_152, 44_100, 16_000));
        assert!(samples.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn decode_m4a_aac_keeps_16k() {
        // 10 silent AAC-LC frames in an MP4 container, 16kHz mono
        let m4a = include_bytes!("../tests/fixtures/silence.m4a").to_vec();
        let samples = decode_audio(m4a, Some(".m4a")).unwrap();
        assert!(!samples.is_empty());
        assert!(samples.len() <= 10 * 1_024);
        assert!(samples.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn decode_16k_mono_keeps_length() {
        let wav = generate_test_wav(16_000, 1, 8_000);
        let samples = decode_audio(wav, Some(".wav")).unwrap();
        assert_eq!(samples.len(), 8_000);
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(samples.iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn decode_without_hint_sniffs_format() {
        let wav = generate_test_wav(16_000, 1, 1_600);
        let samples = decode_audio(wav, None).unwrap();
        assert_eq!(samples.len(), 1_600);
    }

    #[test]
    fn decode_44k_stereo_resamples_to_exact_length() {
        // 0.5s at 44.1kHz stereo
        let wav = generate_test_wav(44_100, 2, 22_050);
        let samples = decode_audio(wav, Some(".wav")).unwrap();
        assert_eq!(samples.len(), 8_000);
    }

    #[test]
    fn resample_downsample_length() {
        let samples: Vec<f32> = (0..48_000).map(|i| (i as f32 / 48.0).sin()).collect();
        let out = resample(&samples, 48_000, 16_000).unwrap();
        assert_eq!(out.len(), 16_000);
    }

    #[test]
    fn resample_upsample_short_input() {
        let samples = vec![0.25f32; 100];
        let out = resample(&samples, 8_000, 16_000).unwrap();
        assert_eq!(out.len(), 200);
    }

    #[test]
    fn resampled_len_rounds_up() {
        assert_eq!(resampled_len(22_050, 44_100, 16_000), 8_000);
        assert_eq!(resampled_len(1, 44_100, 16_000), 1);
        assert_eq!(resampled_len(0, 44_100, 16_000), 0);
    }

    #[test]
    fn pad_short_waveform() {
        let padded = pad_to_min_length(vec![1.0; 8_000], MIN_SAMPLES);
        assert_eq!(padded.len(), 16_000);
        assert_eq!(padded[7_999], 1.0);
        assert_eq!(padded[8_000], 0.0);
    }

    #[test]
    fn pad_leaves_long_waveform() {
        let padded = pad_to_min_length(vec![0.5; 20_000], MIN_SAMPLES);
        assert_eq!(padded.len(), 20_000);
    }
}

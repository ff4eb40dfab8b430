//! # Audio Decoding
//!
//! Turns an uploaded file into the sample stream Whisper expects:
//! 16 kHz, mono, 32-bit float in `[-1.0, 1.0]`.
//!
//! ## Processing Steps:
//! 1. **Decode**: RIFF/WAVE through `wav`; everything else (and WAV
//!    encodings `wav` cannot read) through symphonia's probe and codec registry
//! 2. **Downmix**: average interleaved channels to mono
//! 3. **Resample**: linear interpolation to 16 kHz
//! 4. **Remove DC offset**: center the signal around zero
//!
//! ## Supported Containers:
//! WAV, MP3, FLAC, Ogg Vorbis, MP4/M4A (AAC, ALAC), AIFF, CAF and MKV/WebM.
//! Anything else is rejected with a message naming the file; the request
//! handler shows it to the user.

use anyhow::{anyhow, bail, Context, Result};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use wav::BitDepth;

/// Sample rate every Whisper model is trained on.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Interleaved samples straight out of a decoder.
struct PcmAudio {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

/// Decode `path` into 16 kHz mono samples.
pub fn decode_file(path: &Path) -> Result<Vec<f32>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let pcm = if is_riff_wave(path).with_context(|| format!("Failed to open {}", name))? {
        match decode_wav(path) {
            Ok(pcm) => pcm,
            Err(err) => {
                tracing::debug!(file = %name, error = %err, "wav reader failed, trying symphonia");
                decode_with_symphonia(path, &name)?
            }
        }
    } else {
        decode_with_symphonia(path, &name)?
    };

    if pcm.channels == 0 {
        bail!("Could not decode {}: the file declares zero channels", name);
    }

    let mono = downmix(&pcm.samples, pcm.channels);
    let mut samples = resample_linear(&mono, pcm.sample_rate, TARGET_SAMPLE_RATE);
    remove_dc_offset(&mut samples);

    if samples.is_empty() {
        bail!("{} contains no audio samples", name);
    }

    tracing::debug!(
        file = %name,
        source_rate = pcm.sample_rate,
        channels = pcm.channels,
        duration_secs = samples.len() as f64 / f64::from(TARGET_SAMPLE_RATE),
        "Decoded audio"
    );

    Ok(samples)
}

/// True when the file starts with a `RIFF....WAVE` header.
fn is_riff_wave(path: &Path) -> io::Result<bool> {
    let mut magic = [0u8; 12];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < magic.len() {
        match file.read(&mut magic[filled..])? {
            0 => return Ok(false),
            n => filled += n,
        }
    }
    Ok(&magic[0..4] == b"RIFF" && &magic[8..12] == b"WAVE")
}

fn decode_wav(path: &Path) -> Result<PcmAudio> {
    let mut file = File::open(path)?;
    let (header, data) = wav::read(&mut file)?;
    Ok(PcmAudio {
        samples: samples_to_f32(data)?,
        channels: usize::from(header.channel_count),
        sample_rate: header.sampling_rate,
    })
}

/// Probe the container, pick the first decodable track and decode it to the end.
fn decode_with_symphonia(path: &Path, name: &str) -> Result<PcmAudio> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", name))?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| anyhow!("Could not decode {}: unsupported or damaged audio file ({})", name, e))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("Could not decode {}: no audio track found", name))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count());

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow!("Could not decode {}: unsupported codec ({})", name, e))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(anyhow!("Could not decode {}: {}", name, e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate.get_or_insert(spec.rate);
                channels.get_or_insert(spec.channels.count());

                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            // a corrupt packet is skipped, the rest of the stream is still usable
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(file = %name, error = %e, "Skipping undecodable packet");
            }
            Err(e) => return Err(anyhow!("Could not decode {}: {}", name, e)),
        }
    }

    let sample_rate = sample_rate.ok_or_else(|| anyhow!("Could not decode {}: unknown sample rate", name))?;
    Ok(PcmAudio {
        samples,
        channels: channels.unwrap_or(1),
        sample_rate,
    })
}

/// Normalise any supported bit depth to `[-1.0, 1.0]`.
fn samples_to_f32(data: BitDepth) -> Result<Vec<f32>> {
    let samples = match data {
        BitDepth::Eight(raw) => raw.into_iter().map(|s| (f32::from(s) - 128.0) / 128.0).collect(),
        BitDepth::Sixteen(raw) => raw.into_iter().map(|s| f32::from(s) / 32_768.0).collect(),
        BitDepth::TwentyFour(raw) => raw.into_iter().map(|s| s as f32 / 8_388_608.0).collect(),
        BitDepth::ThirtyTwoFloat(raw) => raw,
        BitDepth::Empty => bail!("the file has no sample data"),
    };
    Ok(samples)
}

/// Average interleaved frames down to one channel. A trailing partial frame is dropped.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear-interpolation resampler.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() || from_rate == 0 {
        return input.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = ((input.len() as f64) / ratio).round() as usize;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            input[idx] + (input[next] - input[idx]) * frac
        })
        .collect()
}

fn remove_dc_offset(samples: &mut [f32]) {
    if samples.is_empty() {
        return;
    }
    let mean = samples.iter().map(|&s| f64::from(s)).sum::<f64>() / samples.len() as f64;
    let mean = mean as f32;
    if mean.abs() > f32::EPSILON {
        samples.iter_mut().for_each(|s| *s -= mean);
    }
}

//! # Audio Module
//!
//! Decodes uploaded audio files into the 16 kHz mono float samples the
//! Whisper models consume.
//!
//! ## Accepted Input:
//! - **Container**: WAV (RIFF)
//! - **Encoding**: 8/16/24-bit integer PCM or 32-bit float
//! - **Channels**: any; downmixed to mono
//! - **Sample Rate**: any; resampled to 16 kHz

pub mod processor; // WAV decoding, downmixing, resampling

pub use processor::decode_file;

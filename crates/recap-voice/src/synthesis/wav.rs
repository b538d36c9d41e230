//! Minimal RIFF/WAVE container for raw PCM returned by the synthesis service.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{TtsError, TtsResult};

/// Size of the canonical 44-byte PCM WAV header.
pub const WAV_HEADER_LEN: usize = 44;

const PCM_FORMAT_TAG: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;
/// Header bytes counted by the RIFF size field (all but `RIFF` and itself).
const RIFF_SIZE_OVERHEAD: u32 = 36;

/// PCM layout of a sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavSpec {
    /// Mono 16-bit PCM at `sample_rate`, the service's output format.
    pub const fn mono_16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub const fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub const fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    /// Playback duration of `data_len` bytes of PCM.
    pub fn duration_of(&self, data_len: usize) -> Duration {
        let byte_rate = u64::from(self.byte_rate());
        if byte_rate == 0 {
            return Duration::ZERO;
        }
        let bytes = data_len as u64;
        Duration::from_micros(bytes * 1_000_000 / byte_rate)
    }
}

/// RIFF size and data size fields for `data_len` bytes of PCM, or `None`
/// when they overflow 32 bits.
fn riff_lengths(data_len: usize) -> Option<(u32, u32)> {
    let data_len = u32::try_from(data_len).ok()?;
    let riff_len = data_len.checked_add(RIFF_SIZE_OVERHEAD)?;
    Some((riff_len, data_len))
}

/// Prefix little-endian PCM bytes with a WAV header so the buffer is
/// directly playable.
///
/// Fails with [`TtsError::ClipTooLarge`] when the PCM does not fit the
/// 32-bit RIFF length fields.
pub fn encode_wav(pcm: &[u8], spec: WavSpec) -> TtsResult<Bytes> {
    let (riff_len, data_len) =
        riff_lengths(pcm.len()).ok_or(TtsError::ClipTooLarge { bytes: pcm.len() })?;

    let mut out = BytesMut::with_capacity(WAV_HEADER_LEN + pcm.len());

    // RIFF header
    out.put_slice(b"RIFF");
    out.put_u32_le(riff_len);
    out.put_slice(b"WAVE");

    // fmt chunk
    out.put_slice(b"fmt ");
    out.put_u32_le(FMT_CHUNK_LEN);
    out.put_u16_le(PCM_FORMAT_TAG);
    out.put_u16_le(spec.channels);
    out.put_u32_le(spec.sample_rate);
    out.put_u32_le(spec.byte_rate());
    out.put_u16_le(spec.block_align());
    out.put_u16_le(spec.bits_per_sample);

    // data chunk
    out.put_slice(b"data");
    out.put_u32_le(data_len);
    out.put_slice(pcm);

    Ok(out.freeze())
}

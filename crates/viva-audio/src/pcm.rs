use base64::Engine;
use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree};

/// Sample rate both remote speech services speak, in Hz.
pub const SPEECH_SERVICE_SAMPLE_RATE: f64 = 24000.0;

/// Creates a resampler for converting between the device rate and the
/// service rate.
pub fn resampler(
    in_rate: f64,
    out_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_rate / in_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits samples into fixed-size chunks, zero-padding the tail chunk.
pub fn chunks_padded(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Heap ring buffer shared between the async world and the audio callback.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Encodes f32 samples as base64 PCM16 for the recognition channel.
pub fn encode_f32(samples: &[f32]) -> String {
    let pcm16: Vec<u8> = samples
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&pcm16)
}

/// Decodes a base64 PCM16 payload into f32 samples in [-1.0, 1.0].
pub fn decode_f32(base64_fragment: &str) -> Vec<f32> {
    match base64::engine::general_purpose::STANDARD.decode(base64_fragment) {
        Ok(pcm16) => bytes_to_f32(&pcm16),
        Err(_) => {
            tracing::error!("failed to decode base64 audio fragment");
            Vec::new()
        }
    }
}

/// Interprets little-endian PCM16 bytes as f32 samples. A trailing odd byte
/// is ignored; callers that stream chunks carry it over themselves.
pub fn bytes_to_f32(pcm16: &[u8]) -> Vec<f32> {
    pcm16
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}

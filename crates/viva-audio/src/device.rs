use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};
use ringbuf::HeapCons;
use ringbuf::traits::Consumer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Device-level failures, phrased for the candidate-facing UI. These are
/// deliberately distinct from transport errors so the client can show the
/// right remediation.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Microphone or speaker access was denied. Check your system permissions.")]
    PermissionDenied,
    #[error("No matching audio device was found. Connect a device and try again.")]
    NotFound,
    #[error("The audio device is already in use by another application.")]
    InUse,
    #[error("Audio device error: {0}")]
    Other(String),
}

fn map_build_error(err: cpal::BuildStreamError) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => DeviceError::InUse,
        cpal::BuildStreamError::BackendSpecific { err } => {
            let message = err.to_string();
            if message.to_lowercase().contains("permission") {
                DeviceError::PermissionDenied
            } else {
                DeviceError::Other(message)
            }
        }
        other => DeviceError::Other(other.to_string()),
    }
}

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Resolves an input device by name, or the host default when no name is
/// given.
pub fn get_or_default_input(device_name: Option<String>) -> Result<Device, DeviceError> {
    let host = get_host();
    tracing::debug!("host: {:?}", host.id());
    match device_name {
        Some(target) => host
            .input_devices()
            .map_err(|e| DeviceError::Other(e.to_string()))?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .ok_or(DeviceError::NotFound),
        None => host.default_input_device().ok_or(DeviceError::NotFound),
    }
}

/// Resolves an output device by name, or the host default.
pub fn get_or_default_output(device_name: Option<String>) -> Result<Device, DeviceError> {
    let host = get_host();
    match device_name {
        Some(target) => host
            .output_devices()
            .map_err(|e| DeviceError::Other(e.to_string()))?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .ok_or(DeviceError::NotFound),
        None => host.default_output_device().ok_or(DeviceError::NotFound),
    }
}

/// Builds the microphone stream. Frames are mixed down to mono f32 and
/// pushed to `audio_tx`; a full channel drops the frame rather than blocking
/// the audio callback.
pub fn build_capture_stream(
    device: &Device,
    chunk_size: usize,
    audio_tx: tokio::sync::mpsc::Sender<Vec<f32>>,
) -> Result<(cpal::Stream, f64), DeviceError> {
    let default_config = device
        .default_input_config()
        .map_err(|e| DeviceError::Other(e.to_string()))?;
    let config = cpal::StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(cpal::FrameCount::from(chunk_size as u32)),
    };
    let channel_count = config.channels as usize;
    let sample_rate = config.sample_rate.0 as f64;
    tracing::info!("input stream config: {:?}", &config);

    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        let audio = if channel_count > 1 {
            data.chunks(channel_count)
                .map(|c| c.iter().sum::<f32>() / channel_count as f32)
                .collect::<Vec<f32>>()
        } else {
            data.to_vec()
        };
        if let Err(e) = audio_tx.try_send(audio) {
            tracing::warn!("failed to send audio data to capture: {:?}", e);
        }
    };

    let stream = device
        .build_input_stream(
            &config,
            input_data_fn,
            move |err| tracing::error!("input stream error: {}", err),
            None,
        )
        .map_err(map_build_error)?;
    Ok((stream, sample_rate))
}

/// Builds the speaker stream, draining the playback ring buffer. When the
/// flush flag is set (a playback `stop()`), everything scheduled is discarded
/// before the next sample is served.
pub fn build_playback_stream(
    device: &Device,
    chunk_size: usize,
    mut consumer: HeapCons<f32>,
    flush: Arc<AtomicBool>,
) -> Result<(cpal::Stream, f64), DeviceError> {
    let default_config = device
        .default_output_config()
        .map_err(|e| DeviceError::Other(e.to_string()))?;
    let config = cpal::StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(cpal::FrameCount::from(chunk_size as u32)),
    };
    let channel_count = config.channels as usize;
    let sample_rate = config.sample_rate.0 as f64;
    tracing::info!("output stream config: {:?}", &config);

    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        if flush.swap(false, Ordering::AcqRel) {
            while consumer.try_pop().is_some() {}
        }
        let mut sample_index = 0;
        while sample_index < data.len() {
            let sample = consumer.try_pop().unwrap_or(0.0);
            // Same mono sample on left and right; silence on any further
            // channels.
            for ch in 0..channel_count {
                if sample_index >= data.len() {
                    break;
                }
                data[sample_index] = if ch < 2 { sample } else { 0.0 };
                sample_index += 1;
            }
        }
    };

    let stream = device
        .build_output_stream(
            &config,
            output_data_fn,
            move |err| tracing::error!("output stream error: {}", err),
            None,
        )
        .map_err(map_build_error)?;
    Ok((stream, sample_rate))
}

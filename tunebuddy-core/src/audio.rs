//! # Audio Capture Module
//!
//! Live input from the default device through CPAL. Compiled only with the
//! `capture` feature.
//!
//! ## Features
//! - Automatic input device selection
//! - Mono 32-bit float stream at the session's sample rate when the device
//!   offers it
//! - Timestamps each callback buffer by the number of samples seen so far

use anyhow::{Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

/// Starts capturing from the default input device.
///
/// Every buffer the device delivers is passed to `sink` together with the
/// time of its first sample, counted from `start_time`. The stream runs
/// until the returned handle is dropped or paused.
///
/// # Arguments
/// * `sample_rate` - Rate to request from the device, in Hz
/// * `start_time` - Time of the first captured sample, in seconds
/// * `sink` - Receives `(samples, time)`; normally `Session::capture_sink()`
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Stream handle and the rate actually in use
/// * `Err(e)` - No usable device or format
pub fn start_audio_capture<F>(sample_rate: u32, start_time: f64, mut sink: F) -> Result<(cpal::Stream, u32)>
where
    F: FnMut(&[f32], f64) + Send + 'static,
{
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;
    info!(device = %device.name()?, "using audio input device");

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported = find_supported_config(configs, sample_rate)
        .ok_or_else(|| anyhow!("No suitable mono f32 input format found"))?;

    let rate = cpal::SampleRate(sample_rate.clamp(
        supported.min_sample_rate().0,
        supported.max_sample_rate().0,
    ));
    let config: cpal::StreamConfig = supported.with_sample_rate(rate).into();
    let rate = config.sample_rate.0;
    if rate != sample_rate {
        return Err(anyhow!(
            "Device cannot capture at {sample_rate} Hz (closest is {rate} Hz)"
        ));
    }
    info!(sample_rate = rate, "audio stream configured");

    let mut captured: u64 = 0;
    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let time = start_time + captured as f64 / f64::from(rate);
            sink(data, time);
            captured += data.len() as u64;
        },
        |err| error!(error = %err, "audio stream error"),
        None,
    )?;
    stream.play()?;

    Ok((stream, rate))
}

/// Picks the mono f32 configuration whose rate range lies closest to
/// `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.channels() == 1 && c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let (min, max) = (c.min_sample_rate().0, c.max_sample_rate().0);
            if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            }
        })
}

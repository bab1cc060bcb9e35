//! Microphone input.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not block or perform I/O, so it only downmixes into a scratch buffer
//! and pushes into the SPSC ring producer. Resampling and framing happen on the
//! capture pump thread.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms. `InputBackend::open` is
//! therefore invoked on the capture thread, and the returned `CaptureStream`
//! is dropped on that same thread, which releases the device.

pub mod device;
#[cfg(feature = "audio-cpal")]
pub mod output;
pub mod resample;

use std::sync::{atomic::AtomicBool, Arc};

use crate::{buffering::AudioProducer, error::Result};

#[cfg(feature = "audio-cpal")]
pub use output::CpalOutput;

/// What the session asks of the microphone.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Rate the capture pump delivers to the codec (Hz).
    pub sample_rate: u32,
    /// Device name to prefer over the system default.
    pub preferred_device: Option<String>,
}

/// A live microphone stream. Dropping it releases the device.
pub trait CaptureStream {
    /// Rate at which samples are pushed into the ring (Hz). The pump resamples
    /// to the requested capture rate when this differs.
    fn sample_rate(&self) -> u32;
}

/// Source of live mono microphone audio.
pub trait InputBackend: Send + Sync + 'static {
    /// Acquire the microphone and start pushing mono f32 samples into
    /// `producer` while `running` is set.
    ///
    /// Called on the capture thread. Must either return a fully running stream
    /// or acquire nothing.
    ///
    /// # Errors
    /// `PermissionDenied`, `DeviceUnavailable`, or `AudioStream`.
    fn open(
        &self,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        request: &CaptureRequest,
    ) -> Result<Box<dyn CaptureStream>>;
}

#[cfg(feature = "audio-cpal")]
pub use cpal_input::CpalInput;

#[cfg(feature = "audio-cpal")]
mod cpal_input {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        BuildStreamError, DefaultStreamConfigError, Device, FromSample, Sample, SampleFormat,
        SampleRate, SizedSample, Stream, StreamConfig,
    };
    use tracing::{error, info, warn};

    use super::{CaptureRequest, CaptureStream, InputBackend};
    use crate::{
        buffering::{AudioProducer, Producer},
        error::{Result, VoiceError},
    };

    /// Default-host cpal microphone.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct CpalInput;

    struct CpalCaptureStream {
        /// Held so the device stays open; dropped on the capture thread.
        _stream: Stream,
        sample_rate: u32,
    }

    impl CaptureStream for CpalCaptureStream {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
    }

    impl Drop for CpalCaptureStream {
        fn drop(&mut self) {
            info!(sample_rate = self.sample_rate, "releasing microphone stream");
        }
    }

    impl InputBackend for CpalInput {
        fn open(
            &self,
            producer: AudioProducer,
            running: Arc<AtomicBool>,
            request: &CaptureRequest,
        ) -> Result<Box<dyn CaptureStream>> {
            let device = select_device(request.preferred_device.as_deref())?;
            info!(
                device = device.name().unwrap_or_default().as_str(),
                "opening input device"
            );

            let (config, format) = choose_config(&device, request.sample_rate)?;
            let sample_rate = config.sample_rate.0;
            info!(sample_rate, channels = config.channels, ?format, "input config selected");

            let stream = match format {
                SampleFormat::F32 => build_mono_input::<f32>(&device, &config, producer, running),
                SampleFormat::I16 => build_mono_input::<i16>(&device, &config, producer, running),
                SampleFormat::U16 => build_mono_input::<u16>(&device, &config, producer, running),
                SampleFormat::U8 => build_mono_input::<u8>(&device, &config, producer, running),
                other => {
                    return Err(VoiceError::AudioStream(format!(
                        "unsupported sample format: {other:?}"
                    )))
                }
            }
            .map_err(map_build_error)?;

            stream
                .play()
                .map_err(|e| classify_backend_message(e.to_string()))?;

            Ok(Box::new(CpalCaptureStream {
                _stream: stream,
                sample_rate,
            }))
        }
    }

    fn select_device(preferred: Option<&str>) -> Result<Device> {
        let host = cpal::default_host();

        if let Some(name) = preferred {
            match host.input_devices() {
                Ok(mut devices) => {
                    if let Some(found) =
                        devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    {
                        return Ok(found);
                    }
                    warn!(preferred = name, "preferred input device not found, falling back");
                }
                Err(e) => warn!("failed to list input devices: {e}"),
            }
        }

        if let Some(device) = host.default_input_device() {
            return Ok(device);
        }

        host.input_devices()
            .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?
            .next()
            .ok_or_else(|| VoiceError::DeviceUnavailable("no input device present".into()))
    }

    /// Prefer a native mono config at the target rate; otherwise take the
    /// device default and let the pump resample.
    fn choose_config(device: &Device, target_rate: u32) -> Result<(StreamConfig, SampleFormat)> {
        let native = device.supported_input_configs().ok().and_then(|mut ranges| {
            ranges.find(|r| {
                r.channels() == 1
                    && r.min_sample_rate() <= SampleRate(target_rate)
                    && r.max_sample_rate() >= SampleRate(target_rate)
            })
        });
        if let Some(range) = native {
            let supported = range.with_sample_rate(SampleRate(target_rate));
            return Ok((supported.config(), supported.sample_format()));
        }

        let supported = device.default_input_config().map_err(|e| match e {
            DefaultStreamConfigError::DeviceNotAvailable => {
                VoiceError::DeviceUnavailable("input device disappeared".into())
            }
            other => classify_backend_message(other.to_string()),
        })?;
        Ok((supported.config(), supported.sample_format()))
    }

    fn build_mono_input<T>(
        device: &Device,
        config: &StreamConfig,
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> std::result::Result<Stream, BuildStreamError>
    where
        T: SizedSample + Send + 'static,
        f32: FromSample<T>,
    {
        let channels = usize::from(config.channels.max(1));
        let mut mono: Vec<f32> = Vec::with_capacity(8192);

        device.build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                mono.clear();
                mono.extend(data.chunks_exact(channels).map(|frame| {
                    frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / channels as f32
                }));
                let written = producer.push_slice(&mono);
                if written < mono.len() {
                    warn!(dropped = mono.len() - written, "capture ring full");
                }
            },
            |err| error!("input stream error: {err}"),
            None,
        )
    }

    fn map_build_error(err: BuildStreamError) -> VoiceError {
        match err {
            BuildStreamError::DeviceNotAvailable => {
                VoiceError::DeviceUnavailable("input device not available".into())
            }
            other => classify_backend_message(other.to_string()),
        }
    }

    /// OS backends report refused microphone access as free-form text.
    fn classify_backend_message(message: String) -> VoiceError {
        let lowered = message.to_ascii_lowercase();
        let refused = ["permission", "denied", "not authorized", "unauthorized", "access"]
            .iter()
            .any(|needle| lowered.contains(needle));
        if refused {
            VoiceError::PermissionDenied(message)
        } else {
            VoiceError::AudioStream(message)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::classify_backend_message;
        use crate::error::VoiceError;

        #[test]
        fn refusal_messages_become_permission_errors() {
            for msg in [
                "Permission denied (os error 13)",
                "Access to the microphone is not authorized",
            ] {
                assert!(matches!(
                    classify_backend_message(msg.into()),
                    VoiceError::PermissionDenied(_)
                ));
            }
        }

        #[test]
        fn other_backend_failures_stay_stream_errors() {
            assert!(matches!(
                classify_backend_message("buffer size unsupported".into()),
                VoiceError::AudioStream(_)
            ));
        }
    }
}

pub mod capture;
pub mod device;
pub mod dsp;
pub mod pcm;
pub mod playback;

pub use capture::{CaptureError, CaptureEvent, CredentialProvider, SpeechCapture};
pub use playback::{AudioSink, PlaybackError, SpeechPlayer};

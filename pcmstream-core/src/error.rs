use thiserror::Error;

/// All errors produced by pcmstream-core.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("chunk request failed: {0}")]
    Transport(String),

    #[error("chunk request returned HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("malformed PCM chunk: {0}")]
    Decode(#[from] DecodeError),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("streaming is already enabled")]
    AlreadyEnabled,

    #[error("streaming is not enabled")]
    NotEnabled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Reasons a raw chunk cannot be turned into a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload has odd byte length {len}")]
    OddByteLength { len: usize },

    #[error("interleaved stereo block has odd sample count {len}")]
    OddSampleCount { len: usize },

    #[error("chunk contains no samples")]
    Empty,
}

pub type Result<T> = std::result::Result<T, StreamError>;

use crate::boxes::FourCC;

#[derive(thiserror::Error, Debug)]
pub enum DemuxError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed {typ} box: {reason}")]
    Malformed { typ: FourCC, reason: &'static str },
    #[error("{typ} payload of {len} bytes exceeds scratch capacity")]
    BufferTooSmall { typ: FourCC, len: u64 },
    #[error("seek target outside the available index")]
    OutOfRange,
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl DemuxError {
    pub fn malformed(typ: FourCC, reason: &'static str) -> Self {
        DemuxError::Malformed { typ, reason }
    }
}

pub type Result<T> = std::result::Result<T, DemuxError>;

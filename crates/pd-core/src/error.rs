use std::io;

use thiserror::Error;

/// Error codes surfaced to the application. `Ok` is modeled as `Result::Ok`
/// rather than a variant here.
#[derive(Error, Debug)]
pub enum PdError {
    #[error("invalid parameter")]
    ParamErr,
    #[error("memory exhausted")]
    MemErr,
    #[error("no matching subscription")]
    NoSubErr,
    #[error("no data available")]
    NoDataErr,
    #[error("subscription timed out")]
    TimeoutErr,
    #[error("wire format violation")]
    WireErr,
    #[error("frame check sum mismatch")]
    CrcErr,
    #[error("topology mismatch")]
    TopoErr,
    #[error("i/o error: {0}")]
    IoErr(#[from] io::Error),
    #[error("operation would block")]
    BlockErr,
}

impl From<pd_wire::FrameError> for PdError {
    fn from(value: pd_wire::FrameError) -> Self {
        match value {
            pd_wire::FrameError::Wire => PdError::WireErr,
            pd_wire::FrameError::Crc => PdError::CrcErr,
        }
    }
}

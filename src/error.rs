use thiserror::Error;

/// Why a camera frame could not be turned into an upright image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has zero size ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error("unsupported pixel stride {0}, expected 4 bytes per pixel")]
    PixelStride(usize),

    #[error("row stride {row_stride} is narrower than {width} pixels of {pixel_stride} bytes")]
    RowStride {
        row_stride: usize,
        pixel_stride: usize,
        width: u32,
    },

    #[error("row stride {row_stride} over {height} rows does not fit in memory")]
    LayoutOverflow { row_stride: usize, height: u32 },

    #[error("buffer holds {actual} bytes, {required} required for the declared layout")]
    BufferTooSmall { required: usize, actual: usize },

    #[error("rotation of {0} degrees is not a multiple of 90")]
    Rotation(i32),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LandmarkError {
    #[error("face mesh needs {expected} points, engine returned {actual}")]
    TooFewPoints { expected: usize, actual: usize },
}

/// Errors reported by a landmark engine, either at creation or through a
/// failed completion.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model asset not found: {0}")]
    ModelMissing(String),

    #[error("failed to load model {path}: {message}")]
    ModelLoad { path: String, message: String },

    #[error("timestamp {timestamp_ms} is not after the previous {previous_ms}")]
    NonMonotonicTimestamp { timestamp_ms: u64, previous_ms: u64 },

    #[error("engine is closed")]
    Closed,

    #[error("engine dropped the request without reporting")]
    Abandoned,

    #[error("inference failed: {0}")]
    Inference(String),

    #[error(transparent)]
    Landmarks(#[from] LandmarkError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

//! ネットワーク・スナップショット関連のエラー型

/// ネットワーク操作のエラー
#[derive(thiserror::Error, Debug)]
pub enum NetError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid snapshot magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    #[error("Layer name is not valid UTF-8")]
    InvalidLayerName,

    #[error("Layer '{name}' is too large: {elements} elements")]
    LayerTooLarge { name: String, elements: u64 },

    #[error("Layer '{0}' missing from snapshot")]
    MissingLayer(String),

    #[error("Layer '{name}' shape mismatch: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    ShapeMismatch {
        name: String,
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Input width mismatch: expected {expected}, got {actual}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("Batch size mismatch: {inputs} inputs, {targets} targets")]
    BatchMismatch { inputs: usize, targets: usize },
}

pub type NetResult<T> = Result<T, NetError>;

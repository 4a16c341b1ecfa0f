use crate::assets::AssetError;
use crate::expression::ExpressionError;
use crate::image::ImageError;
use crate::mosaic::MosaicError;
use crate::readers::BackendError;
use crate::search::SearchError;
use crate::tiler::TilerError;

/// Errors that can occur while assembling mosaic tiles.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum TessellaCoreError {
    /// Errors from [`assets`](crate::assets) descriptor resolution.
    #[error(transparent)]
    AssetError(#[from] AssetError),

    /// Errors from [`expression`](crate::expression) band math.
    #[error(transparent)]
    ExpressionError(#[from] ExpressionError),

    /// Errors from [`image`](crate::image) compositing.
    #[error(transparent)]
    ImageError(#[from] ImageError),

    /// Errors from the [`mosaic`](crate::mosaic) backend.
    #[error(transparent)]
    MosaicError(#[from] MosaicError),

    /// Errors from an injected decoding backend.
    #[error(transparent)]
    BackendError(#[from] BackendError),

    /// Errors from the [`search`](crate::search) client.
    #[error(transparent)]
    SearchError(#[from] SearchError),

    /// Errors from [`tiler`](crate::tiler) single-item compositing.
    #[error(transparent)]
    TilerError(#[from] TilerError),

    /// Errors occurring from other sources, not implemented by `tessella-core`.
    #[error(transparent)]
    OtherError(#[from] Box<dyn std::error::Error>),
}

/// A convenience [`Result`] for operations coming from `tessella-core`.
pub type TessellaCoreResult<T> = Result<T, TessellaCoreError>;

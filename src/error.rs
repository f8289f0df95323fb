use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum J2kError {
    // Stream primitives
    #[error("Unexpected end of stream")]
    UnexpectedEndOfStream = 1,
    #[error("Destination buffer too small")]
    DestinationTooSmall = 2,
    #[error("Seek position outside the stream")]
    InvalidSeekPosition = 3,

    // Structural violations (always fatal)
    #[error("Start of codestream (SOC) marker not found")]
    SocNotFound = 10,
    #[error("Marker not allowed in the current decoder state")]
    MarkerNotAllowed = 11,
    #[error("Required main header marker missing (SIZ, COD and QCD are mandatory)")]
    RequiredMarkerMissing = 12,
    #[error("Invalid marker segment size")]
    InvalidMarkerSegmentSize = 13,
    #[error("Expected SOT marker")]
    ExpectedSotMarker = 14,
    #[error("Tile-part header size mismatch")]
    TilePartHeaderSizeMismatch = 15,
    #[error("Tile-part order violation (TPsot not monotonic or beyond TNsot)")]
    TilePartOrderViolation = 16,
    #[error("Unknown marker could not be recovered")]
    UnknownMarker = 17,
    #[error("PPT marker present although the main header carries PPM")]
    PpmPptConflict = 18,

    // Field constraint violations (always fatal)
    #[error("Invalid image geometry")]
    InvalidImageGeometry = 30,
    #[error("Invalid component count")]
    InvalidComponentCount = 31,
    #[error("Invalid component parameters")]
    InvalidComponentParameters = 32,
    #[error("Invalid tile grid")]
    InvalidTileGrid = 33,
    #[error("Invalid tile index")]
    InvalidTileIndex = 34,
    #[error("Invalid progression order")]
    InvalidProgressionOrder = 35,
    #[error("Invalid number of layers")]
    InvalidLayerCount = 36,
    #[error("Invalid number of resolutions")]
    InvalidResolutionCount = 37,
    #[error("Invalid code-block size")]
    InvalidCodeblockSize = 38,
    #[error("Invalid precinct size")]
    InvalidPrecinctSize = 39,
    #[error("Invalid quantization parameters")]
    InvalidQuantization = 40,
    #[error("Too many progression order changes")]
    TooManyPocEntries = 41,
    #[error("Invalid multiple component transform record")]
    InvalidMctRecord = 42,

    // API usage errors
    #[error("Invalid operation")]
    InvalidOperation = 100,
    #[error("Invalid argument")]
    InvalidArgument = 101,
}

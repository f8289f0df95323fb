// Limits from ISO/IEC 15444-1 Annex A, plus implementation caps.

/// Csiz must stay below 16384 (A.5.1).
pub const MAX_COMPONENT_COUNT: usize = 16383;

/// The tile grid may address at most 65535 tiles.
pub const MAX_TILE_COUNT: u32 = 65535;

/// Running total of POC entries per tile must stay below this value.
pub const MAX_POC_ENTRIES: usize = 32;

/// Number of decomposition levels is capped at 32, so at most 33 resolutions.
pub const MAX_RESOLUTIONS: u8 = 33;

/// Subband count cap for quantization step-size tables (3 * 33 - 2).
pub const MAX_BANDS: usize = 3 * MAX_RESOLUTIONS as usize - 2;

/// Code-block width/height exponents (log2) are restricted to this range,
/// and their sum must not exceed `MAX_CODEBLOCK_AREA_EXPONENT`.
pub const MIN_CODEBLOCK_EXPONENT: u8 = 2;
pub const MAX_CODEBLOCK_EXPONENT: u8 = 10;
pub const MAX_CODEBLOCK_AREA_EXPONENT: u8 = 12;

/// The size in bytes of the marker segment length field.
pub const SEGMENT_LENGTH_SIZE: usize = 2;

/// A marker segment (including its length field) cannot exceed 65535 bytes.
pub const MAX_SEGMENT_SIZE: usize = u16::MAX as usize;

/// Lsot is fixed (A.4.2).
pub const SOT_SEGMENT_LENGTH: u16 = 10;

/// Total size of a SOT marker segment including the 2-byte marker code.
pub const SOT_MARKER_TOTAL_SIZE: usize = 12;

/// Offset of the Psot field from the start of the SOT marker code.
pub const SOT_PSOT_OFFSET: usize = 6;

/// Default number of guard bits written into Sqcd/Sqcc.
pub const DEFAULT_GUARD_BITS: u8 = 2;

/// Default comment emitted into the main header COM segment.
pub const DEFAULT_COMMENT: &str = "Created by j2kcodec";

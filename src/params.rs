//! The coding-parameter model.
//!
//! `CodingParameters` holds every coding decision at image granularity and
//! owns one `TileCodingParams` per tile (row-major); each tile in turn owns
//! one `TileComponentParams` per image component. The decoder populates
//! these while reading the main and tile-part headers; the encoder builds
//! them from `CompressionParameters` at setup and serializes them back out.

use bitflags::bitflags;
use num_enum::TryFromPrimitive;

use crate::constants::MAX_POC_ENTRIES;
use crate::error::J2kError;

/// Packet progression order (Table A.16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum ProgressionOrder {
    /// Layer-Resolution-Component-Position.
    #[default]
    Lrcp = 0,
    /// Resolution-Layer-Component-Position.
    Rlcp = 1,
    /// Resolution-Position-Component-Layer.
    Rpcl = 2,
    /// Position-Component-Resolution-Layer.
    Pcrl = 3,
    /// Component-Position-Resolution-Layer.
    Cprl = 4,
}

/// Quantization style, the low five bits of Sqcd/Sqcc (Table A.28).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum QuantizationStyle {
    /// No quantization; one exponent byte per subband.
    #[default]
    None = 0,
    /// Scalar quantization, values derived from the LL band entry.
    ScalarDerived = 1,
    /// Scalar quantization, one (exponent, mantissa) pair per subband.
    ScalarExpounded = 2,
}

bitflags! {
    /// Scod/Scoc coding style flags (Table A.13). Bit positions are
    /// serialized to the wire and must not change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CodingStyle: u8 {
        /// Precinct sizes are defined in SPcod/SPcoc.
        const PRECINCTS = 0x01;
        /// SOP markers are used in the bitstream.
        const SOP = 0x02;
        /// EPH markers are used in the bitstream.
        const EPH = 0x04;
    }
}

bitflags! {
    /// Code-block style flags (Table A.19), serialized to the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CodeblockStyle: u8 {
        /// Selective arithmetic coding bypass.
        const LAZY = 0x01;
        /// Context probabilities reset on each coding pass boundary.
        const RESET = 0x02;
        /// Termination on each coding pass.
        const TERMALL = 0x04;
        /// Vertically stripe-causal context formation.
        const VSC = 0x08;
        /// Predictable termination.
        const PREDICTABLE = 0x10;
        /// Segmentation symbols.
        const SEGSYM = 0x20;
    }
}

/// One quantization step size: a 5-bit exponent and an 11-bit mantissa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepSize {
    pub expn: u8,
    pub mant: u16,
}

/// One progression order change entry (Table A.32).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Poc {
    pub resno0: u8,
    pub compno0: u16,
    pub layno1: u16,
    pub resno1: u8,
    pub compno1: u16,
    pub order: ProgressionOrder,
}

/// Element type of an MCT array (Imct bits 10-11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum MctElementType {
    #[default]
    Int16 = 0,
    Int32 = 1,
    Float32 = 2,
    Float64 = 3,
}

/// Array type of an MCT record (Imct bits 8-9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum MctArrayType {
    #[default]
    Dependency = 0,
    Decorrelation = 1,
    Offset = 2,
}

/// A raw multiple-component-transform array as carried by an MCT segment.
/// The payload is opaque to the codestream core; the MCT kernel interprets
/// it according to `element_type`.
#[derive(Debug, Clone, Default)]
pub struct MctRecord {
    pub index: u8,
    pub array_type: MctArrayType,
    pub element_type: MctElementType,
    pub data: Vec<u8>,
}

/// A component collection (MCC segment): which components feed a transform
/// stage and which MCT records define it. Cross-references are indices into
/// `TileCodingParams::mct_records`; the record array may be resized while
/// parsing, which indices survive.
#[derive(Debug, Clone, Default)]
pub struct MccRecord {
    pub index: u8,
    pub input_comps: Vec<u16>,
    pub output_comps: Vec<u16>,
    /// Index of the decorrelation array record, if declared.
    pub decorrelation_mct: Option<usize>,
    /// Index of the offset array record, if declared.
    pub offset_mct: Option<usize>,
    pub is_irreversible: bool,
}

/// Per-tile-per-component coding parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TileComponentParams {
    /// Component coding style (only the precinct flag is meaningful here).
    pub csty: CodingStyle,
    /// Number of resolution levels (1..=33).
    pub numresolutions: u8,
    /// log2 code-block width (2..=10).
    pub cblkw: u8,
    /// log2 code-block height (2..=10).
    pub cblkh: u8,
    pub cblksty: CodeblockStyle,
    /// Wavelet filter: 0 = 9-7 irreversible, 1 = 5-3 reversible.
    pub qmfbid: u8,
    pub qntsty: QuantizationStyle,
    pub numgbits: u8,
    /// Per-subband step sizes; at most `MAX_BANDS` entries.
    pub stepsizes: Vec<StepSize>,
    /// Precinct width exponents, one per resolution level.
    pub prcw: Vec<u8>,
    /// Precinct height exponents, one per resolution level.
    pub prch: Vec<u8>,
    /// Region-of-interest upshift for this component.
    pub roishift: u8,
}

impl Default for TileComponentParams {
    fn default() -> Self {
        Self {
            csty: CodingStyle::empty(),
            numresolutions: 6,
            cblkw: 6,
            cblkh: 6,
            cblksty: CodeblockStyle::empty(),
            qmfbid: 1,
            qntsty: QuantizationStyle::None,
            numgbits: 2,
            stepsizes: Vec::new(),
            prcw: Vec::new(),
            prch: Vec::new(),
            roishift: 0,
        }
    }
}

impl TileComponentParams {
    /// Whether the coding fields (not quantization) differ from `other`.
    /// Used by the encoder to decide if a COC segment is needed.
    pub fn coding_differs(&self, other: &Self) -> bool {
        self.csty != other.csty
            || self.numresolutions != other.numresolutions
            || self.cblkw != other.cblkw
            || self.cblkh != other.cblkh
            || self.cblksty != other.cblksty
            || self.qmfbid != other.qmfbid
            || self.prcw != other.prcw
            || self.prch != other.prch
    }

    /// Whether the quantization fields differ from `other` (QCC decision).
    pub fn quantization_differs(&self, other: &Self) -> bool {
        self.qntsty != other.qntsty
            || self.numgbits != other.numgbits
            || self.stepsizes != other.stepsizes
    }

    /// Number of quantized subbands implied by the quantization style.
    pub fn band_count(&self) -> usize {
        match self.qntsty {
            QuantizationStyle::ScalarDerived => 1,
            _ => 3 * self.numresolutions as usize - 2,
        }
    }
}

/// Per-tile coding parameters and decode-time tile-part bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct TileCodingParams {
    pub csty: CodingStyle,
    pub prg: ProgressionOrder,
    pub numlayers: u16,
    /// Multiple component transform: 0 = none, 1 = standard RGB->YCC,
    /// 2 = custom array-based transform.
    pub mct: u8,
    /// Target rate per layer (compression ratio, 0 = no target).
    pub rates: Vec<f32>,
    /// Target distortion per layer (0 = no target).
    pub distortions: Vec<f64>,
    pub pocs: Vec<Poc>,
    pub tccps: Vec<TileComponentParams>,

    /// TNsot once known; 0 means "unknown, determine later".
    pub n_tile_parts: u8,
    /// Last TPsot seen for this tile; -1 before the first tile-part.
    pub current_tile_part: i16,
    /// Accumulated entropy-coded payload, grown per tile-part.
    pub data: Vec<u8>,
    /// Set once the final tile-part for the tile has been read.
    pub can_decode: bool,
    /// Set once the tile's payload has been handed to the tile coder.
    pub decoded: bool,

    /// PPT chunks indexed by Zppt, merged at SOD.
    pub ppt: bool,
    pub ppt_chunks: Vec<Option<Vec<u8>>>,
    pub ppt_buffer: Vec<u8>,

    pub mct_records: Vec<MctRecord>,
    pub mcc_records: Vec<MccRecord>,
    /// Transform stage ordering: indices of MCC records. Only a single
    /// stage is supported; extra stages are dropped with a warning.
    pub mco: Vec<u8>,
}

impl TileCodingParams {
    /// Appends POC entries, enforcing the running total cap.
    pub fn add_pocs(&mut self, entries: &[Poc]) -> Result<(), J2kError> {
        if self.pocs.len() + entries.len() >= MAX_POC_ENTRIES {
            return Err(J2kError::TooManyPocEntries);
        }
        self.pocs.extend_from_slice(entries);
        Ok(())
    }

    /// Looks up an MCT record by its wire index.
    pub fn mct_record(&self, index: u8) -> Option<&MctRecord> {
        self.mct_records.iter().find(|r| r.index == index)
    }

    /// Position of an MCT record in the owning array, for cross-references.
    pub fn mct_record_position(&self, index: u8) -> Option<usize> {
        self.mct_records.iter().position(|r| r.index == index)
    }

    pub fn mcc_record(&self, index: u8) -> Option<&MccRecord> {
        self.mcc_records.iter().find(|r| r.index == index)
    }

    /// Applies quantization parameters parsed from SQcd to every component.
    pub fn apply_quantization_to_all(&mut self, template: &TileComponentParams) {
        for tccp in &mut self.tccps {
            tccp.qntsty = template.qntsty;
            tccp.numgbits = template.numgbits;
            tccp.stepsizes = template.stepsizes.clone();
        }
    }
}

/// Image-wide coding parameters, built incrementally while reading or
/// writing the main header.
#[derive(Debug, Clone, Default)]
pub struct CodingParameters {
    /// Tile grid origin on the reference grid.
    pub tx0: u32,
    pub ty0: u32,
    /// Tile size.
    pub tdx: u32,
    pub tdy: u32,
    /// Tile grid dimensions, derived from image and tile size.
    pub tw: u32,
    pub th: u32,
    /// Profile / capabilities value from SIZ (Rsiz).
    pub rsiz: u16,
    /// One entry per tile, row-major (`tile = y * tw + x`).
    pub tcps: Vec<TileCodingParams>,

    /// PPM chunks indexed by Zppm, merged at the end of the main header.
    pub ppm: bool,
    pub ppm_chunks: Vec<Option<Vec<u8>>>,
    pub ppm_buffer: Vec<u8>,

    /// CAP marker contents, if present.
    pub cap_pcap: u32,
    pub cap_ccap: Vec<u16>,

    /// Latin-1 comment from the last COM segment.
    pub comment: Option<String>,
}

impl CodingParameters {
    pub fn num_tiles(&self) -> u32 {
        self.tw * self.th
    }

    /// Absolute pixel bounds of a tile on the reference grid, clamped to
    /// the image area (B.3).
    pub fn tile_bounds(
        &self,
        image_x0: u32,
        image_y0: u32,
        image_x1: u32,
        image_y1: u32,
        tile_index: u32,
    ) -> (u32, u32, u32, u32) {
        // Intermediate products can exceed u32 near the top of the grid
        // range; the clamps bring everything back under the image bounds.
        let p = (tile_index % self.tw) as u64;
        let q = (tile_index / self.tw) as u64;
        let tx0 = (self.tx0 as u64 + p * self.tdx as u64).max(image_x0 as u64);
        let ty0 = (self.ty0 as u64 + q * self.tdy as u64).max(image_y0 as u64);
        let tx1 = (self.tx0 as u64 + (p + 1) * self.tdx as u64).min(image_x1 as u64);
        let ty1 = (self.ty0 as u64 + (q + 1) * self.tdy as u64).min(image_y1 as u64);
        (tx0 as u32, ty0 as u32, tx1 as u32, ty1 as u32)
    }
}

/// Decoder options, passed once at setup.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderParams {
    /// Number of highest resolution levels to discard per component.
    pub reduce: u8,
    /// Number of quality layers to decode; 0 means all.
    pub layers: u16,
}

/// Encoder options, passed once at setup (the configuration surface of the
/// codec core).
#[derive(Debug, Clone)]
pub struct CompressionParameters {
    /// If false, a single tile covers the whole image.
    pub tile_size_on: bool,
    pub tx0: u32,
    pub ty0: u32,
    pub tdx: u32,
    pub tdy: u32,
    /// Number of resolution levels (1..=33).
    pub numresolution: u8,
    /// log2 code-block dimensions.
    pub cblkw: u8,
    pub cblkh: u8,
    pub cblksty: CodeblockStyle,
    pub prog_order: ProgressionOrder,
    pub numlayers: u16,
    pub rates: Vec<f32>,
    pub distortions: Vec<f64>,
    /// 9-7 irreversible transform instead of reversible 5-3.
    pub irreversible: bool,
    /// Multiple component transform mode (0/1/2).
    pub mct: u8,
    pub csty: CodingStyle,
    /// Precinct exponents per resolution; empty means maximal precincts.
    pub precinct_w: Vec<u8>,
    pub precinct_h: Vec<u8>,
    /// Component carrying a region of interest, with its upshift.
    pub roi_compno: Option<u16>,
    pub roi_shift: u8,
    /// Requested profile (Rsiz). Degraded to none on conformance failure.
    pub rsiz: u16,
    /// Emit a TLM side-table in the main header.
    pub write_tlm: bool,
    /// Emit PLT side-tables in tile-part headers.
    pub write_plt: bool,
    /// Main header comment; `None` suppresses the COM segment.
    pub comment: Option<String>,
    /// Progression order changes applied to every tile.
    pub pocs: Vec<Poc>,
    pub numgbits: u8,
}

impl Default for CompressionParameters {
    fn default() -> Self {
        Self {
            tile_size_on: false,
            tx0: 0,
            ty0: 0,
            tdx: 0,
            tdy: 0,
            numresolution: 6,
            cblkw: 6,
            cblkh: 6,
            cblksty: CodeblockStyle::empty(),
            prog_order: ProgressionOrder::Lrcp,
            numlayers: 1,
            rates: Vec::new(),
            distortions: Vec::new(),
            irreversible: false,
            mct: 0,
            csty: CodingStyle::empty(),
            precinct_w: Vec::new(),
            precinct_h: Vec::new(),
            roi_compno: None,
            roi_shift: 0,
            rsiz: 0,
            write_tlm: false,
            write_plt: false,
            comment: Some(crate::constants::DEFAULT_COMMENT.to_string()),
            pocs: Vec::new(),
            numgbits: crate::constants::DEFAULT_GUARD_BITS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poc_accumulation_cap() {
        let mut tcp = TileCodingParams::default();
        let entries: Vec<Poc> = (0..10).map(|_| Poc::default()).collect();
        tcp.add_pocs(&entries).unwrap();
        tcp.add_pocs(&entries).unwrap();
        tcp.add_pocs(&entries).unwrap();
        assert_eq!(tcp.pocs.len(), 30);
        // 30 + 1 = 31 still below the cap.
        tcp.add_pocs(&[Poc::default()]).unwrap();
        // 31 + 1 would reach 32.
        assert_eq!(
            tcp.add_pocs(&[Poc::default()]),
            Err(J2kError::TooManyPocEntries)
        );
        assert_eq!(tcp.pocs.len(), 31);
    }

    #[test]
    fn test_coding_differs() {
        let a = TileComponentParams::default();
        let mut b = TileComponentParams::default();
        assert!(!a.coding_differs(&b));
        b.cblkw = 5;
        assert!(a.coding_differs(&b));
        let mut c = TileComponentParams::default();
        c.numgbits = 3;
        assert!(!a.coding_differs(&c));
        assert!(a.quantization_differs(&c));
    }

    #[test]
    fn test_tile_bounds_clamped() {
        let cp = CodingParameters {
            tdx: 64,
            tdy: 64,
            tw: 2,
            th: 2,
            ..Default::default()
        };
        // 100x100 image on a 2x2 grid of 64x64 tiles.
        assert_eq!(cp.tile_bounds(0, 0, 100, 100, 0), (0, 0, 64, 64));
        assert_eq!(cp.tile_bounds(0, 0, 100, 100, 1), (64, 0, 100, 64));
        assert_eq!(cp.tile_bounds(0, 0, 100, 100, 3), (64, 64, 100, 100));
    }

    #[test]
    fn test_tile_bounds_at_grid_range_limit() {
        // Tile sizes near u32::MAX: the last tile's nominal right edge is
        // past the u32 range and must clamp to the image.
        let cp = CodingParameters {
            tdx: 0x8000_0000,
            tdy: 16,
            tw: 2,
            th: 1,
            ..Default::default()
        };
        assert_eq!(
            cp.tile_bounds(0, 0, u32::MAX, 16, 1),
            (0x8000_0000, 0, u32::MAX, 16)
        );
    }

    #[test]
    fn test_mct_record_lookup_survives_resize() {
        let mut tcp = TileCodingParams::default();
        tcp.mct_records.push(MctRecord {
            index: 7,
            ..Default::default()
        });
        let pos = tcp.mct_record_position(7).unwrap();
        // Growing the array must not invalidate the stored position.
        for i in 0..100 {
            tcp.mct_records.push(MctRecord {
                index: i,
                ..Default::default()
            });
        }
        assert_eq!(tcp.mct_records[pos].index, 7);
    }
}

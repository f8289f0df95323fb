//! Codestream decoding: the marker state machine for the read direction.
//!
//! Decoding walks `SOC -> main header -> (SOT -> tile-part header -> SOD ->
//! data)* -> EOC`, validating each marker against the states in which it may
//! legally appear, populating `CodingParameters` as shared mutable context,
//! and accumulating per-tile entropy payloads that are handed to the
//! `TileCoder` collaborator once a tile is complete.

use log::{debug, warn};

use crate::constants::{
    MAX_BANDS, MAX_CODEBLOCK_AREA_EXPONENT, MAX_CODEBLOCK_EXPONENT, MAX_COMPONENT_COUNT,
    MAX_RESOLUTIONS, MAX_TILE_COUNT, SEGMENT_LENGTH_SIZE,
    SOT_MARKER_TOTAL_SIZE, SOT_SEGMENT_LENGTH,
};
use crate::error::J2kError;
use crate::image::{Image, ImageComponent};
use crate::index::{CodestreamIndex, TilePartSpan, TlmEntry};
use crate::markers::{DecoderState, MarkerCode};
use crate::params::{
    CodeblockStyle, CodingParameters, CodingStyle, DecoderParams, MccRecord, MctArrayType,
    MctElementType, MctRecord, Poc, ProgressionOrder, QuantizationStyle, StepSize,
    TileCodingParams, TileComponentParams,
};
use crate::stream::CodestreamReader;
use crate::tile::TileCoder;

/// Outcome of reading one tile-part (or the end of the tile domain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TilePartEvent {
    /// A tile-part for this tile was read completely.
    TilePart(u16),
    /// EOC reached.
    EndOfCodestream,
    /// Stream exhausted without EOC (tolerated, NEOC).
    Truncated,
}

pub struct J2kDecoder<'a> {
    reader: CodestreamReader<'a>,
    state: DecoderState,
    params: DecoderParams,
    cp: CodingParameters,
    image: Image,
    index: CodestreamIndex,
    /// Main-header coding parameters inherited by each tile at its first SOT.
    default_tcp: TileCodingParams,
    current_tile: u16,
    /// Start offset of the SOT marker of the tile-part being read.
    sot_start: usize,
    /// Absolute end of the current tile-part; `None` means Psot == 0
    /// ("rest of stream belongs to this tile-part").
    tp_end: Option<usize>,
    decode_area: Option<(u32, u32, u32, u32)>,
    header_done: bool,
    cod_seen: bool,
    qcd_seen: bool,
    /// Result of the one-shot TPsot/TNsot off-by-one pre-scan.
    tile_part_correction: bool,
    tp_scan_done: bool,
}

impl<'a> J2kDecoder<'a> {
    pub fn new(source: &'a [u8], params: DecoderParams) -> Self {
        Self {
            reader: CodestreamReader::new(source),
            state: DecoderState::MH_SOC,
            params,
            cp: CodingParameters::default(),
            image: Image::default(),
            index: CodestreamIndex::default(),
            default_tcp: TileCodingParams::default(),
            current_tile: 0,
            sot_start: 0,
            tp_end: None,
            decode_area: None,
            header_done: false,
            cod_seen: false,
            qcd_seen: false,
            tile_part_correction: false,
            tp_scan_done: false,
        }
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn coding_parameters(&self) -> &CodingParameters {
        &self.cp
    }

    pub fn codestream_index(&self) -> &CodestreamIndex {
        &self.index
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Restricts decoding to tiles intersecting the given image-grid window.
    pub fn set_decode_area(&mut self, x0: u32, y0: u32, x1: u32, y1: u32) -> Result<(), J2kError> {
        if !self.header_done {
            return Err(J2kError::InvalidOperation);
        }
        if x0 >= x1 || y0 >= y1 || x0 < self.image.x0 || y0 < self.image.y0
            || x1 > self.image.x1 || y1 > self.image.y1
        {
            return Err(J2kError::InvalidArgument);
        }
        self.decode_area = Some((x0, y0, x1, y1));
        Ok(())
    }

    /// Reads the main header: SOC, SIZ, then marker segments until the
    /// first SOT. SIZ, COD and QCD are mandatory.
    pub fn read_header(&mut self) -> Result<&Image, J2kError> {
        if self.header_done {
            return Ok(&self.image);
        }
        if self.state != DecoderState::MH_SOC {
            return Err(J2kError::InvalidOperation);
        }
        self.index.main_header_start = self.reader.position();
        let soc = self.reader.read_u16().map_err(|_| J2kError::SocNotFound)?;
        if soc != MarkerCode::Soc as u16 {
            return Err(J2kError::SocNotFound);
        }
        self.state = DecoderState::MH_SIZ;
        loop {
            let marker = self.read_marker()?;
            if marker == MarkerCode::Sot {
                if self.state != DecoderState::MH || !(self.cod_seen && self.qcd_seen) {
                    return Err(J2kError::RequiredMarkerMissing);
                }
                self.merge_ppm();
                let sot_pos = self.reader.position() - 2;
                self.index.main_header_end = sot_pos;
                self.reader.seek(sot_pos)?;
                self.state = DecoderState::TPH_SOT;
                self.header_done = true;
                return Ok(&self.image);
            }
            self.read_marker_segment(marker)?;
        }
    }

    /// Decodes all tiles (restricted by the decode area, if set). The
    /// result is available through `image()` / `into_image()`.
    pub fn decode<T: TileCoder>(&mut self, coder: &mut T) -> Result<(), J2kError> {
        self.read_header()?;
        loop {
            match self.read_tile_part() {
                Ok(TilePartEvent::TilePart(tile)) => {
                    let tcp = &self.cp.tcps[tile as usize];
                    if tcp.can_decode && !tcp.decoded && self.tile_in_decode_area(tile) {
                        self.decode_tile_payload(tile, coder)?;
                    }
                }
                Ok(TilePartEvent::EndOfCodestream | TilePartEvent::Truncated) => break,
                Err(e) => {
                    self.state = DecoderState::ERR;
                    return Err(e);
                }
            }
        }
        self.decode_pending_tiles(coder)
    }

    /// Decodes a single tile, scanning the tile domain from the end of the
    /// main header. A decoder instance performs one pass over the tile
    /// domain; use a fresh decoder over the same bytes for each
    /// random-access read.
    pub fn decode_tile<T: TileCoder>(
        &mut self,
        tile_index: u16,
        coder: &mut T,
    ) -> Result<(), J2kError> {
        self.read_header()?;
        if tile_index as u32 >= self.cp.num_tiles() {
            return Err(J2kError::InvalidTileIndex);
        }
        self.reader.seek(self.index.main_header_end)?;
        self.state = DecoderState::TPH_SOT;
        loop {
            match self.read_tile_part()? {
                TilePartEvent::TilePart(tile) => {
                    if tile == tile_index && self.cp.tcps[tile as usize].can_decode {
                        return self.decode_tile_payload(tile, coder);
                    }
                }
                TilePartEvent::EndOfCodestream | TilePartEvent::Truncated => {
                    // Tile-part counts may have been unknown (TNsot == 0);
                    // whatever accumulated is decodable now.
                    let tcp = &self.cp.tcps[tile_index as usize];
                    if !tcp.decoded && !tcp.data.is_empty() {
                        return self.decode_tile_payload(tile_index, coder);
                    }
                    return Err(J2kError::UnexpectedEndOfStream);
                }
            }
        }
    }

    /// Consumes the decoder, yielding the output image.
    pub fn into_image(self) -> Image {
        self.image
    }

    fn decode_pending_tiles<T: TileCoder>(&mut self, coder: &mut T) -> Result<(), J2kError> {
        for tile in 0..self.cp.num_tiles() as u16 {
            let tcp = &self.cp.tcps[tile as usize];
            if !tcp.decoded && !tcp.data.is_empty() && self.tile_in_decode_area(tile) {
                self.decode_tile_payload(tile, coder)?;
            }
        }
        Ok(())
    }

    fn decode_tile_payload<T: TileCoder>(
        &mut self,
        tile: u16,
        coder: &mut T,
    ) -> Result<(), J2kError> {
        coder.init_decode_tile(tile)?;
        // The buffer is taken out of the tile entry: it is released as soon
        // as the coder has consumed it.
        let data = std::mem::take(&mut self.cp.tcps[tile as usize].data);
        coder.decode_tile(tile, &self.cp, &data, &mut self.image)?;
        self.cp.tcps[tile as usize].decoded = true;
        Ok(())
    }

    fn tile_in_decode_area(&self, tile: u16) -> bool {
        let Some((ax0, ay0, ax1, ay1)) = self.decode_area else {
            return true;
        };
        let (tx0, ty0, tx1, ty1) =
            self.cp
                .tile_bounds(self.image.x0, self.image.y0, self.image.x1, self.image.y1, tile as u32);
        tx0 < ax1 && ax0 < tx1 && ty0 < ay1 && ay0 < ty1
    }

    // ------------------------------------------------------------------
    // Marker sequencing

    /// Reads the next 2-byte marker code, entering the unknown-marker
    /// recovery path when the code is not a marker or not recognized.
    fn read_marker(&mut self) -> Result<MarkerCode, J2kError> {
        let raw = self.reader.read_u16()?;
        match MarkerCode::try_from(raw) {
            Ok(marker) => Ok(marker),
            Err(_) => self.recover_unknown_marker(raw),
        }
    }

    /// Consumes 2-byte words until a marker legal in the current state
    /// appears.
    fn recover_unknown_marker(&mut self, raw: u16) -> Result<MarkerCode, J2kError> {
        warn!("unknown marker 0x{raw:04x}, scanning for a known marker");
        loop {
            if self.reader.bytes_left() < 2 {
                return Err(J2kError::UnknownMarker);
            }
            let word = self.reader.read_u16()?;
            if let Ok(marker) = MarkerCode::try_from(word) {
                if marker.legal_states().intersects(self.state) {
                    debug!("resynchronized on {marker:?}");
                    return Ok(marker);
                }
            }
        }
    }

    /// Reads one marker segment: legality check, length field, dispatch,
    /// and exact-consumption check.
    fn read_marker_segment(&mut self, marker: MarkerCode) -> Result<(), J2kError> {
        if !marker.legal_states().intersects(self.state) {
            return Err(J2kError::MarkerNotAllowed);
        }
        let seg_start = self.reader.position() - 2;
        let length = self.reader.read_u16()? as usize;
        if length < SEGMENT_LENGTH_SIZE || length - SEGMENT_LENGTH_SIZE > self.reader.bytes_left() {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let size = length - SEGMENT_LENGTH_SIZE;
        let end = self.reader.position() + size;
        // Inside a tile-part header every segment must fit in the byte
        // budget declared by Psot.
        if self.state.contains(DecoderState::TPH) {
            if let Some(tp_end) = self.tp_end {
                if end > tp_end {
                    return Err(J2kError::TilePartHeaderSizeMismatch);
                }
            }
        }
        match marker {
            MarkerCode::Siz => self.read_siz(size)?,
            MarkerCode::Cod => self.read_cod(size)?,
            MarkerCode::Coc => self.read_coc(size)?,
            MarkerCode::Qcd => self.read_qcd(size)?,
            MarkerCode::Qcc => self.read_qcc(size)?,
            MarkerCode::Rgn => self.read_rgn(size)?,
            MarkerCode::Poc => self.read_poc(size)?,
            MarkerCode::Tlm => self.read_tlm(size)?,
            MarkerCode::Plm => self.read_plm(size)?,
            MarkerCode::Plt => self.read_plt(size)?,
            MarkerCode::Ppm => self.read_ppm(size)?,
            MarkerCode::Ppt => self.read_ppt(size)?,
            MarkerCode::Crg => self.read_crg(size)?,
            MarkerCode::Com => self.read_com(size)?,
            MarkerCode::Cap => self.read_cap(size)?,
            MarkerCode::Cbd => self.read_cbd(size)?,
            MarkerCode::Mct => self.read_mct(size)?,
            MarkerCode::Mcc => self.read_mcc(size)?,
            MarkerCode::Mco => self.read_mco(size)?,
            _ => return Err(J2kError::MarkerNotAllowed),
        }
        if self.reader.position() != end {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let record_len = length + 2;
        if self.state.contains(DecoderState::TPH) {
            self.index
                .add_tile_marker(self.current_tile as usize, marker as u16, seg_start, record_len);
        } else {
            self.index.add_main_marker(marker as u16, seg_start, record_len);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tile-part machinery

    fn read_tile_part(&mut self) -> Result<TilePartEvent, J2kError> {
        debug_assert_eq!(self.state, DecoderState::TPH_SOT);
        if self.reader.bytes_left() < 2 {
            warn!("stream ended without an EOC marker");
            self.state = DecoderState::NEOC;
            return Ok(TilePartEvent::Truncated);
        }
        if !self.tp_scan_done {
            self.tp_scan_done = true;
            if self.need_tile_part_correction()? {
                warn!("TPsot equals TNsot in at least one tile-part; assuming one extra tile-part per tile");
                self.tile_part_correction = true;
            }
        }
        let marker = self.read_marker()?;
        match marker {
            MarkerCode::Eoc => {
                self.state = DecoderState::EOC;
                Ok(TilePartEvent::EndOfCodestream)
            }
            MarkerCode::Sot => {
                self.read_sot()?;
                loop {
                    let m = self.read_marker()?;
                    if m == MarkerCode::Sod {
                        break;
                    }
                    self.read_marker_segment(m)?;
                }
                self.read_tile_data()?;
                Ok(TilePartEvent::TilePart(self.current_tile))
            }
            _ => Err(J2kError::ExpectedSotMarker),
        }
    }

    /// Look-ahead pass over the tile-part chain, detecting the historical
    /// off-by-one pattern where a tile-part carries TPsot == TNsot.
    fn need_tile_part_correction(&mut self) -> Result<bool, J2kError> {
        let saved = self.reader.position();
        let mut correction = false;
        loop {
            let Ok(word) = self.reader.read_u16() else {
                break;
            };
            if word != MarkerCode::Sot as u16 {
                break;
            }
            let sot_start = self.reader.position() - 2;
            if self.reader.read_u16().is_err() {
                break;
            }
            let Ok(_isot) = self.reader.read_u16() else { break };
            let Ok(psot) = self.reader.read_u32() else { break };
            let Ok(tpsot) = self.reader.read_u8() else { break };
            let Ok(tnsot) = self.reader.read_u8() else { break };
            if tnsot != 0 && tpsot == tnsot {
                correction = true;
                break;
            }
            if psot == 0 {
                break;
            }
            if self.reader.seek(sot_start + psot as usize).is_err() {
                break;
            }
        }
        self.reader.seek(saved)?;
        Ok(correction)
    }

    fn read_sot(&mut self) -> Result<(), J2kError> {
        let sot_start = self.reader.position() - 2;
        let lsot = self.reader.read_u16()?;
        if lsot != SOT_SEGMENT_LENGTH {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let isot = self.reader.read_u16()?;
        if isot as u32 >= self.cp.num_tiles() {
            return Err(J2kError::InvalidTileIndex);
        }
        let psot = self.reader.read_u32()?;
        let tpsot = self.reader.read_u8()?;
        let tnsot = self.reader.read_u8()?;

        if self.cp.tcps[isot as usize].current_tile_part < 0 && tpsot == 0 {
            // First tile-part of this tile: inherit the main-header defaults.
            let mut fresh = self.default_tcp.clone();
            fresh.current_tile_part = -1;
            // A layer restriction caps what the tile coder gets to see.
            if self.params.layers != 0 {
                fresh.numlayers = fresh.numlayers.min(self.params.layers);
            }
            self.cp.tcps[isot as usize] = fresh;
        }
        let effective_tnsot = if tnsot != 0 && self.tile_part_correction {
            tnsot.saturating_add(1)
        } else {
            tnsot
        };
        let tcp = &mut self.cp.tcps[isot as usize];
        if tpsot as i16 != tcp.current_tile_part + 1 {
            return Err(J2kError::TilePartOrderViolation);
        }
        if effective_tnsot != 0 {
            if tpsot >= effective_tnsot {
                return Err(J2kError::TilePartOrderViolation);
            }
            tcp.n_tile_parts = effective_tnsot;
            tcp.can_decode = tpsot + 1 == effective_tnsot;
        }
        tcp.current_tile_part = tpsot as i16;

        if psot == 0 {
            // "Rest of stream belongs to this tile-part"; only legal for
            // the final one.
            if effective_tnsot != 0 && tpsot + 1 != effective_tnsot {
                warn!("Psot == 0 on tile-part {tpsot} of {effective_tnsot}; treating it as the last tile-part");
            }
            self.tp_end = None;
        } else {
            if (psot as usize) < SOT_MARKER_TOTAL_SIZE + 2 {
                return Err(J2kError::InvalidMarkerSegmentSize);
            }
            let end = sot_start + psot as usize;
            if end > self.reader.position() + self.reader.bytes_left() {
                return Err(J2kError::UnexpectedEndOfStream);
            }
            self.tp_end = Some(end);
        }
        self.current_tile = isot;
        self.sot_start = sot_start;
        self.state = DecoderState::TPH;
        self.index
            .add_tile_marker(isot as usize, MarkerCode::Sot as u16, sot_start, SOT_MARKER_TOTAL_SIZE);
        Ok(())
    }

    fn read_tile_data(&mut self) -> Result<(), J2kError> {
        let data_start = self.reader.position();
        let data_len = match self.tp_end {
            Some(end) => {
                if end < data_start {
                    return Err(J2kError::TilePartHeaderSizeMismatch);
                }
                end - data_start
            }
            None => {
                // Psot == 0: everything up to EOC (when present) is payload.
                let left = self.reader.bytes_left();
                let rest = self.reader.remaining_data();
                if left >= 2 && rest[left - 2..] == [0xFF, 0xD9] {
                    left - 2
                } else {
                    left
                }
            }
        };
        let payload = self.reader.read_bytes(data_len)?;
        let tile = self.current_tile as usize;
        let tcp = &mut self.cp.tcps[tile];
        if tcp.ppt {
            // PPT chunks for this tile-part become available at SOD.
            let chunks = std::mem::take(&mut tcp.ppt_chunks);
            for (z, chunk) in chunks.iter().enumerate() {
                match chunk {
                    Some(bytes) => tcp.ppt_buffer.extend_from_slice(bytes),
                    None => warn!("missing PPT chunk Zppt={z}"),
                }
            }
        }
        tcp.data.extend_from_slice(payload);
        if self.tp_end.is_none() {
            tcp.can_decode = true;
        }
        self.index.tiles[tile].tile_parts.push(TilePartSpan {
            start: self.sot_start,
            data_start,
            end: data_start + data_len,
        });
        self.tp_end = None;
        self.state = DecoderState::TPH_SOT;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Main/tile header marker readers. Each consumes exactly `size` bytes
    // (checked by `read_marker_segment`).

    fn read_siz(&mut self, size: usize) -> Result<(), J2kError> {
        let rsiz = self.reader.read_u16()?;
        let x1 = self.reader.read_u32()?;
        let y1 = self.reader.read_u32()?;
        let x0 = self.reader.read_u32()?;
        let y0 = self.reader.read_u32()?;
        let tdx = self.reader.read_u32()?;
        let tdy = self.reader.read_u32()?;
        let tx0 = self.reader.read_u32()?;
        let ty0 = self.reader.read_u32()?;
        let csiz = self.reader.read_u16()? as usize;

        if csiz == 0 || csiz > MAX_COMPONENT_COUNT {
            return Err(J2kError::InvalidComponentCount);
        }
        if size != 36 + 3 * csiz {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let mut comps = Vec::with_capacity(csiz);
        for _ in 0..csiz {
            let prec_byte = self.reader.read_u8()?;
            let dx = self.reader.read_u8()? as u32;
            let dy = self.reader.read_u8()? as u32;
            comps.push(ImageComponent {
                dx,
                dy,
                prec: (prec_byte & 0x7F) + 1,
                signed: prec_byte & 0x80 != 0,
                factor: self.params.reduce,
                data: None,
            });
        }
        if x1 <= x0 || y1 <= y0 {
            return Err(J2kError::InvalidImageGeometry);
        }
        if tdx == 0 || tdy == 0 {
            return Err(J2kError::InvalidTileGrid);
        }
        // The tile grid must actually overlap the image area.
        if tx0 > x0
            || ty0 > y0
            || tx0 as u64 + tdx as u64 <= x0 as u64
            || ty0 as u64 + tdy as u64 <= y0 as u64
        {
            return Err(J2kError::InvalidTileGrid);
        }
        let tw = (x1 - tx0).div_ceil(tdx);
        let th = (y1 - ty0).div_ceil(tdy);
        if tw as u64 * th as u64 > MAX_TILE_COUNT as u64 {
            return Err(J2kError::InvalidTileGrid);
        }
        self.image = Image::new(x0, y0, x1, y1, comps)?;
        self.cp.rsiz = rsiz;
        self.cp.tx0 = tx0;
        self.cp.ty0 = ty0;
        self.cp.tdx = tdx;
        self.cp.tdy = tdy;
        self.cp.tw = tw;
        self.cp.th = th;
        let num_tiles = (tw * th) as usize;
        self.default_tcp.tccps = vec![TileComponentParams::default(); csiz];
        self.cp.tcps = vec![
            TileCodingParams {
                tccps: vec![TileComponentParams::default(); csiz],
                current_tile_part: -1,
                ..Default::default()
            };
            num_tiles
        ];
        self.index.tiles = vec![Default::default(); num_tiles];
        self.state = DecoderState::MH;
        debug!("SIZ: {}x{} image, {csiz} components, {tw}x{th} tile grid", x1 - x0, y1 - y0);
        Ok(())
    }

    /// Parses the SPcod/SPcoc block shared by COD and COC.
    fn read_spcod(
        &mut self,
        has_precincts: bool,
    ) -> Result<(u8, u8, u8, CodeblockStyle, u8, Vec<u8>, Vec<u8>), J2kError> {
        let decomp_levels = self.reader.read_u8()?;
        if decomp_levels >= MAX_RESOLUTIONS {
            return Err(J2kError::InvalidResolutionCount);
        }
        let numresolutions = decomp_levels + 1;
        let cblkw_raw = self.reader.read_u8()?;
        let cblkh_raw = self.reader.read_u8()?;
        if cblkw_raw > MAX_CODEBLOCK_EXPONENT - 2
            || cblkh_raw > MAX_CODEBLOCK_EXPONENT - 2
            || cblkw_raw + cblkh_raw + 4 > MAX_CODEBLOCK_AREA_EXPONENT
        {
            return Err(J2kError::InvalidCodeblockSize);
        }
        let cblkw = cblkw_raw + 2;
        let cblkh = cblkh_raw + 2;
        let cblksty_raw = self.reader.read_u8()?;
        let cblksty = CodeblockStyle::from_bits_truncate(cblksty_raw);
        if cblksty.bits() != cblksty_raw {
            warn!("ignoring unknown code-block style bits 0x{cblksty_raw:02x}");
        }
        let qmfbid = self.reader.read_u8()?;
        if qmfbid > 1 {
            return Err(J2kError::InvalidArgument);
        }
        let mut prcw = Vec::new();
        let mut prch = Vec::new();
        if has_precincts {
            for level in 0..numresolutions {
                let packed = self.reader.read_u8()?;
                let w = packed & 0x0F;
                let h = packed >> 4;
                // A zero exponent is only legal at the lowest level.
                if level > 0 && (w == 0 || h == 0) {
                    return Err(J2kError::InvalidPrecinctSize);
                }
                prcw.push(w);
                prch.push(h);
            }
        } else {
            prcw = vec![15; numresolutions as usize];
            prch = vec![15; numresolutions as usize];
        }
        Ok((numresolutions, cblkw, cblkh, cblksty, qmfbid, prcw, prch))
    }

    fn read_cod(&mut self, _size: usize) -> Result<(), J2kError> {
        let scod = self.reader.read_u8()?;
        let csty = CodingStyle::from_bits_truncate(scod);
        if csty.bits() != scod {
            warn!("ignoring unknown coding style bits 0x{scod:02x}");
        }
        let prg = ProgressionOrder::try_from(self.reader.read_u8()?)
            .map_err(|_| J2kError::InvalidProgressionOrder)?;
        let numlayers = self.reader.read_u16()?;
        if numlayers == 0 {
            return Err(J2kError::InvalidLayerCount);
        }
        let mct = self.reader.read_u8()?;
        if mct > 2 {
            return Err(J2kError::InvalidMctRecord);
        }
        let (numres, cblkw, cblkh, cblksty, qmfbid, prcw, prch) =
            self.read_spcod(csty.contains(CodingStyle::PRECINCTS))?;

        let in_tph = self.state.contains(DecoderState::TPH);
        let tcp = if in_tph {
            &mut self.cp.tcps[self.current_tile as usize]
        } else {
            &mut self.default_tcp
        };
        tcp.csty = csty;
        tcp.prg = prg;
        tcp.numlayers = numlayers;
        tcp.mct = mct;
        for tccp in &mut tcp.tccps {
            tccp.csty = csty & CodingStyle::PRECINCTS;
            tccp.numresolutions = numres;
            tccp.cblkw = cblkw;
            tccp.cblkh = cblkh;
            tccp.cblksty = cblksty;
            tccp.qmfbid = qmfbid;
            tccp.prcw = prcw.clone();
            tccp.prch = prch.clone();
        }
        if !in_tph {
            self.cod_seen = true;
        }
        Ok(())
    }

    fn read_component_index(&mut self) -> Result<u16, J2kError> {
        let compno = if self.image.comps.len() <= 256 {
            self.reader.read_u8()? as u16
        } else {
            self.reader.read_u16()?
        };
        if compno as usize >= self.image.comps.len() {
            return Err(J2kError::InvalidComponentParameters);
        }
        Ok(compno)
    }

    fn read_coc(&mut self, _size: usize) -> Result<(), J2kError> {
        let compno = self.read_component_index()?;
        let scoc = self.reader.read_u8()?;
        let csty = CodingStyle::from_bits_truncate(scoc) & CodingStyle::PRECINCTS;
        let (numres, cblkw, cblkh, cblksty, qmfbid, prcw, prch) =
            self.read_spcod(csty.contains(CodingStyle::PRECINCTS))?;
        let in_tph = self.state.contains(DecoderState::TPH);
        let tcp = if in_tph {
            &mut self.cp.tcps[self.current_tile as usize]
        } else {
            &mut self.default_tcp
        };
        let tccp = &mut tcp.tccps[compno as usize];
        tccp.csty = csty;
        tccp.numresolutions = numres;
        tccp.cblkw = cblkw;
        tccp.cblkh = cblkh;
        tccp.cblksty = cblksty;
        tccp.qmfbid = qmfbid;
        tccp.prcw = prcw;
        tccp.prch = prch;
        Ok(())
    }

    /// Parses the SQcd/SQcc block shared by QCD and QCC. `size` is the
    /// number of bytes available for the block.
    fn read_sqcd(&mut self, size: usize) -> Result<TileComponentParams, J2kError> {
        if size < 1 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let sqcd = self.reader.read_u8()?;
        let qntsty = QuantizationStyle::try_from(sqcd & 0x1F)
            .map_err(|_| J2kError::InvalidQuantization)?;
        let numgbits = sqcd >> 5;
        let remaining = size - 1;
        let mut stepsizes = Vec::new();
        match qntsty {
            QuantizationStyle::None => {
                for _ in 0..remaining {
                    let b = self.reader.read_u8()?;
                    stepsizes.push(StepSize {
                        expn: b >> 3,
                        mant: 0,
                    });
                }
            }
            QuantizationStyle::ScalarDerived => {
                if remaining != 2 {
                    return Err(J2kError::InvalidQuantization);
                }
                let v = self.reader.read_u16()?;
                stepsizes.push(StepSize {
                    expn: (v >> 11) as u8,
                    mant: v & 0x07FF,
                });
            }
            QuantizationStyle::ScalarExpounded => {
                if remaining % 2 != 0 {
                    return Err(J2kError::InvalidQuantization);
                }
                for _ in 0..remaining / 2 {
                    let v = self.reader.read_u16()?;
                    stepsizes.push(StepSize {
                        expn: (v >> 11) as u8,
                        mant: v & 0x07FF,
                    });
                }
            }
        }
        if stepsizes.len() > MAX_BANDS {
            warn!(
                "quantization declares {} subbands, keeping the first {MAX_BANDS}",
                stepsizes.len()
            );
            stepsizes.truncate(MAX_BANDS);
        }
        Ok(TileComponentParams {
            qntsty,
            numgbits,
            stepsizes,
            ..Default::default()
        })
    }

    fn read_qcd(&mut self, size: usize) -> Result<(), J2kError> {
        let template = self.read_sqcd(size)?;
        let in_tph = self.state.contains(DecoderState::TPH);
        let tcp = if in_tph {
            &mut self.cp.tcps[self.current_tile as usize]
        } else {
            &mut self.default_tcp
        };
        tcp.apply_quantization_to_all(&template);
        if !in_tph {
            self.qcd_seen = true;
        }
        Ok(())
    }

    fn read_qcc(&mut self, size: usize) -> Result<(), J2kError> {
        let comp_bytes = if self.image.comps.len() <= 256 { 1 } else { 2 };
        if size <= comp_bytes {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let compno = self.read_component_index()?;
        let template = self.read_sqcd(size - comp_bytes)?;
        let in_tph = self.state.contains(DecoderState::TPH);
        let tcp = if in_tph {
            &mut self.cp.tcps[self.current_tile as usize]
        } else {
            &mut self.default_tcp
        };
        let tccp = &mut tcp.tccps[compno as usize];
        tccp.qntsty = template.qntsty;
        tccp.numgbits = template.numgbits;
        tccp.stepsizes = template.stepsizes;
        Ok(())
    }

    fn read_rgn(&mut self, _size: usize) -> Result<(), J2kError> {
        let compno = self.read_component_index()?;
        let srgn = self.reader.read_u8()?;
        let sprgn = self.reader.read_u8()?;
        if srgn != 0 {
            warn!("unsupported ROI style {srgn}, ignoring RGN for component {compno}");
            return Ok(());
        }
        let in_tph = self.state.contains(DecoderState::TPH);
        let tcp = if in_tph {
            &mut self.cp.tcps[self.current_tile as usize]
        } else {
            &mut self.default_tcp
        };
        tcp.tccps[compno as usize].roishift = sprgn;
        Ok(())
    }

    fn read_poc(&mut self, size: usize) -> Result<(), J2kError> {
        let comp_bytes = if self.image.comps.len() <= 256 { 1 } else { 2 };
        let entry_size = 5 + 2 * comp_bytes;
        if size == 0 || size % entry_size != 0 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let count = size / entry_size;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let resno0 = self.reader.read_u8()?;
            let compno0 = if comp_bytes == 1 {
                self.reader.read_u8()? as u16
            } else {
                self.reader.read_u16()?
            };
            let layno1 = self.reader.read_u16()?;
            let resno1 = self.reader.read_u8()?;
            let compno1 = if comp_bytes == 1 {
                self.reader.read_u8()? as u16
            } else {
                self.reader.read_u16()?
            };
            let order = ProgressionOrder::try_from(self.reader.read_u8()?)
                .map_err(|_| J2kError::InvalidProgressionOrder)?;
            if layno1 == 0 || resno1 <= resno0 {
                return Err(J2kError::InvalidArgument);
            }
            entries.push(Poc {
                resno0,
                compno0,
                layno1,
                resno1,
                compno1,
                order,
            });
        }
        let in_tph = self.state.contains(DecoderState::TPH);
        let tcp = if in_tph {
            &mut self.cp.tcps[self.current_tile as usize]
        } else {
            &mut self.default_tcp
        };
        tcp.add_pocs(&entries)
    }

    fn read_tlm(&mut self, size: usize) -> Result<(), J2kError> {
        if size < 2 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let _ztlm = self.reader.read_u8()?;
        let stlm = self.reader.read_u8()?;
        let st = (stlm >> 4) & 0x3;
        let sp = (stlm >> 6) & 0x1;
        if st == 3 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let entry_size = st as usize + (sp as usize + 1) * 2;
        if (size - 2) % entry_size != 0 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        for _ in 0..(size - 2) / entry_size {
            let tile = match st {
                0 => None,
                1 => Some(self.reader.read_u8()? as u16),
                _ => Some(self.reader.read_u16()?),
            };
            let length = if sp == 1 {
                self.reader.read_u32()?
            } else {
                self.reader.read_u16()? as u32
            };
            self.index.tlm_entries.push(TlmEntry { tile, length });
        }
        Ok(())
    }

    fn read_plm(&mut self, size: usize) -> Result<(), J2kError> {
        // The packet-length side-table is not needed for sequential
        // decoding; skip the payload.
        if size < 1 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let zplm = self.reader.read_u8()?;
        debug!("skipping PLM segment Zplm={zplm} ({} bytes)", size - 1);
        self.reader.skip(size - 1)
    }

    fn read_plt(&mut self, size: usize) -> Result<(), J2kError> {
        if size < 1 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let _zplt = self.reader.read_u8()?;
        let mut value: u32 = 0;
        let mut lengths = Vec::new();
        for _ in 0..size - 1 {
            let b = self.reader.read_u8()?;
            value = (value << 7) | (b & 0x7F) as u32;
            if b & 0x80 == 0 {
                lengths.push(value);
                value = 0;
            }
        }
        if value != 0 {
            warn!("PLT segment ends inside a packet length, dropping the partial value");
        }
        if let Some(entry) = self.index.tiles.get_mut(self.current_tile as usize) {
            entry.packet_lengths.extend_from_slice(&lengths);
        }
        Ok(())
    }

    fn read_ppm(&mut self, size: usize) -> Result<(), J2kError> {
        if size < 1 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        self.cp.ppm = true;
        let zppm = self.reader.read_u8()? as usize;
        let chunk = self.reader.read_bytes(size - 1)?.to_vec();
        if self.cp.ppm_chunks.len() <= zppm {
            self.cp.ppm_chunks.resize(zppm + 1, None);
        }
        if self.cp.ppm_chunks[zppm].is_some() {
            warn!("duplicate PPM chunk Zppm={zppm}, replacing the previous one");
        }
        self.cp.ppm_chunks[zppm] = Some(chunk);
        Ok(())
    }

    /// Merges PPM chunks into one contiguous packed-header buffer at the
    /// end of the main header. Nppm records may span chunk boundaries.
    fn merge_ppm(&mut self) {
        if !self.cp.ppm {
            return;
        }
        let chunks = std::mem::take(&mut self.cp.ppm_chunks);
        let mut raw = Vec::new();
        for (z, chunk) in chunks.iter().enumerate() {
            match chunk {
                Some(bytes) => raw.extend_from_slice(bytes),
                None => warn!("missing PPM chunk Zppm={z}"),
            }
        }
        let mut pos = 0usize;
        while pos + 4 <= raw.len() {
            let nppm = u32::from_be_bytes([raw[pos], raw[pos + 1], raw[pos + 2], raw[pos + 3]])
                as usize;
            pos += 4;
            if pos + nppm > raw.len() {
                warn!("truncated PPM record (Nppm={nppm}), keeping the remainder as-is");
                self.cp.ppm_buffer.extend_from_slice(&raw[pos..]);
                return;
            }
            self.cp.ppm_buffer.extend_from_slice(&raw[pos..pos + nppm]);
            pos += nppm;
        }
        if pos < raw.len() {
            warn!("{} trailing bytes after the last PPM record", raw.len() - pos);
        }
    }

    fn read_ppt(&mut self, size: usize) -> Result<(), J2kError> {
        if self.cp.ppm {
            return Err(J2kError::PpmPptConflict);
        }
        if size < 1 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let zppt = self.reader.read_u8()? as usize;
        let chunk = self.reader.read_bytes(size - 1)?.to_vec();
        let tcp = &mut self.cp.tcps[self.current_tile as usize];
        tcp.ppt = true;
        if tcp.ppt_chunks.len() <= zppt {
            tcp.ppt_chunks.resize(zppt + 1, None);
        }
        if tcp.ppt_chunks[zppt].is_some() {
            warn!("duplicate PPT chunk Zppt={zppt}, replacing the previous one");
        }
        tcp.ppt_chunks[zppt] = Some(chunk);
        Ok(())
    }

    fn read_crg(&mut self, size: usize) -> Result<(), J2kError> {
        if size != 4 * self.image.comps.len() {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        for compno in 0..self.image.comps.len() {
            let xcrg = self.reader.read_u16()?;
            let ycrg = self.reader.read_u16()?;
            debug!("CRG component {compno}: offset ({xcrg}, {ycrg}) / 65536");
        }
        Ok(())
    }

    fn read_com(&mut self, size: usize) -> Result<(), J2kError> {
        if size < 2 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let rcom = self.reader.read_u16()?;
        let data = self.reader.read_bytes(size - 2)?;
        if rcom == 1 {
            // Latin-1 text.
            let text: String = data.iter().map(|&b| b as char).collect();
            debug!("COM: {text}");
            self.cp.comment = Some(text);
        } else {
            debug!("COM: {} bytes of binary data (Rcom={rcom})", data.len());
        }
        Ok(())
    }

    fn read_cap(&mut self, size: usize) -> Result<(), J2kError> {
        if size < 4 || (size - 4) % 2 != 0 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let pcap = self.reader.read_u32()?;
        let count = (size - 4) / 2;
        if count != pcap.count_ones() as usize {
            warn!("CAP declares {} capability bits but carries {count} Ccap values", pcap.count_ones());
        }
        let mut ccap = Vec::with_capacity(count);
        for _ in 0..count {
            ccap.push(self.reader.read_u16()?);
        }
        self.cp.cap_pcap = pcap;
        self.cp.cap_ccap = ccap;
        Ok(())
    }

    fn read_cbd(&mut self, size: usize) -> Result<(), J2kError> {
        if size < 2 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let ncbd = self.reader.read_u16()? as usize;
        if ncbd != self.image.comps.len() || size != 2 + ncbd {
            return Err(J2kError::InvalidComponentCount);
        }
        for compno in 0..ncbd {
            let b = self.reader.read_u8()?;
            let comp = &mut self.image.comps[compno];
            comp.prec = (b & 0x7F) + 1;
            comp.signed = b & 0x80 != 0;
        }
        Ok(())
    }

    fn read_mct(&mut self, size: usize) -> Result<(), J2kError> {
        if size < 6 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let zmct = self.reader.read_u16()?;
        if zmct != 0 {
            warn!("MCT data split over multiple segments is not supported, skipping");
            return self.reader.skip(size - 2);
        }
        let imct = self.reader.read_u16()?;
        let array_type = MctArrayType::try_from(((imct >> 8) & 0x3) as u8)
            .map_err(|_| J2kError::InvalidMctRecord)?;
        let element_type = MctElementType::try_from(((imct >> 10) & 0x3) as u8)
            .map_err(|_| J2kError::InvalidMctRecord)?;
        let ymct = self.reader.read_u16()?;
        if ymct != 0 {
            warn!("multi-part MCT arrays are not supported, skipping");
            return self.reader.skip(size - 6);
        }
        let data = self.reader.read_bytes(size - 6)?.to_vec();
        let record = MctRecord {
            index: (imct & 0xFF) as u8,
            array_type,
            element_type,
            data,
        };
        let in_tph = self.state.contains(DecoderState::TPH);
        let tcp = if in_tph {
            &mut self.cp.tcps[self.current_tile as usize]
        } else {
            &mut self.default_tcp
        };
        if let Some(pos) = tcp.mct_record_position(record.index) {
            tcp.mct_records[pos] = record;
        } else {
            tcp.mct_records.push(record);
        }
        Ok(())
    }

    fn read_mcc(&mut self, size: usize) -> Result<(), J2kError> {
        let end = self.reader.position() + size;
        if size < 7 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let zmcc = self.reader.read_u16()?;
        if zmcc != 0 {
            warn!("MCC split over multiple segments is not supported, skipping");
            return self.reader.skip(end - self.reader.position());
        }
        let imcc = self.reader.read_u8()?;
        let ymcc = self.reader.read_u16()?;
        if ymcc != 0 {
            warn!("multi-part MCC is not supported, skipping");
            return self.reader.skip(end - self.reader.position());
        }
        let qmcc = self.reader.read_u16()?;
        let mut record = MccRecord {
            index: imcc,
            ..Default::default()
        };
        for _ in 0..qmcc {
            let xmcci = self.reader.read_u8()?;
            if xmcci & 0x7F != 1 {
                return Err(J2kError::InvalidMctRecord);
            }
            let nmcci = self.reader.read_u16()?;
            let wide_inputs = nmcci & 0x8000 != 0;
            for _ in 0..nmcci & 0x7FFF {
                let c = if wide_inputs {
                    self.reader.read_u16()?
                } else {
                    self.reader.read_u8()? as u16
                };
                record.input_comps.push(c);
            }
            let mmcci = self.reader.read_u16()?;
            let wide_outputs = mmcci & 0x8000 != 0;
            for _ in 0..mmcci & 0x7FFF {
                let c = if wide_outputs {
                    self.reader.read_u16()?
                } else {
                    self.reader.read_u8()? as u16
                };
                record.output_comps.push(c);
            }
            let tmcc_hi = self.reader.read_u8()? as u32;
            let tmcc_lo = self.reader.read_u16()? as u32;
            let tmcc = (tmcc_hi << 16) | tmcc_lo;
            record.is_irreversible = tmcc & 0x0001_0000 == 0;
            let decorrelation_index = (tmcc & 0xFF) as u8;
            let offset_index = ((tmcc >> 8) & 0xFF) as u8;
            let in_tph = self.state.contains(DecoderState::TPH);
            let tcp = if in_tph {
                &mut self.cp.tcps[self.current_tile as usize]
            } else {
                &mut self.default_tcp
            };
            record.decorrelation_mct = tcp.mct_record_position(decorrelation_index);
            if record.decorrelation_mct.is_none() {
                warn!("MCC references unknown MCT record {decorrelation_index}");
            }
            if offset_index != 0 {
                record.offset_mct = tcp.mct_record_position(offset_index);
                if record.offset_mct.is_none() {
                    warn!("MCC references unknown MCT offset record {offset_index}");
                }
            }
        }
        let in_tph = self.state.contains(DecoderState::TPH);
        let tcp = if in_tph {
            &mut self.cp.tcps[self.current_tile as usize]
        } else {
            &mut self.default_tcp
        };
        if let Some(pos) = tcp.mcc_records.iter().position(|r| r.index == imcc) {
            tcp.mcc_records[pos] = record;
        } else {
            tcp.mcc_records.push(record);
        }
        Ok(())
    }

    fn read_mco(&mut self, size: usize) -> Result<(), J2kError> {
        if size < 1 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let nmco = self.reader.read_u8()? as usize;
        if size != 1 + nmco {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let mut stages = Vec::with_capacity(nmco);
        for _ in 0..nmco {
            stages.push(self.reader.read_u8()?);
        }
        if nmco > 1 {
            // Single-stage only: keep the first stage, drop the rest.
            warn!("MCO declares {nmco} transform stages; only the first is applied");
            stages.truncate(1);
        }
        let in_tph = self.state.contains(DecoderState::TPH);
        let tcp = if in_tph {
            &mut self.cp.tcps[self.current_tile as usize]
        } else {
            &mut self.default_tcp
        };
        for &stage in &stages {
            if tcp.mcc_record(stage).is_none() {
                warn!("MCO references unknown MCC record {stage}");
            }
        }
        tcp.mco = stages;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal main header: SOC, SIZ (one 8-bit component, 256x256, single
    /// tile), COD, QCD, followed by a SOT stub.
    fn main_header_bytes() -> Vec<u8> {
        let mut data = vec![
            0xFF, 0x4F, // SOC
            0xFF, 0x51, // SIZ
            0x00, 0x29, // Lsiz = 41
            0x00, 0x00, // Rsiz
            0x00, 0x00, 0x01, 0x00, // Xsiz = 256
            0x00, 0x00, 0x01, 0x00, // Ysiz = 256
            0x00, 0x00, 0x00, 0x00, // XOsiz
            0x00, 0x00, 0x00, 0x00, // YOsiz
            0x00, 0x00, 0x01, 0x00, // XTsiz = 256
            0x00, 0x00, 0x01, 0x00, // YTsiz = 256
            0x00, 0x00, 0x00, 0x00, // XTOsiz
            0x00, 0x00, 0x00, 0x00, // YTOsiz
            0x00, 0x01, // Csiz = 1
            0x07, 0x01, 0x01, // 8-bit unsigned, no subsampling
        ];
        data.extend_from_slice(&[
            0xFF, 0x52, // COD
            0x00, 0x0C, // Lcod = 12
            0x00, // Scod
            0x00, // LRCP
            0x00, 0x01, // one layer
            0x00, // no MCT
            0x05, // 5 decomposition levels
            0x04, 0x04, // 64x64 code-blocks
            0x00, // code-block style
            0x01, // 5-3 reversible
        ]);
        data.extend_from_slice(&[
            0xFF, 0x5C, // QCD
            0x00, 0x13, // Lqcd = 19: Sqcd + 16 subband exponents
            0x40, // no quantization, 2 guard bits
        ]);
        for _ in 0..16 {
            data.push(0x48); // exponent 9
        }
        data
    }

    fn with_sot(mut data: Vec<u8>) -> Vec<u8> {
        data.extend_from_slice(&[
            0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x01,
        ]);
        data
    }

    #[test]
    fn test_read_header() {
        let data = with_sot(main_header_bytes());
        let mut decoder = J2kDecoder::new(&data, DecoderParams::default());
        let image = decoder.read_header().unwrap();
        assert_eq!(image.width(), 256);
        assert_eq!(image.height(), 256);
        assert_eq!(image.comps.len(), 1);
        assert_eq!(image.comps[0].prec, 8);
        assert_eq!(decoder.coding_parameters().num_tiles(), 1);
        assert_eq!(decoder.state(), DecoderState::TPH_SOT);
        let tccp = &decoder.default_tcp.tccps[0];
        assert_eq!(tccp.numresolutions, 6);
        assert_eq!(tccp.cblkw, 6);
        assert_eq!(tccp.cblkh, 6);
        assert_eq!(tccp.qntsty, QuantizationStyle::None);
        assert_eq!(tccp.stepsizes.len(), 16);
        assert_eq!(tccp.stepsizes[0].expn, 9);
    }

    #[test]
    fn test_missing_qcd_rejected() {
        // Header with COD but no QCD.
        let mut data = main_header_bytes();
        // Remove the QCD segment: marker (2) + Lqcd (19).
        data.truncate(data.len() - 21);
        let data = with_sot(data);
        let mut decoder = J2kDecoder::new(&data, DecoderParams::default());
        assert_eq!(
            decoder.read_header().unwrap_err(),
            J2kError::RequiredMarkerMissing
        );
    }

    #[test]
    fn test_siz_must_come_first() {
        let data = vec![
            0xFF, 0x4F, // SOC
            0xFF, 0x64, // COM instead of SIZ
            0x00, 0x04, 0x00, 0x01,
        ];
        let mut decoder = J2kDecoder::new(&data, DecoderParams::default());
        assert_eq!(decoder.read_header().unwrap_err(), J2kError::MarkerNotAllowed);
    }

    #[test]
    fn test_soc_required() {
        let data = vec![0xFF, 0x51, 0x00, 0x00];
        let mut decoder = J2kDecoder::new(&data, DecoderParams::default());
        assert_eq!(decoder.read_header().unwrap_err(), J2kError::SocNotFound);
    }

    #[test]
    fn test_poc_entries_accumulate() {
        let mut data = main_header_bytes();
        // Two POC segments with one entry each.
        for _ in 0..2 {
            data.extend_from_slice(&[
                0xFF, 0x5F, // POC
                0x00, 0x09, // Lpoc = 9
                0x00, // RSpoc
                0x00, // CSpoc
                0x00, 0x01, // LYEpoc = 1
                0x05, // REpoc
                0x01, // CEpoc
                0x00, // LRCP
            ]);
        }
        let data = with_sot(data);
        let mut decoder = J2kDecoder::new(&data, DecoderParams::default());
        decoder.read_header().unwrap();
        assert_eq!(decoder.default_tcp.pocs.len(), 2);
    }

    #[test]
    fn test_unknown_marker_recovery() {
        let mut data = main_header_bytes();
        // A bogus marker word in the main header; the scanner should
        // resynchronize on the following COM segment.
        data.extend_from_slice(&[0xFF, 0x01]);
        data.extend_from_slice(&[0xFF, 0x64, 0x00, 0x06, 0x00, 0x01, 0x68, 0x69]);
        let data = with_sot(data);
        let mut decoder = J2kDecoder::new(&data, DecoderParams::default());
        decoder.read_header().unwrap();
        assert_eq!(decoder.coding_parameters().comment.as_deref(), Some("hi"));
    }

    #[test]
    fn test_component_count_bounds() {
        // SIZ declaring Csiz = 16384 must be rejected.
        let mut data = vec![
            0xFF, 0x4F, 0xFF, 0x51, 0x00, 0x29, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
            0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        data.extend_from_slice(&[0x40, 0x00]); // Csiz = 16384
        data.extend_from_slice(&[0x07, 0x01, 0x01]);
        let mut decoder = J2kDecoder::new(&data, DecoderParams::default());
        assert_eq!(
            decoder.read_header().unwrap_err(),
            J2kError::InvalidComponentCount
        );
    }
}

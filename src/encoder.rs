//! Codestream encoding: two-pass marker emission.
//!
//! The encoder serializes the main header from `CodingParameters` built at
//! setup, then walks the tile grid: each tile's payload is produced by the
//! `TileCoder` first, so the tile-part header (including PLT side-tables)
//! can be written with known lengths; the SOT Psot field is still patched
//! afterwards since the header size itself varies. A TLM side-table, when
//! requested, is reserved in the main header with zeroed lengths and
//! patched once every tile-part has been written.

use std::ops::Range;

use log::{debug, warn};

use crate::constants::{
    MAX_CODEBLOCK_AREA_EXPONENT, MAX_CODEBLOCK_EXPONENT, MAX_POC_ENTRIES, MAX_RESOLUTIONS,
    MAX_SEGMENT_SIZE, MAX_TILE_COUNT, MIN_CODEBLOCK_EXPONENT, SOT_MARKER_TOTAL_SIZE,
    SOT_PSOT_OFFSET, SOT_SEGMENT_LENGTH,
};
use crate::error::J2kError;
use crate::image::Image;
use crate::markers::MarkerCode;
use crate::params::{
    CodingParameters, CodingStyle, CompressionParameters, QuantizationStyle, StepSize,
    TileCodingParams, TileComponentParams,
};
use crate::profile::validate_profile;
use crate::stream::{CodestreamWriter, SegmentBuffer};
use crate::tile::{EncodedTile, TileCoder};

/// Subband log2 gain for the reversible 5-3 filter, by band order within a
/// resolution level (LL, then HL/LH/HH triplets).
fn band_gain(band: usize) -> u8 {
    if band == 0 {
        return 0;
    }
    match (band - 1) % 3 {
        0 | 1 => 1,
        _ => 2,
    }
}

#[derive(Debug)]
pub struct J2kEncoder<'i> {
    cp: CodingParameters,
    image: &'i Image,
    write_tlm: bool,
    write_plt: bool,
    /// Offsets of the zeroed Ptlm fields, one per tile-part, in SOT order.
    tlm_length_offsets: Vec<usize>,
}

impl<'i> J2kEncoder<'i> {
    /// Validates the requested parameters and builds the coding-parameter
    /// model the markers are serialized from.
    pub fn new(params: &CompressionParameters, image: &'i Image) -> Result<Self, J2kError> {
        image.validate()?;
        if params.numlayers == 0 {
            return Err(J2kError::InvalidLayerCount);
        }
        if params.numresolution == 0 || params.numresolution > MAX_RESOLUTIONS {
            return Err(J2kError::InvalidResolutionCount);
        }
        if params.cblkw < MIN_CODEBLOCK_EXPONENT
            || params.cblkw > MAX_CODEBLOCK_EXPONENT
            || params.cblkh < MIN_CODEBLOCK_EXPONENT
            || params.cblkh > MAX_CODEBLOCK_EXPONENT
            || params.cblkw + params.cblkh > MAX_CODEBLOCK_AREA_EXPONENT
        {
            return Err(J2kError::InvalidCodeblockSize);
        }
        if params.pocs.len() >= MAX_POC_ENTRIES {
            return Err(J2kError::TooManyPocEntries);
        }
        for poc in &params.pocs {
            if poc.layno1 == 0
                || poc.resno1 <= poc.resno0
                || poc.resno1 > params.numresolution
                || poc.compno1 as usize > image.comps.len()
            {
                return Err(J2kError::InvalidArgument);
            }
        }
        let rsiz = validate_profile(params, image);

        let mut cp = CodingParameters {
            rsiz,
            ..Default::default()
        };
        if params.tile_size_on {
            if params.tdx == 0 || params.tdy == 0 {
                return Err(J2kError::InvalidTileGrid);
            }
            if params.tx0 > image.x0
                || params.ty0 > image.y0
                || params.tx0 as u64 + params.tdx as u64 <= image.x0 as u64
                || params.ty0 as u64 + params.tdy as u64 <= image.y0 as u64
            {
                return Err(J2kError::InvalidTileGrid);
            }
            cp.tx0 = params.tx0;
            cp.ty0 = params.ty0;
            cp.tdx = params.tdx;
            cp.tdy = params.tdy;
        } else {
            cp.tx0 = image.x0;
            cp.ty0 = image.y0;
            cp.tdx = image.x1 - image.x0;
            cp.tdy = image.y1 - image.y0;
        }
        cp.tw = (image.x1 - cp.tx0).div_ceil(cp.tdx);
        cp.th = (image.y1 - cp.ty0).div_ceil(cp.tdy);
        if cp.tw as u64 * cp.th as u64 > MAX_TILE_COUNT as u64 {
            return Err(J2kError::InvalidTileGrid);
        }
        cp.comment = params.comment.clone();

        let tccp_template = Self::build_tccp_template(params)?;
        let mut tcp = TileCodingParams {
            csty: params.csty,
            prg: params.prog_order,
            numlayers: params.numlayers,
            mct: params.mct,
            rates: params.rates.clone(),
            distortions: params.distortions.clone(),
            // Each progression change gets its own tile-part.
            n_tile_parts: 1 + params.pocs.len() as u8,
            ..Default::default()
        };
        tcp.add_pocs(&params.pocs)?;
        tcp.tccps = (0..image.comps.len())
            .map(|compno| {
                let mut tccp = tccp_template.clone();
                if params.roi_compno == Some(compno as u16) {
                    tccp.roishift = params.roi_shift;
                }
                Self::apply_default_quantization(&mut tccp, image.comps[compno].prec);
                tccp
            })
            .collect();
        cp.tcps = vec![tcp; (cp.tw * cp.th) as usize];

        Ok(Self {
            cp,
            image,
            write_tlm: params.write_tlm,
            write_plt: params.write_plt,
            tlm_length_offsets: Vec::new(),
        })
    }

    fn build_tccp_template(params: &CompressionParameters) -> Result<TileComponentParams, J2kError> {
        let numres = params.numresolution as usize;
        let mut tccp = TileComponentParams {
            numresolutions: params.numresolution,
            cblkw: params.cblkw,
            cblkh: params.cblkh,
            cblksty: params.cblksty,
            qmfbid: if params.irreversible { 0 } else { 1 },
            numgbits: params.numgbits,
            ..Default::default()
        };
        if params.csty.contains(CodingStyle::PRECINCTS) {
            if params.precinct_w.is_empty() || params.precinct_w.len() != params.precinct_h.len() {
                return Err(J2kError::InvalidPrecinctSize);
            }
            tccp.csty = CodingStyle::PRECINCTS;
            // The last supplied pair repeats for any remaining levels.
            for level in 0..numres {
                let i = level.min(params.precinct_w.len() - 1);
                let (w, h) = (params.precinct_w[i], params.precinct_h[i]);
                if w > 15 || h > 15 || (level > 0 && (w == 0 || h == 0)) {
                    return Err(J2kError::InvalidPrecinctSize);
                }
                tccp.prcw.push(w);
                tccp.prch.push(h);
            }
        } else {
            tccp.prcw = vec![15; numres];
            tccp.prch = vec![15; numres];
        }
        Ok(tccp)
    }

    /// Fills in the default step sizes: exponent tracks the component
    /// precision plus the subband gain, mantissa zero.
    fn apply_default_quantization(tccp: &mut TileComponentParams, prec: u8) {
        tccp.qntsty = if tccp.qmfbid == 1 {
            QuantizationStyle::None
        } else {
            QuantizationStyle::ScalarExpounded
        };
        tccp.stepsizes = (0..tccp.band_count())
            .map(|b| StepSize {
                expn: (prec + band_gain(b)).min(31),
                mant: 0,
            })
            .collect();
    }

    pub fn coding_parameters(&self) -> &CodingParameters {
        &self.cp
    }

    /// Writes the complete codestream into `destination` and returns the
    /// number of bytes produced.
    pub fn encode<T: TileCoder>(
        &mut self,
        coder: &mut T,
        destination: &mut [u8],
    ) -> Result<usize, J2kError> {
        let mut writer = CodestreamWriter::new(destination);
        let mut seg = SegmentBuffer::new();
        self.tlm_length_offsets.clear();

        writer.write_u16(MarkerCode::Soc as u16)?;
        self.write_siz(&mut seg, &mut writer)?;
        self.write_cod(&mut seg, &mut writer)?;
        self.write_qcd(&mut seg, &mut writer)?;
        for compno in 1..self.image.comps.len() {
            if self.cp.tcps[0].tccps[compno].coding_differs(&self.cp.tcps[0].tccps[0]) {
                self.write_coc(&mut seg, &mut writer, compno)?;
            }
        }
        for compno in 1..self.image.comps.len() {
            if self.cp.tcps[0].tccps[compno].quantization_differs(&self.cp.tcps[0].tccps[0]) {
                self.write_qcc(&mut seg, &mut writer, compno)?;
            }
        }
        if !self.cp.tcps[0].pocs.is_empty() {
            self.write_poc(&mut seg, &mut writer)?;
        }
        for compno in 0..self.image.comps.len() {
            if self.cp.tcps[0].tccps[compno].roishift != 0 {
                self.write_rgn(&mut seg, &mut writer, compno)?;
            }
        }
        if self.write_tlm {
            self.reserve_tlm(&mut seg, &mut writer)?;
        }
        if let Some(comment) = self.cp.comment.clone() {
            self.write_com(&mut seg, &mut writer, &comment)?;
        }

        let mut tlm_lengths = Vec::with_capacity(self.cp.num_tiles() as usize);
        for tile in 0..self.cp.num_tiles() as u16 {
            let psots = self.write_tile_parts(&mut seg, &mut writer, coder, tile)?;
            tlm_lengths.extend(psots);
        }
        writer.write_u16(MarkerCode::Eoc as u16)?;

        if self.write_tlm {
            for (offset, length) in self.tlm_length_offsets.iter().zip(&tlm_lengths) {
                writer.patch_u32_at(*offset, *length)?;
            }
        }
        debug!("encoded {} tiles in {} bytes", self.cp.num_tiles(), writer.len());
        Ok(writer.len())
    }

    // ------------------------------------------------------------------
    // Marker segment writers. Each stages the segment, patches its length
    // field, and commits it whole.

    fn begin_marker(seg: &mut SegmentBuffer, code: MarkerCode) {
        seg.begin(32);
        seg.write_u16(code as u16);
        seg.write_u16(0); // length, patched in end_marker
    }

    fn end_marker(seg: &mut SegmentBuffer, writer: &mut CodestreamWriter<'_>) -> Result<(), J2kError> {
        let length = seg.len() - 2;
        if length > MAX_SEGMENT_SIZE {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        seg.patch_u16_at(2, length as u16)?;
        seg.commit(writer)
    }

    fn write_siz(
        &self,
        seg: &mut SegmentBuffer,
        writer: &mut CodestreamWriter<'_>,
    ) -> Result<(), J2kError> {
        Self::begin_marker(seg, MarkerCode::Siz);
        seg.write_u16(self.cp.rsiz);
        seg.write_u32(self.image.x1);
        seg.write_u32(self.image.y1);
        seg.write_u32(self.image.x0);
        seg.write_u32(self.image.y0);
        seg.write_u32(self.cp.tdx);
        seg.write_u32(self.cp.tdy);
        seg.write_u32(self.cp.tx0);
        seg.write_u32(self.cp.ty0);
        seg.write_u16(self.image.comps.len() as u16);
        for comp in &self.image.comps {
            let mut ssiz = comp.prec - 1;
            if comp.signed {
                ssiz |= 0x80;
            }
            seg.write_u8(ssiz);
            seg.write_u8(comp.dx as u8);
            seg.write_u8(comp.dy as u8);
        }
        Self::end_marker(seg, writer)
    }

    fn write_spcod(seg: &mut SegmentBuffer, tccp: &TileComponentParams) {
        seg.write_u8(tccp.numresolutions - 1);
        seg.write_u8(tccp.cblkw - 2);
        seg.write_u8(tccp.cblkh - 2);
        seg.write_u8(tccp.cblksty.bits());
        seg.write_u8(tccp.qmfbid);
        if tccp.csty.contains(CodingStyle::PRECINCTS) {
            for level in 0..tccp.numresolutions as usize {
                seg.write_u8((tccp.prch[level] << 4) | tccp.prcw[level]);
            }
        }
    }

    fn write_cod(
        &self,
        seg: &mut SegmentBuffer,
        writer: &mut CodestreamWriter<'_>,
    ) -> Result<(), J2kError> {
        let tcp = &self.cp.tcps[0];
        let tccp = &tcp.tccps[0];
        Self::begin_marker(seg, MarkerCode::Cod);
        seg.write_u8((tcp.csty | tccp.csty).bits());
        seg.write_u8(tcp.prg as u8);
        seg.write_u16(tcp.numlayers);
        seg.write_u8(tcp.mct);
        Self::write_spcod(seg, tccp);
        Self::end_marker(seg, writer)
    }

    fn write_component_index(&self, seg: &mut SegmentBuffer, compno: usize) {
        if self.image.comps.len() <= 256 {
            seg.write_u8(compno as u8);
        } else {
            seg.write_u16(compno as u16);
        }
    }

    fn write_coc(
        &self,
        seg: &mut SegmentBuffer,
        writer: &mut CodestreamWriter<'_>,
        compno: usize,
    ) -> Result<(), J2kError> {
        let tccp = &self.cp.tcps[0].tccps[compno];
        Self::begin_marker(seg, MarkerCode::Coc);
        self.write_component_index(seg, compno);
        seg.write_u8(tccp.csty.bits());
        Self::write_spcod(seg, tccp);
        Self::end_marker(seg, writer)
    }

    fn write_sqcd(seg: &mut SegmentBuffer, tccp: &TileComponentParams) {
        seg.write_u8(tccp.qntsty as u8 | (tccp.numgbits << 5));
        match tccp.qntsty {
            QuantizationStyle::None => {
                for step in &tccp.stepsizes {
                    seg.write_u8(step.expn << 3);
                }
            }
            QuantizationStyle::ScalarDerived => {
                let step = tccp.stepsizes.first().copied().unwrap_or_default();
                seg.write_u16(((step.expn as u16) << 11) | step.mant);
            }
            QuantizationStyle::ScalarExpounded => {
                for step in &tccp.stepsizes {
                    seg.write_u16(((step.expn as u16) << 11) | step.mant);
                }
            }
        }
    }

    fn write_qcd(
        &self,
        seg: &mut SegmentBuffer,
        writer: &mut CodestreamWriter<'_>,
    ) -> Result<(), J2kError> {
        Self::begin_marker(seg, MarkerCode::Qcd);
        Self::write_sqcd(seg, &self.cp.tcps[0].tccps[0]);
        Self::end_marker(seg, writer)
    }

    fn write_qcc(
        &self,
        seg: &mut SegmentBuffer,
        writer: &mut CodestreamWriter<'_>,
        compno: usize,
    ) -> Result<(), J2kError> {
        Self::begin_marker(seg, MarkerCode::Qcc);
        self.write_component_index(seg, compno);
        Self::write_sqcd(seg, &self.cp.tcps[0].tccps[compno]);
        Self::end_marker(seg, writer)
    }

    fn write_poc(
        &self,
        seg: &mut SegmentBuffer,
        writer: &mut CodestreamWriter<'_>,
    ) -> Result<(), J2kError> {
        let wide = self.image.comps.len() > 256;
        Self::begin_marker(seg, MarkerCode::Poc);
        for poc in &self.cp.tcps[0].pocs {
            seg.write_u8(poc.resno0);
            if wide {
                seg.write_u16(poc.compno0);
            } else {
                seg.write_u8(poc.compno0 as u8);
            }
            seg.write_u16(poc.layno1);
            seg.write_u8(poc.resno1);
            if wide {
                seg.write_u16(poc.compno1);
            } else {
                seg.write_u8(poc.compno1 as u8);
            }
            seg.write_u8(poc.order as u8);
        }
        Self::end_marker(seg, writer)
    }

    fn write_rgn(
        &self,
        seg: &mut SegmentBuffer,
        writer: &mut CodestreamWriter<'_>,
        compno: usize,
    ) -> Result<(), J2kError> {
        Self::begin_marker(seg, MarkerCode::Rgn);
        self.write_component_index(seg, compno);
        seg.write_u8(0); // Srgn: implicit ROI
        seg.write_u8(self.cp.tcps[0].tccps[compno].roishift);
        Self::end_marker(seg, writer)
    }

    fn write_com(
        &self,
        seg: &mut SegmentBuffer,
        writer: &mut CodestreamWriter<'_>,
        comment: &str,
    ) -> Result<(), J2kError> {
        Self::begin_marker(seg, MarkerCode::Com);
        seg.write_u16(1); // Rcom: Latin-1 text
        // Non-Latin-1 characters degrade to '?' rather than shifting the
        // segment size unpredictably.
        for ch in comment.chars() {
            seg.write_u8(if (ch as u32) < 256 { ch as u8 } else { b'?' });
        }
        Self::end_marker(seg, writer)
    }

    /// Writes the TLM segment with real tile indices and zeroed lengths,
    /// remembering where each Ptlm lives for the final patch pass.
    fn reserve_tlm(
        &mut self,
        seg: &mut SegmentBuffer,
        writer: &mut CodestreamWriter<'_>,
    ) -> Result<(), J2kError> {
        let num_tiles = self.cp.num_tiles() as usize;
        let parts_per_tile = self.cp.tcps[0].n_tile_parts.max(1) as usize;
        let entries = num_tiles * parts_per_tile;
        let st: u8 = if num_tiles <= 256 { 1 } else { 2 };
        let entry_size = st as usize + 4;
        if 4 + entries * entry_size > MAX_SEGMENT_SIZE {
            warn!("TLM for {entries} tile-parts does not fit in one segment, skipping the side-table");
            self.write_tlm = false;
            return Ok(());
        }
        let base = writer.position() + 6; // marker + length + Ztlm + Stlm
        Self::begin_marker(seg, MarkerCode::Tlm);
        seg.write_u8(0); // Ztlm
        seg.write_u8((1 << 6) | (st << 4)); // Stlm: SP=1 (32-bit lengths)
        let mut entry = 0;
        for tile in 0..num_tiles {
            for _ in 0..parts_per_tile {
                if st == 1 {
                    seg.write_u8(tile as u8);
                } else {
                    seg.write_u16(tile as u16);
                }
                self.tlm_length_offsets
                    .push(base + entry * entry_size + st as usize);
                seg.write_u32(0); // Ptlm, patched after the tile-parts
                entry += 1;
            }
        }
        Self::end_marker(seg, writer)
    }

    /// Encodes one tile and writes its tile-parts: one by default, one per
    /// progression change when the tile carries POC entries. Returns the
    /// patched Psot of each part, in TPsot order.
    fn write_tile_parts<T: TileCoder>(
        &mut self,
        seg: &mut SegmentBuffer,
        writer: &mut CodestreamWriter<'_>,
        coder: &mut T,
        tile: u16,
    ) -> Result<Vec<u32>, J2kError> {
        coder.init_encode_tile(tile)?;
        let n_parts = self.cp.tcps[tile as usize].n_tile_parts.max(1) as usize;
        // Leave room for every tile-part header and the trailing EOC.
        let budget = writer
            .bytes_left()
            .saturating_sub(n_parts * (SOT_MARKER_TOTAL_SIZE + 2) + 2);
        let encoded = coder.encode_tile(tile, &self.cp, self.image, budget)?;

        let parts = split_tile_parts(&encoded, n_parts);
        let mut psots = Vec::with_capacity(n_parts);
        for (tpsot, (range, lengths)) in parts.into_iter().enumerate() {
            let sot_start = writer.position();
            writer.write_u16(MarkerCode::Sot as u16)?;
            writer.write_u16(SOT_SEGMENT_LENGTH)?;
            writer.write_u16(tile)?;
            writer.write_u32(0)?; // Psot, patched below
            writer.write_u8(tpsot as u8)?;
            writer.write_u8(n_parts as u8)?;

            if self.write_plt && !lengths.is_empty() {
                self.write_plt_segments(seg, writer, lengths)?;
            }
            writer.write_u16(MarkerCode::Sod as u16)?;
            writer.write_bytes(&encoded.data[range])?;

            let psot = (writer.position() - sot_start) as u32;
            writer.patch_u32_at(sot_start + SOT_PSOT_OFFSET, psot)?;
            psots.push(psot);
        }
        Ok(psots)
    }

    /// Emits packet lengths as base-128 varints, splitting into multiple
    /// PLT segments when one would overflow the 16-bit length field.
    fn write_plt_segments(
        &self,
        seg: &mut SegmentBuffer,
        writer: &mut CodestreamWriter<'_>,
        lengths: &[u32],
    ) -> Result<(), J2kError> {
        let max_payload = MAX_SEGMENT_SIZE - 3; // length field + Zplt
        let mut zplt: u8 = 0;
        let mut open = false;
        for &length in lengths {
            let varint = encode_varint(length);
            if open && seg.len() - 5 + varint.len() > max_payload {
                Self::end_marker(seg, writer)?;
                open = false;
            }
            if !open {
                Self::begin_marker(seg, MarkerCode::Plt);
                seg.write_u8(zplt);
                zplt = zplt.wrapping_add(1);
                open = true;
            }
            seg.write_bytes(&varint);
        }
        if open {
            Self::end_marker(seg, writer)?;
        }
        Ok(())
    }
}

/// Splits an encoded tile into `n_parts` contiguous byte ranges whose
/// boundaries fall on packet boundaries, with each range's packet lengths
/// alongside. Packets are distributed as evenly as possible; when the coder
/// reports no packet lengths (or a report that does not cover the payload),
/// the first part carries everything and the remaining parts stay empty.
fn split_tile_parts(encoded: &EncodedTile, n_parts: usize) -> Vec<(Range<usize>, &[u32])> {
    let packets = &encoded.packet_lengths[..];
    let covered: usize = packets.iter().map(|&l| l as usize).sum();
    if n_parts <= 1 || packets.is_empty() || covered != encoded.data.len() {
        if n_parts > 1 && !packets.is_empty() && covered != encoded.data.len() {
            warn!(
                "packet lengths cover {covered} of {} payload bytes, keeping the payload in one tile-part",
                encoded.data.len()
            );
        }
        let end = encoded.data.len();
        let mut parts = vec![(0..end, packets)];
        parts.resize(n_parts.max(1), (end..end, &[][..]));
        return parts;
    }
    let base = packets.len() / n_parts;
    let rem = packets.len() % n_parts;
    let mut parts = Vec::with_capacity(n_parts);
    let mut packet_at = 0;
    let mut byte_at = 0;
    for i in 0..n_parts {
        let count = base + usize::from(i < rem);
        let group = &packets[packet_at..packet_at + count];
        let bytes: usize = group.iter().map(|&l| l as usize).sum();
        parts.push((byte_at..byte_at + bytes, group));
        packet_at += count;
        byte_at += bytes;
    }
    parts
}

/// MSB-first base-128 encoding with a continuation bit, as used by PLT and
/// PLM packet lengths.
fn encode_varint(value: u32) -> Vec<u8> {
    let mut groups = [0u8; 5];
    let mut n = 0;
    let mut v = value;
    loop {
        groups[n] = (v & 0x7F) as u8;
        n += 1;
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    let mut out = Vec::with_capacity(n);
    for i in (0..n).rev() {
        let mut b = groups[i];
        if i > 0 {
            b |= 0x80;
        }
        out.push(b);
    }
    out
}

//! The tile coder collaborator contract.
//!
//! The codestream core never inspects packet-internal bytes: a `TileCoder`
//! turns raw component samples into an opaque byte span of known length and
//! back. The real tier-1/tier-2 machinery plugs in here; `RawTileCoder`
//! ships as a reference implementation that stores samples verbatim and is
//! exercised by the round-trip tests.

use crate::error::J2kError;
use crate::image::{Image, ceil_div};
use crate::params::CodingParameters;

/// Result of encoding one tile's packet payload.
#[derive(Debug, Clone, Default)]
pub struct EncodedTile {
    /// The entropy-coded payload to place after SOD.
    pub data: Vec<u8>,
    /// Packet lengths in stream order, if the coder tracks them.
    /// Consumed by the encoder when PLT emission is enabled.
    pub packet_lengths: Vec<u32>,
}

pub trait TileCoder {
    fn init_encode_tile(&mut self, tile_index: u16) -> Result<(), J2kError>;

    /// Encodes one tile's payload within `max_bytes`. The core trusts the
    /// returned byte count.
    fn encode_tile(
        &mut self,
        tile_index: u16,
        cp: &CodingParameters,
        image: &Image,
        max_bytes: usize,
    ) -> Result<EncodedTile, J2kError>;

    fn init_decode_tile(&mut self, tile_index: u16) -> Result<(), J2kError>;

    /// Decodes one tile's accumulated payload into the output image.
    fn decode_tile(
        &mut self,
        tile_index: u16,
        cp: &CodingParameters,
        data: &[u8],
        image: &mut Image,
    ) -> Result<(), J2kError>;
}

/// Sample-grid bounds of one component within one tile: `(x0, y0, x1, y1)`
/// in component coordinates (B.3).
pub fn tile_component_bounds(
    cp: &CodingParameters,
    image: &Image,
    tile_index: u32,
    compno: usize,
) -> (u32, u32, u32, u32) {
    let (tx0, ty0, tx1, ty1) = cp.tile_bounds(image.x0, image.y0, image.x1, image.y1, tile_index);
    let comp = &image.comps[compno];
    (
        ceil_div(tx0, comp.dx),
        ceil_div(ty0, comp.dy),
        ceil_div(tx1, comp.dx),
        ceil_div(ty1, comp.dy),
    )
}

/// Stores component samples verbatim, four bytes per sample, tile by tile.
/// No wavelet transform, no entropy coding; the codestream around it is
/// still fully standard.
#[derive(Debug, Default)]
pub struct RawTileCoder;

impl TileCoder for RawTileCoder {
    fn init_encode_tile(&mut self, _tile_index: u16) -> Result<(), J2kError> {
        Ok(())
    }

    fn encode_tile(
        &mut self,
        tile_index: u16,
        cp: &CodingParameters,
        image: &Image,
        max_bytes: usize,
    ) -> Result<EncodedTile, J2kError> {
        let mut out = Vec::new();
        for compno in 0..image.comps.len() {
            let (cx0, cy0, cx1, cy1) = tile_component_bounds(cp, image, tile_index as u32, compno);
            let comp = &image.comps[compno];
            let data = comp.data.as_ref().ok_or(J2kError::InvalidOperation)?;
            let gx0 = ceil_div(image.x0, comp.dx);
            let gy0 = ceil_div(image.y0, comp.dy);
            let gw = image.comp_width(compno) as usize;
            for y in cy0..cy1 {
                for x in cx0..cx1 {
                    let idx = (y - gy0) as usize * gw + (x - gx0) as usize;
                    let sample = *data.get(idx).ok_or(J2kError::InvalidOperation)?;
                    out.extend_from_slice(&sample.to_be_bytes());
                }
            }
        }
        if out.len() > max_bytes {
            return Err(J2kError::DestinationTooSmall);
        }
        Ok(EncodedTile {
            data: out,
            packet_lengths: Vec::new(),
        })
    }

    fn init_decode_tile(&mut self, _tile_index: u16) -> Result<(), J2kError> {
        Ok(())
    }

    fn decode_tile(
        &mut self,
        tile_index: u16,
        cp: &CodingParameters,
        data: &[u8],
        image: &mut Image,
    ) -> Result<(), J2kError> {
        let mut cursor = 0usize;
        for compno in 0..image.comps.len() {
            let (cx0, cy0, cx1, cy1) = tile_component_bounds(cp, image, tile_index as u32, compno);
            let gx0 = ceil_div(image.x0, image.comps[compno].dx);
            let gy0 = ceil_div(image.y0, image.comps[compno].dy);
            let gw = image.comp_width(compno) as usize;
            let gh = image.comp_height(compno) as usize;
            let comp = &mut image.comps[compno];
            let buffer = comp.data.get_or_insert_with(|| vec![0; gw * gh]);
            for y in cy0..cy1 {
                for x in cx0..cx1 {
                    let bytes = data
                        .get(cursor..cursor + 4)
                        .ok_or(J2kError::UnexpectedEndOfStream)?;
                    cursor += 4;
                    let sample = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    let idx = (y - gy0) as usize * gw + (x - gx0) as usize;
                    buffer[idx] = sample;
                }
            }
        }
        Ok(())
    }
}

/// Discards payloads; useful for structural scans where only the marker
/// protocol matters.
#[derive(Debug, Default)]
pub struct NullTileCoder;

impl TileCoder for NullTileCoder {
    fn init_encode_tile(&mut self, _tile_index: u16) -> Result<(), J2kError> {
        Ok(())
    }

    fn encode_tile(
        &mut self,
        _tile_index: u16,
        _cp: &CodingParameters,
        _image: &Image,
        _max_bytes: usize,
    ) -> Result<EncodedTile, J2kError> {
        Ok(EncodedTile::default())
    }

    fn init_decode_tile(&mut self, _tile_index: u16) -> Result<(), J2kError> {
        Ok(())
    }

    fn decode_tile(
        &mut self,
        _tile_index: u16,
        _cp: &CodingParameters,
        _data: &[u8],
        _image: &mut Image,
    ) -> Result<(), J2kError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageComponent;

    fn test_image(w: u32, h: u32) -> Image {
        let data: Vec<i32> = (0..(w * h) as i32).collect();
        Image::new(
            0,
            0,
            w,
            h,
            vec![ImageComponent {
                dx: 1,
                dy: 1,
                prec: 8,
                data: Some(data),
                ..Default::default()
            }],
        )
        .unwrap()
    }

    fn grid(tdx: u32, tdy: u32, tw: u32, th: u32) -> CodingParameters {
        CodingParameters {
            tdx,
            tdy,
            tw,
            th,
            ..Default::default()
        }
    }

    #[test]
    fn test_tile_component_bounds() {
        let image = test_image(100, 100);
        let cp = grid(64, 64, 2, 2);
        assert_eq!(tile_component_bounds(&cp, &image, 0, 0), (0, 0, 64, 64));
        assert_eq!(tile_component_bounds(&cp, &image, 3, 0), (64, 64, 100, 100));
    }

    #[test]
    fn test_raw_coder_round_trip() {
        let image = test_image(16, 16);
        let cp = grid(8, 8, 2, 2);
        let mut coder = RawTileCoder;

        let mut decoded = image.clone();
        decoded.comps[0].data = None;

        for tile in 0..4u16 {
            let encoded = coder.encode_tile(tile, &cp, &image, usize::MAX).unwrap();
            assert_eq!(encoded.data.len(), 8 * 8 * 4);
            coder
                .decode_tile(tile, &cp, &encoded.data, &mut decoded)
                .unwrap();
        }
        assert_eq!(decoded.comps[0].data, image.comps[0].data);
    }

    #[test]
    fn test_raw_coder_budget() {
        let image = test_image(16, 16);
        let cp = grid(16, 16, 1, 1);
        let mut coder = RawTileCoder;
        assert_eq!(
            coder.encode_tile(0, &cp, &image, 10).unwrap_err(),
            J2kError::DestinationTooSmall
        );
    }
}

//! Codestream position index built while decoding.
//!
//! Records where every marker segment and tile-part lives in the byte
//! stream so a specific tile can be re-read without scanning from the top.

/// Location of one marker segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerRecord {
    /// The 2-byte marker code.
    pub code: u16,
    /// Byte offset of the marker code in the stream.
    pub offset: usize,
    /// Total segment length including the marker code.
    pub len: usize,
}

/// Byte span of one tile-part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TilePartSpan {
    /// Offset of the SOT marker code.
    pub start: usize,
    /// Offset of the first payload byte (after SOD).
    pub data_start: usize,
    /// Offset one past the last payload byte.
    pub end: usize,
}

/// One TLM side-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlmEntry {
    /// Tile index, if the table carries Ttlm fields.
    pub tile: Option<u16>,
    /// Tile-part length in bytes (Ptlm).
    pub length: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TileIndex {
    pub markers: Vec<MarkerRecord>,
    pub tile_parts: Vec<TilePartSpan>,
    /// Packet lengths reported by PLT segments for this tile.
    pub packet_lengths: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct CodestreamIndex {
    /// Offset of the SOC marker.
    pub main_header_start: usize,
    /// Offset one past the last main header byte (start of the first SOT).
    pub main_header_end: usize,
    pub main_markers: Vec<MarkerRecord>,
    pub tiles: Vec<TileIndex>,
    pub tlm_entries: Vec<TlmEntry>,
}

impl CodestreamIndex {
    pub fn new(num_tiles: usize) -> Self {
        Self {
            tiles: vec![TileIndex::default(); num_tiles],
            ..Default::default()
        }
    }

    pub fn add_main_marker(&mut self, code: u16, offset: usize, len: usize) {
        self.main_markers.push(MarkerRecord { code, offset, len });
    }

    pub fn add_tile_marker(&mut self, tile: usize, code: u16, offset: usize, len: usize) {
        if let Some(entry) = self.tiles.get_mut(tile) {
            entry.markers.push(MarkerRecord { code, offset, len });
        }
    }

    /// Offset of the first SOT belonging to `tile`, for random access.
    pub fn first_sot(&self, tile: usize) -> Option<usize> {
        self.tiles
            .get(tile)
            .and_then(|t| t.tile_parts.first())
            .map(|span| span.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sot() {
        let mut index = CodestreamIndex::new(2);
        assert_eq!(index.first_sot(0), None);
        index.tiles[1].tile_parts.push(TilePartSpan {
            start: 120,
            data_start: 134,
            end: 200,
        });
        assert_eq!(index.first_sot(1), Some(120));
        assert_eq!(index.first_sot(5), None);
    }
}

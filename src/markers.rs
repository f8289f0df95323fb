//! J2K marker codes and their admissibility rules.
//!
//! Every marker is a 2-byte code >= 0xFF00. Most markers introduce a
//! segment with a 2-byte length field; SOC, SOD and EOC stand alone.
//! Each marker may only appear while the decoder is in specific states,
//! expressed here as a `DecoderState` mask.

use bitflags::bitflags;
use num_enum::TryFromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum MarkerCode {
    /// SOC: start of codestream.
    Soc = 0xFF4F,
    /// CAP: extended capabilities.
    Cap = 0xFF50,
    /// SIZ: image and tile size.
    Siz = 0xFF51,
    /// COD: coding style default.
    Cod = 0xFF52,
    /// COC: coding style component.
    Coc = 0xFF53,
    /// TLM: tile-part lengths, main header.
    Tlm = 0xFF55,
    /// PLM: packet lengths, main header.
    Plm = 0xFF57,
    /// PLT: packet lengths, tile-part header.
    Plt = 0xFF58,
    /// QCD: quantization default.
    Qcd = 0xFF5C,
    /// QCC: quantization component.
    Qcc = 0xFF5D,
    /// RGN: region of interest.
    Rgn = 0xFF5E,
    /// POC: progression order change.
    Poc = 0xFF5F,
    /// PPM: packed packet headers, main header.
    Ppm = 0xFF60,
    /// PPT: packed packet headers, tile-part header.
    Ppt = 0xFF61,
    /// CRG: component registration.
    Crg = 0xFF63,
    /// COM: comment.
    Com = 0xFF64,
    /// MCT: multiple component transform definition (Part 2).
    Mct = 0xFF74,
    /// MCC: multiple component collection (Part 2).
    Mcc = 0xFF75,
    /// MCO: multiple component transform ordering (Part 2).
    Mco = 0xFF77,
    /// CBD: component bit depth definition (Part 2).
    Cbd = 0xFF78,
    /// SOT: start of tile-part.
    Sot = 0xFF90,
    /// SOP: start of packet (bitstream only).
    Sop = 0xFF91,
    /// EPH: end of packet header (bitstream only).
    Eph = 0xFF92,
    /// SOD: start of data.
    Sod = 0xFF93,
    /// EOC: end of codestream.
    Eoc = 0xFFD9,
}

bitflags! {
    /// Decoder progress through the codestream, used to gate markers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DecoderState: u16 {
        /// Expecting SOC.
        const MH_SOC  = 0x0001;
        /// Expecting SIZ (first main header marker).
        const MH_SIZ  = 0x0002;
        /// Inside the main header.
        const MH      = 0x0004;
        /// Expecting SOT (or EOC).
        const TPH_SOT = 0x0008;
        /// Inside a tile-part header.
        const TPH     = 0x0010;
        /// Stream ended without an EOC marker.
        const NEOC    = 0x0040;
        /// Inside tile-part entropy data.
        const DATA    = 0x0080;
        /// EOC reached.
        const EOC     = 0x0100;
        /// Unrecoverable error encountered.
        const ERR     = 0x8000;
    }
}

impl MarkerCode {
    /// Whether the marker introduces a segment with a 2-byte length field.
    pub fn has_segment(self) -> bool {
        !matches!(self, Self::Soc | Self::Sod | Self::Eoc | Self::Eph)
    }

    /// The decoder states in which this marker may legally appear.
    pub fn legal_states(self) -> DecoderState {
        match self {
            Self::Soc => DecoderState::MH_SOC,
            Self::Siz => DecoderState::MH_SIZ,
            Self::Cod
            | Self::Coc
            | Self::Qcd
            | Self::Qcc
            | Self::Rgn
            | Self::Poc
            | Self::Com
            | Self::Mct
            | Self::Mcc
            | Self::Mco => DecoderState::MH | DecoderState::TPH,
            Self::Cap | Self::Tlm | Self::Plm | Self::Ppm | Self::Crg | Self::Cbd => {
                DecoderState::MH
            }
            Self::Plt | Self::Ppt => DecoderState::TPH,
            Self::Sot => DecoderState::MH | DecoderState::TPH_SOT,
            Self::Sod => DecoderState::TPH,
            Self::Sop | Self::Eph => DecoderState::DATA,
            Self::Eoc => DecoderState::TPH_SOT | DecoderState::DATA,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_round_trip() {
        assert_eq!(MarkerCode::try_from(0xFF4F_u16), Ok(MarkerCode::Soc));
        assert_eq!(MarkerCode::try_from(0xFF90_u16), Ok(MarkerCode::Sot));
        assert_eq!(MarkerCode::try_from(0xFFD9_u16), Ok(MarkerCode::Eoc));
        assert!(MarkerCode::try_from(0xFF00_u16).is_err());
        assert!(MarkerCode::try_from(0x1234_u16).is_err());
    }

    #[test]
    fn test_legal_states() {
        assert!(MarkerCode::Siz.legal_states().contains(DecoderState::MH_SIZ));
        assert!(!MarkerCode::Siz.legal_states().contains(DecoderState::MH));
        assert!(MarkerCode::Cod.legal_states().contains(DecoderState::MH));
        assert!(MarkerCode::Cod.legal_states().contains(DecoderState::TPH));
        assert!(MarkerCode::Plt.legal_states().contains(DecoderState::TPH));
        assert!(!MarkerCode::Plt.legal_states().contains(DecoderState::MH));
        assert!(MarkerCode::Ppm.legal_states().contains(DecoderState::MH));
        assert!(!MarkerCode::Ppm.legal_states().contains(DecoderState::TPH));
    }

    #[test]
    fn test_standalone_markers() {
        assert!(!MarkerCode::Soc.has_segment());
        assert!(!MarkerCode::Sod.has_segment());
        assert!(!MarkerCode::Eoc.has_segment());
        assert!(MarkerCode::Siz.has_segment());
        assert!(MarkerCode::Sot.has_segment());
    }
}

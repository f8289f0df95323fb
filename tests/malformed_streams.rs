//! Decoder behavior on damaged, truncated and historically non-conformant
//! codestreams.

use j2kcodec::error::J2kError;
use j2kcodec::image::{Image, ImageComponent};
use j2kcodec::markers::DecoderState;
use j2kcodec::params::{CompressionParameters, DecoderParams};
use j2kcodec::tile::{NullTileCoder, RawTileCoder};
use j2kcodec::{J2kDecoder, J2kEncoder};

fn gray_image(w: u32, h: u32) -> Image {
    let data: Vec<i32> = (0..(w * h) as i32).map(|i| i % 251).collect();
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

fn encode(params: &CompressionParameters, image: &Image) -> Vec<u8> {
    let mut encoder = J2kEncoder::new(params, image).unwrap();
    let mut buffer = vec![0u8; 1 << 20];
    let len = encoder.encode(&mut RawTileCoder, &mut buffer).unwrap();
    buffer.truncate(len);
    buffer
}

fn find_marker(data: &[u8], code: [u8; 2]) -> usize {
    data.windows(2).position(|w| w == code).unwrap()
}

fn decode_expecting(data: &[u8]) -> Result<Image, J2kError> {
    let mut decoder = J2kDecoder::new(data, DecoderParams::default());
    decoder.decode(&mut RawTileCoder)?;
    Ok(decoder.into_image())
}

#[test]
fn test_out_of_order_tpsot_rejected() {
    let image = gray_image(16, 16);
    let mut data = encode(&CompressionParameters::default(), &image);
    let sot = find_marker(&data, [0xFF, 0x90]);
    // TPsot lives 10 bytes into the SOT segment.
    data[sot + 10] = 1;
    assert_eq!(
        decode_expecting(&data).unwrap_err(),
        J2kError::TilePartOrderViolation
    );
}

#[test]
fn test_tpsot_equals_tnsot_corrected() {
    // The off-by-one pattern from old encoders: a tile declares TNsot = 1
    // but ships two tile-parts, the second carrying TPsot == TNsot. The
    // pre-scan detects it and every count is bumped by one.
    let image = gray_image(16, 16);
    let data = encode(&CompressionParameters::default(), &image);
    let sot = find_marker(&data, [0xFF, 0x90]);
    let payload = &data[sot + 14..data.len() - 2];
    assert_eq!(payload.len(), 1024);
    let (first, second) = payload.split_at(512);

    let mut crafted = data[..sot].to_vec();
    for (tpsot, half) in [(0u8, first), (1u8, second)] {
        let psot = (12 + 2 + half.len()) as u32;
        crafted.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00]);
        crafted.extend_from_slice(&psot.to_be_bytes());
        crafted.push(tpsot);
        crafted.push(1); // TNsot stays 1 on both parts
        crafted.extend_from_slice(&[0xFF, 0x93]);
        crafted.extend_from_slice(half);
    }
    crafted.extend_from_slice(&[0xFF, 0xD9]);

    let mut decoder = J2kDecoder::new(&crafted, DecoderParams::default());
    decoder.decode(&mut RawTileCoder).unwrap();
    assert_eq!(decoder.coding_parameters().tcps[0].n_tile_parts, 2);
    let decoded = decoder.into_image();
    assert_eq!(decoded.comps[0].data, image.comps[0].data);
}

/// Minimal hand-built main header for a 16x16 single-component image.
fn minimal_header() -> Vec<u8> {
    let mut data = vec![
        0xFF, 0x4F, // SOC
        0xFF, 0x51, 0x00, 0x29, // SIZ
        0x00, 0x00, // Rsiz
        0x00, 0x00, 0x00, 0x10, // Xsiz
        0x00, 0x00, 0x00, 0x10, // Ysiz
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // XOsiz, YOsiz
        0x00, 0x00, 0x00, 0x10, // XTsiz
        0x00, 0x00, 0x00, 0x10, // YTsiz
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // XTOsiz, YTOsiz
        0x00, 0x01, // Csiz
        0x07, 0x01, 0x01,
    ];
    data.extend_from_slice(&[
        0xFF, 0x52, 0x00, 0x0C, // COD
        0x00, 0x00, 0x00, 0x01, 0x00, // Scod, LRCP, 1 layer, no MCT
        0x01, 0x04, 0x04, 0x00, 0x01, // 1 level, 64x64 blocks, 5-3
    ]);
    data.extend_from_slice(&[
        0xFF, 0x5C, 0x00, 0x07, 0x40, // QCD: no quantization, 2 guard bits
        0x48, 0x50, 0x50, 0x58, // 4 subband exponents
    ]);
    data
}

fn poc_segment(entries: usize) -> Vec<u8> {
    let mut seg = vec![0xFF, 0x5F];
    seg.extend_from_slice(&((2 + entries * 7) as u16).to_be_bytes());
    for _ in 0..entries {
        seg.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x01, 0x01, 0x00]);
    }
    seg
}

#[test]
fn test_poc_running_total_capped() {
    // 31 accumulated entries are fine; the entry that would reach 32 fails.
    let mut ok = minimal_header();
    ok.extend_from_slice(&poc_segment(30));
    ok.extend_from_slice(&poc_segment(1));
    ok.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x01]);
    let mut decoder = J2kDecoder::new(&ok, DecoderParams::default());
    decoder.read_header().unwrap();

    let mut bad = minimal_header();
    bad.extend_from_slice(&poc_segment(30));
    bad.extend_from_slice(&poc_segment(2));
    let mut decoder = J2kDecoder::new(&bad, DecoderParams::default());
    assert_eq!(decoder.read_header().unwrap_err(), J2kError::TooManyPocEntries);
}

#[test]
fn test_tile_grid_count_limits() {
    // 256x256 image with 1x1 tiles: 65536 tiles, one too many.
    let mut bad = minimal_header();
    bad[10..12].copy_from_slice(&[0x01, 0x00]); // Xsiz = 256
    bad[14..16].copy_from_slice(&[0x01, 0x00]); // Ysiz = 256
    bad[26..28].copy_from_slice(&[0x00, 0x01]); // XTsiz = 1
    bad[30..32].copy_from_slice(&[0x00, 0x01]); // YTsiz = 1
    let mut decoder = J2kDecoder::new(&bad, DecoderParams::default());
    assert_eq!(decoder.read_header().unwrap_err(), J2kError::InvalidTileGrid);

    // 255x257 with 1x1 tiles is exactly 65535, still addressable.
    let mut ok = minimal_header();
    ok[10..12].copy_from_slice(&[0x00, 0xFF]); // Xsiz = 255
    ok[14..16].copy_from_slice(&[0x01, 0x01]); // Ysiz = 257
    ok[26..28].copy_from_slice(&[0x00, 0x01]);
    ok[30..32].copy_from_slice(&[0x00, 0x01]);
    ok.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x01]);
    let mut decoder = J2kDecoder::new(&ok, DecoderParams::default());
    decoder.read_header().unwrap();
    assert_eq!(decoder.coding_parameters().num_tiles(), 65535);
}

#[test]
fn test_huge_tile_grid_decodes_without_panicking() {
    // Tile width of 2^31 over a full-range image: the second tile's nominal
    // right edge lies past u32::MAX, so its bounds must be computed without
    // wrapping when the decode loop intersects it with the decode area.
    let mut data = minimal_header();
    data[8..12].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes()); // Xsiz
    data[24..28].copy_from_slice(&0x8000_0000u32.to_be_bytes()); // XTsiz
    // Tile 0: empty tile-part. Tile 1: Psot == 0, rest of stream.
    data.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0E, 0x00, 0x01]);
    data.extend_from_slice(&[0xFF, 0x93]);
    data.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
    data.extend_from_slice(&[0xFF, 0x93]);
    data.extend_from_slice(&[0xFF, 0xD9]);

    let mut decoder = J2kDecoder::new(&data, DecoderParams::default());
    decoder.read_header().unwrap();
    decoder.set_decode_area(0, 0, 16, 16).unwrap();
    decoder.decode(&mut NullTileCoder).unwrap();
}

#[test]
fn test_stream_ends_after_sot_header() {
    // SOT parses, then the stream ends before any SOD or tile-part header
    // marker shows up.
    let mut data = minimal_header();
    data.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
    let mut decoder = J2kDecoder::new(&data, DecoderParams::default());
    assert_eq!(
        decoder.decode(&mut NullTileCoder).unwrap_err(),
        J2kError::UnexpectedEndOfStream
    );
}

#[test]
fn test_max_component_count_accepted() {
    // Csiz = 16383 is the last legal value; build the SIZ programmatically
    // since the component table runs to 49 KiB.
    let csiz: usize = 16383;
    let mut data = vec![0xFF, 0x4F, 0xFF, 0x51];
    data.extend_from_slice(&((38 + 3 * csiz) as u16).to_be_bytes());
    data.extend_from_slice(&[0x00, 0x00]); // Rsiz
    data.extend_from_slice(&16u32.to_be_bytes()); // Xsiz
    data.extend_from_slice(&16u32.to_be_bytes()); // Ysiz
    data.extend_from_slice(&[0; 8]); // XOsiz, YOsiz
    data.extend_from_slice(&16u32.to_be_bytes()); // XTsiz
    data.extend_from_slice(&16u32.to_be_bytes()); // YTsiz
    data.extend_from_slice(&[0; 8]); // XTOsiz, YTOsiz
    data.extend_from_slice(&(csiz as u16).to_be_bytes());
    for _ in 0..csiz {
        data.extend_from_slice(&[0x07, 0x01, 0x01]);
    }
    data.extend_from_slice(&[
        0xFF, 0x52, 0x00, 0x0C, // COD
        0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x04, 0x04, 0x00, 0x01,
    ]);
    data.extend_from_slice(&[
        0xFF, 0x5C, 0x00, 0x07, 0x40, 0x48, 0x50, 0x50, 0x58, // QCD
    ]);
    data.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x01]);

    let mut decoder = J2kDecoder::new(&data, DecoderParams::default());
    let image = decoder.read_header().unwrap();
    assert_eq!(image.comps.len(), 16383);
}

#[test]
fn test_truncated_payload_fails() {
    let image = gray_image(16, 16);
    let data = encode(&CompressionParameters::default(), &image);
    let truncated = &data[..data.len() - 600];
    // Psot points past the end of the stream.
    assert_eq!(
        decode_expecting(truncated).unwrap_err(),
        J2kError::UnexpectedEndOfStream
    );
}

#[test]
fn test_missing_eoc_tolerated() {
    let image = gray_image(16, 16);
    let data = encode(&CompressionParameters::default(), &image);
    let without_eoc = &data[..data.len() - 2];
    let mut decoder = J2kDecoder::new(without_eoc, DecoderParams::default());
    decoder.decode(&mut RawTileCoder).unwrap();
    assert_eq!(decoder.state(), DecoderState::NEOC);
    assert_eq!(decoder.into_image().comps[0].data, image.comps[0].data);
}

#[test]
fn test_psot_zero_means_rest_of_stream() {
    let image = gray_image(16, 16);
    let mut data = encode(&CompressionParameters::default(), &image);
    let sot = find_marker(&data, [0xFF, 0x90]);
    data[sot + 6..sot + 10].copy_from_slice(&[0, 0, 0, 0]);
    let decoded = decode_expecting(&data).unwrap();
    assert_eq!(decoded.comps[0].data, image.comps[0].data);
}

#[test]
fn test_ppm_ppt_conflict() {
    let image = gray_image(16, 16);
    let params = CompressionParameters {
        comment: None,
        ..Default::default()
    };
    let mut encoder = J2kEncoder::new(&params, &image).unwrap();
    let mut buffer = vec![0u8; 4096];
    let len = encoder.encode(&mut NullTileCoder, &mut buffer).unwrap();
    let data = &buffer[..len];
    let sot = find_marker(data, [0xFF, 0x90]);

    let mut crafted = data[..sot].to_vec();
    // PPM in the main header (Zppm 0, one zero-length packed header record).
    crafted.extend_from_slice(&[0xFF, 0x60, 0x00, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00]);
    // Tile-part whose header carries a PPT as well.
    crafted.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00]);
    crafted.extend_from_slice(&19u32.to_be_bytes()); // SOT + PPT + SOD
    crafted.extend_from_slice(&[0x00, 0x01]);
    crafted.extend_from_slice(&[0xFF, 0x61, 0x00, 0x03, 0x00]); // PPT, Zppt 0
    crafted.extend_from_slice(&[0xFF, 0x93]);
    crafted.extend_from_slice(&[0xFF, 0xD9]);

    let mut decoder = J2kDecoder::new(&crafted, DecoderParams::default());
    assert_eq!(
        decoder.decode(&mut NullTileCoder).unwrap_err(),
        J2kError::PpmPptConflict
    );
}

#[test]
fn test_garbage_between_tile_parts_recovered() {
    let image = gray_image(32, 32);
    let params = CompressionParameters {
        tile_size_on: true,
        tdx: 16,
        tdy: 16,
        ..Default::default()
    };
    let data = encode(&params, &image);
    // Insert a stray two-byte word before the second SOT; the scanner
    // should resynchronize on it.
    let first_sot = find_marker(&data, [0xFF, 0x90]);
    let second_sot = first_sot
        + 2
        + data[first_sot + 2..]
            .windows(2)
            .position(|w| w == [0xFF, 0x90])
            .unwrap();
    let mut crafted = data[..second_sot].to_vec();
    crafted.extend_from_slice(&[0xFF, 0x13]);
    crafted.extend_from_slice(&data[second_sot..]);

    let decoded = decode_expecting(&crafted).unwrap();
    assert_eq!(decoded.comps[0].data, image.comps[0].data);
}

//! Profile (Rsiz) conformance validation.
//!
//! Pure checks over the requested compression parameters and image
//! geometry, run once at encoder setup. Non-conformance never blocks
//! encoding: every violation is reported as a warning and the requested
//! profile degrades to "none", producing a generic codestream.

use log::warn;

use crate::image::Image;
use crate::params::{CompressionParameters, ProgressionOrder};

pub const RSIZ_NONE: u16 = 0x0000;
pub const RSIZ_CINEMA_2K: u16 = 0x0003;
pub const RSIZ_CINEMA_4K: u16 = 0x0004;
pub const RSIZ_BROADCAST_SINGLE: u16 = 0x0100;
pub const RSIZ_BROADCAST_MULTI: u16 = 0x0200;
pub const RSIZ_BROADCAST_MULTI_R: u16 = 0x0300;
pub const RSIZ_IMF_2K: u16 = 0x0400;
pub const RSIZ_IMF_4K: u16 = 0x0500;
pub const RSIZ_IMF_8K: u16 = 0x0600;
pub const RSIZ_IMF_2K_R: u16 = 0x0700;
pub const RSIZ_IMF_4K_R: u16 = 0x0800;
pub const RSIZ_IMF_8K_R: u16 = 0x0900;

pub fn is_cinema(rsiz: u16) -> bool {
    rsiz == RSIZ_CINEMA_2K || rsiz == RSIZ_CINEMA_4K
}

pub fn is_broadcast(rsiz: u16) -> bool {
    matches!(
        rsiz & 0xFF00,
        RSIZ_BROADCAST_SINGLE | RSIZ_BROADCAST_MULTI | RSIZ_BROADCAST_MULTI_R
    ) && rsiz & 0x00FF <= 0x000B
}

pub fn is_imf(rsiz: u16) -> bool {
    (RSIZ_IMF_2K..=RSIZ_IMF_8K_R + 0x00FF).contains(&rsiz)
}

/// Validates the requested profile against parameters and image geometry.
/// Returns the effective Rsiz: the requested value when conformant, or
/// `RSIZ_NONE` after logging what failed.
pub fn validate_profile(params: &CompressionParameters, image: &Image) -> u16 {
    let rsiz = params.rsiz;
    if rsiz == RSIZ_NONE {
        return RSIZ_NONE;
    }
    let ok = if is_cinema(rsiz) {
        check_cinema(params, image, rsiz)
    } else if is_broadcast(rsiz) {
        check_broadcast(params, image, rsiz)
    } else if is_imf(rsiz) {
        check_imf(params, image, rsiz)
    } else {
        // Part-1 profiles 0/1 carry no extra constraints we enforce here.
        rsiz <= 0x0002
    };
    if ok {
        rsiz
    } else {
        warn!("profile 0x{rsiz:04x} requirements not met; writing a non-profile codestream");
        RSIZ_NONE
    }
}

fn check_components_12bit_444(image: &Image, what: &str) -> bool {
    if image.comps.len() != 3 {
        warn!("{what} requires exactly 3 components, found {}", image.comps.len());
        return false;
    }
    for (i, comp) in image.comps.iter().enumerate() {
        if comp.prec != 12 || comp.signed {
            warn!("{what} requires 12-bit unsigned components; component {i} has {} bits", comp.prec);
            return false;
        }
        if comp.dx != 1 || comp.dy != 1 {
            warn!("{what} forbids subsampling; component {i} is {}x{}", comp.dx, comp.dy);
            return false;
        }
    }
    true
}

fn check_cinema(params: &CompressionParameters, image: &Image, rsiz: u16) -> bool {
    let what = if rsiz == RSIZ_CINEMA_2K { "cinema 2K" } else { "cinema 4K" };
    if !check_components_12bit_444(image, what) {
        return false;
    }
    if params.tile_size_on {
        warn!("{what} requires a single full-frame tile");
        return false;
    }
    let (max_w, max_h, max_decomp) = if rsiz == RSIZ_CINEMA_2K {
        (2048, 1080, 5)
    } else {
        (4096, 2160, 6)
    };
    if image.width() > max_w || image.height() > max_h {
        warn!("{what} image exceeds {max_w}x{max_h}");
        return false;
    }
    if params.numresolution as u32 - 1 > max_decomp {
        warn!("{what} allows at most {max_decomp} decomposition levels");
        return false;
    }
    if rsiz == RSIZ_CINEMA_4K && params.prog_order != ProgressionOrder::Cprl {
        warn!("cinema 4K requires CPRL progression");
        return false;
    }
    if !params.irreversible {
        warn!("{what} requires the irreversible 9-7 transform");
        return false;
    }
    true
}

fn check_broadcast(params: &CompressionParameters, image: &Image, rsiz: u16) -> bool {
    let mainlevel = rsiz & 0x000F;
    if mainlevel > 11 {
        warn!("broadcast mainlevel {mainlevel} out of range");
        return false;
    }
    if image.comps.len() > 4 {
        warn!("broadcast profiles allow at most 4 components");
        return false;
    }
    for (i, comp) in image.comps.iter().enumerate() {
        if comp.prec > 12 {
            warn!("broadcast profiles cap precision at 12 bits; component {i} has {}", comp.prec);
            return false;
        }
    }
    // Either one full-frame tile, or a uniform 1, 4 (2x2) tile split.
    if params.tile_size_on {
        let tiles_x = image.width().div_ceil(params.tdx.max(1));
        let tiles_y = image.height().div_ceil(params.tdy.max(1));
        let tiles = tiles_x * tiles_y;
        if tiles != 1 && tiles != 4 {
            warn!("broadcast profiles require 1 or 4 tiles, grid is {tiles_x}x{tiles_y}");
            return false;
        }
    }
    true
}

fn check_imf(params: &CompressionParameters, image: &Image, rsiz: u16) -> bool {
    let profile = rsiz & 0xFF00;
    if image.comps.len() > 3 {
        warn!("IMF profiles allow at most 3 components");
        return false;
    }
    for (i, comp) in image.comps.iter().enumerate() {
        if comp.prec > 16 {
            warn!("IMF caps precision at 16 bits; component {i} has {}", comp.prec);
            return false;
        }
        if comp.dy != 1 || comp.dx > 2 {
            warn!("IMF allows only 4:4:4 or 4:2:2 subsampling; component {i} is {}x{}", comp.dx, comp.dy);
            return false;
        }
    }
    if params.cblkw != 5 || params.cblkh != 5 {
        warn!(
            "IMF requires 32x32 code-blocks, requested {}x{}",
            1u32 << params.cblkw,
            1u32 << params.cblkh
        );
        return false;
    }
    if params.prog_order != ProgressionOrder::Cprl {
        warn!("IMF requires CPRL progression");
        return false;
    }
    if params.roi_shift != 0 || params.roi_compno.is_some() {
        warn!("IMF forbids regions of interest");
        return false;
    }
    if !params.cblksty.is_empty() {
        warn!("IMF forbids code-block mode switches");
        return false;
    }
    if !params.pocs.is_empty() {
        warn!("IMF forbids progression order changes");
        return false;
    }
    let (max_w, max_h, full_frame_decomp) = match profile {
        RSIZ_IMF_2K | RSIZ_IMF_2K_R => (2048, 1556, 5),
        RSIZ_IMF_4K | RSIZ_IMF_4K_R => (4096, 3112, 6),
        _ => (8192, 6224, 7),
    };
    if image.width() > max_w || image.height() > max_h {
        warn!("IMF image exceeds {max_w}x{max_h}");
        return false;
    }
    // Decomposition cap depends on the tile width: full frame, 2048 or 1024.
    let levels = params.numresolution as u32 - 1;
    let max_decomp = if !params.tile_size_on || params.tdx >= image.width() {
        full_frame_decomp
    } else if params.tdx >= 2048 {
        5
    } else if params.tdx >= 1024 {
        4
    } else {
        warn!("IMF tiles must be at least 1024 wide");
        return false;
    };
    if levels > max_decomp {
        warn!("IMF allows at most {max_decomp} decomposition levels for this tile width");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageComponent;

    fn cinema_image() -> Image {
        let comp = ImageComponent {
            dx: 1,
            dy: 1,
            prec: 12,
            ..Default::default()
        };
        Image::new(0, 0, 2048, 1080, vec![comp.clone(), comp.clone(), comp]).unwrap()
    }

    #[test]
    fn test_cinema_2k_accepted() {
        let params = CompressionParameters {
            rsiz: RSIZ_CINEMA_2K,
            numresolution: 6,
            irreversible: true,
            ..Default::default()
        };
        assert_eq!(validate_profile(&params, &cinema_image()), RSIZ_CINEMA_2K);
    }

    #[test]
    fn test_cinema_degrades_on_reversible_transform() {
        let params = CompressionParameters {
            rsiz: RSIZ_CINEMA_2K,
            irreversible: false,
            ..Default::default()
        };
        assert_eq!(validate_profile(&params, &cinema_image()), RSIZ_NONE);
    }

    #[test]
    fn test_imf_requires_32x32_codeblocks() {
        let comp = ImageComponent {
            dx: 1,
            dy: 1,
            prec: 10,
            ..Default::default()
        };
        let image = Image::new(0, 0, 1920, 1080, vec![comp]).unwrap();
        let mut params = CompressionParameters {
            rsiz: RSIZ_IMF_2K,
            prog_order: ProgressionOrder::Cprl,
            cblkw: 6,
            cblkh: 6,
            ..Default::default()
        };
        assert_eq!(validate_profile(&params, &image), RSIZ_NONE);
        params.cblkw = 5;
        params.cblkh = 5;
        assert_eq!(validate_profile(&params, &image), RSIZ_IMF_2K);
    }

    #[test]
    fn test_none_passes_through() {
        let params = CompressionParameters::default();
        assert_eq!(validate_profile(&params, &cinema_image()), RSIZ_NONE);
    }
}

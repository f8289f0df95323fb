//! Image and component data structures shared by the encoder and decoder.

use crate::constants::MAX_COMPONENT_COUNT;
use crate::error::J2kError;

/// A single image component (color plane or auxiliary channel).
#[derive(Debug, Clone, Default)]
pub struct ImageComponent {
    /// Horizontal subsampling factor relative to the reference grid (>= 1).
    pub dx: u32,
    /// Vertical subsampling factor (>= 1).
    pub dy: u32,
    /// Bit precision of the samples (1..=31).
    pub prec: u8,
    /// True if samples are signed.
    pub signed: bool,
    /// Resolution reduction applied when decoding (0 = full resolution).
    pub factor: u8,
    /// Sample buffer in row-major order; `None` until decoded or assigned.
    pub data: Option<Vec<i32>>,
}

/// An image on the J2K reference grid.
///
/// The image area is the rectangle `[x0, x1) x [y0, y1)` in absolute grid
/// coordinates. Component sample grids are derived from it through each
/// component's subsampling factors.
#[derive(Debug, Clone, Default)]
pub struct Image {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub comps: Vec<ImageComponent>,
}

/// Ceiling division used throughout the reference-grid geometry.
pub fn ceil_div(a: u32, b: u32) -> u32 {
    a.div_ceil(b)
}

impl ImageComponent {
    /// Width of the component sample grid for an image spanning `x0..x1`.
    pub fn width(&self, x0: u32, x1: u32) -> u32 {
        ceil_div(x1, self.dx) - ceil_div(x0, self.dx)
    }

    pub fn height(&self, y0: u32, y1: u32) -> u32 {
        ceil_div(y1, self.dy) - ceil_div(y0, self.dy)
    }
}

impl Image {
    pub fn new(
        x0: u32,
        y0: u32,
        x1: u32,
        y1: u32,
        comps: Vec<ImageComponent>,
    ) -> Result<Self, J2kError> {
        let image = Self {
            x0,
            y0,
            x1,
            y1,
            comps,
        };
        image.validate()?;
        Ok(image)
    }

    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    pub fn validate(&self) -> Result<(), J2kError> {
        if self.x1 <= self.x0 || self.y1 <= self.y0 {
            return Err(J2kError::InvalidImageGeometry);
        }
        if self.comps.is_empty() || self.comps.len() > MAX_COMPONENT_COUNT {
            return Err(J2kError::InvalidComponentCount);
        }
        for comp in &self.comps {
            if comp.dx == 0 || comp.dx > 255 || comp.dy == 0 || comp.dy > 255 {
                return Err(J2kError::InvalidComponentParameters);
            }
            if comp.prec == 0 || comp.prec > 31 {
                return Err(J2kError::InvalidComponentParameters);
            }
        }
        Ok(())
    }

    /// Component sample-grid width for component `compno`.
    pub fn comp_width(&self, compno: usize) -> u32 {
        self.comps[compno].width(self.x0, self.x1)
    }

    pub fn comp_height(&self, compno: usize) -> u32 {
        self.comps[compno].height(self.y0, self.y1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_comp(prec: u8) -> ImageComponent {
        ImageComponent {
            dx: 1,
            dy: 1,
            prec,
            ..Default::default()
        }
    }

    #[test]
    fn test_image_validation() {
        assert!(Image::new(0, 0, 64, 64, vec![gray_comp(8)]).is_ok());
        assert_eq!(
            Image::new(0, 0, 0, 64, vec![gray_comp(8)]).unwrap_err(),
            J2kError::InvalidImageGeometry
        );
        assert_eq!(
            Image::new(0, 0, 64, 64, vec![]).unwrap_err(),
            J2kError::InvalidComponentCount
        );
        assert_eq!(
            Image::new(0, 0, 64, 64, vec![gray_comp(32)]).unwrap_err(),
            J2kError::InvalidComponentParameters
        );
    }

    #[test]
    fn test_subsampled_dimensions() {
        let comp = ImageComponent {
            dx: 2,
            dy: 2,
            prec: 8,
            ..Default::default()
        };
        let image = Image::new(0, 0, 101, 51, vec![comp]).unwrap();
        assert_eq!(image.comp_width(0), 51);
        assert_eq!(image.comp_height(0), 26);
    }
}

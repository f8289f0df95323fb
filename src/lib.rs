pub mod constants;
pub mod error;

pub use error::J2kError;
pub use image::{Image, ImageComponent};
pub use params::{
    CodingParameters, CompressionParameters, DecoderParams, ProgressionOrder,
};
pub use decoder::J2kDecoder;
pub use encoder::J2kEncoder;
pub use tile::{EncodedTile, NullTileCoder, RawTileCoder, TileCoder};

pub mod decoder;
pub mod encoder;
pub mod image;
pub mod index;
pub mod markers;
pub mod params;
pub mod profile;
pub mod stream;
pub mod tile;

pub mod error;
pub mod checksum;
pub mod codec;
pub mod shuffle;
pub mod sample;
pub mod header;
pub mod metadata;
pub mod preamble;
pub mod block;
pub mod io_stream;
pub mod file;

pub use error::{Result, XisfError};
pub use checksum::{ChecksumDescriptor, ChecksumType};
pub use codec::{CompressionDescriptor, CompressionType, get_codec};
pub use sample::{PixelBuffer, PixelData, SampleFormat};
pub use header::{Geometry, Header, Location};
pub use metadata::ImageMetaData;
pub use block::{DataBlock, LoadWarning};
pub use io_stream::{LoadedImage, XisfReader, XisfWriter, add_attached_image};
pub use file::SaveOptions;

//! Monolithic XISF reader and writer over arbitrary streams.
//!
//! # Reader
//! [`XisfReader::new`] checks the signature, reads the length-framed XML
//! header and parses it; nothing else is read until
//! [`XisfReader::read_image`] resolves the `Image` element's `location`,
//! pulls the stored block, and decodes it to the 16-bit internal form.
//!
//! # Writer
//! Saving is split in two. [`add_attached_image`] plans the layout, builds
//! the data block and records `location`/`compression`/`checksum` on the
//! header. [`XisfWriter::write`] then emits preamble, header, zero padding
//! up to the recorded offset, and the block bytes.
//!
//! # Endianness
//! All binary fields are little-endian; see `preamble.rs`.

use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::{debug, warn};

use crate::block::{DataBlock, LoadWarning};
use crate::error::{Result, XisfError};
use crate::file::SaveOptions;
use crate::header::{DataEncoding, Geometry, Header, Location};
use crate::metadata::ImageMetaData;
use crate::preamble::{LayoutPlan, Preamble, PREAMBLE_SIZE};
use crate::sample::{PixelBuffer, PixelData, SampleFormat};

/// Everything a load produces.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub pixels:        PixelBuffer,
    pub metadata:      ImageMetaData,
    pub is_bayered:    bool,
    /// Sample format as stored on disk, before narrowing to 16 bits.
    pub source_format: SampleFormat,
    pub warnings:      Vec<LoadWarning>,
}

// ── Reader ──────────────────────────────────────────────────────────────────

pub struct XisfReader<R: Read + Seek> {
    reader:       R,
    base:         u64,
    pub preamble: Preamble,
    pub header:   Header,
}

impl<R: Read + Seek> XisfReader<R> {
    /// Read preamble and header. Offsets in the header are taken relative
    /// to the stream position on entry.
    pub fn new(mut reader: R) -> Result<Self> {
        let base = reader.stream_position()?;
        let preamble = Preamble::read(&mut reader)?;

        let declared = u64::from(preamble.header_length);
        let mut header_bytes = Vec::new();
        (&mut reader).take(declared).read_to_end(&mut header_bytes)?;
        if (header_bytes.len() as u64) < declared {
            return Err(XisfError::InvalidFormat(format!(
                "header declares {} bytes but the file ends after {}",
                preamble.header_length,
                header_bytes.len()
            )));
        }
        let header = Header::parse(&header_bytes)?;
        debug!(header_length = preamble.header_length, "read XISF header");

        Ok(Self { reader, base, preamble, header })
    }

    /// Fetch the stored (still compressed) data block of the image.
    pub fn read_stored_block(&mut self) -> Result<DataBlock> {
        let compression = self.header.compression()?;
        let checksum = self.header.checksum()?;
        let stored = match self.header.location()? {
            Some(Location::Attachment { offset, length }) => self.read_attachment(offset, length)?,
            Some(Location::Inline(encoding)) => encoding.decode(&self.header.image()?.text)?,
            Some(Location::Embedded) | None => {
                let image = self.header.image()?;
                let data = image.child("Data").ok_or_else(|| {
                    XisfError::InvalidFormat("image has neither an attachment nor a Data element".into())
                })?;
                let encoding = match data.attr("encoding") {
                    Some(e) => DataEncoding::parse(e)?,
                    None    => DataEncoding::Base64,
                };
                encoding.decode(&data.text)?
            }
        };
        Ok(DataBlock::from_stored(stored, compression, checksum))
    }

    fn read_attachment(&mut self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let end = self.reader.seek(SeekFrom::End(0))?;
        let start = self.base + offset;
        if start.checked_add(length).map_or(true, |stop| stop > end) {
            return Err(XisfError::InvalidFormat(format!(
                "attachment {offset}+{length} runs past end of file ({} bytes)",
                end - self.base
            )));
        }
        let length = usize::try_from(length)
            .map_err(|_| XisfError::InvalidFormat(format!("attachment length {length} too large")))?;
        self.reader.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; length];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Decode the image to the 16-bit internal representation.
    pub fn read_image(&mut self, is_bayered: bool) -> Result<LoadedImage> {
        let mut warnings = Vec::new();

        let metadata = ImageMetaData::from_header(&self.header).unwrap_or_else(|e| {
            warn!(error = %e, "ignoring unreadable image metadata");
            warnings.push(LoadWarning::MetadataUnavailable(e.to_string()));
            ImageMetaData::default()
        });

        let geometry = self.header.geometry()?;
        let format = self.header.sample_format()?;

        let block = self.read_stored_block()?;
        let (bytes, block_warnings) = block.decode()?;
        warnings.extend(block_warnings);

        let count = geometry.pixel_count();
        let expected = count * format.item_size();
        if bytes.len() > expected {
            debug!(expected, actual = bytes.len(), "ignoring trailing data block bytes");
        }
        let data = format.decode(&bytes, count)?;

        Ok(LoadedImage {
            pixels: PixelBuffer::new(geometry.width, geometry.height, data),
            metadata,
            is_bayered,
            source_format: format,
            warnings,
        })
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

// ── Writer ──────────────────────────────────────────────────────────────────

/// Build the data block for `data` and record its placement on `header`.
///
/// The header must already carry its `Image` element. The block's offset
/// is fixed before the final attributes exist, so the header is sized with
/// `opts.attachment_budget` spare bytes and rechecked afterwards.
pub fn add_attached_image(
    header: &mut Header,
    data: &PixelData,
    opts: &SaveOptions,
) -> Result<DataBlock> {
    if !header.has_image() {
        return Err(XisfError::InvalidState("header has no Image element to attach data to".into()));
    }
    let plan = LayoutPlan::new(header.to_bytes()?.len(), opts.attachment_budget);
    let block = DataBlock::encode(data, opts)?;

    header.set_data_attributes(
        Location::Attachment { offset: plan.data_block_start, length: block.stored_size() },
        block.compression(),
        block.checksum(),
    )?;
    plan.commit(header.to_bytes()?.len())?;

    debug!(
        data_block_start = plan.data_block_start,
        stored = block.stored_size(),
        uncompressed = block.uncompressed_size(),
        codec = %block.codec_name(),
        checksum = block.checksum_name(),
        "attached image data block"
    );
    Ok(block)
}

/// Header plus image, ready to write: sets up a fresh [`Header`] for a
/// single-channel image and attaches its data.
pub fn prepare_image(
    geometry: Geometry,
    data: &PixelData,
    metadata: &ImageMetaData,
    opts: &SaveOptions,
) -> Result<(Header, DataBlock)> {
    if data.len() != geometry.pixel_count() {
        return Err(XisfError::InvalidState(format!(
            "{} samples do not fill a {}x{} image",
            data.len(), geometry.width, geometry.height
        )));
    }
    let mut header = Header::new();
    header.add_image(geometry, data.sample_format(), metadata);
    let block = add_attached_image(&mut header, data, opts)?;
    Ok((header, block))
}

pub struct XisfWriter<W: Write + Seek> {
    writer: W,
}

impl<W: Write + Seek> XisfWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a monolithic file. With a data block, the header's `location`
    /// must name an attachment offset at or past the end of the header.
    pub fn write(&mut self, header: &Header, block: Option<&DataBlock>) -> Result<()> {
        let header_bytes = header.to_bytes()?;
        let header_length = u32::try_from(header_bytes.len())
            .map_err(|_| XisfError::InvalidState("header exceeds 4 GiB".into()))?;

        let base = self.writer.stream_position()?;
        Preamble::new(header_length).write(&mut self.writer)?;
        self.writer.write_all(&header_bytes)?;
        let header_end = (PREAMBLE_SIZE + header_bytes.len()) as u64;

        if let Some(block) = block {
            let offset = match header.location()? {
                Some(Location::Attachment { offset, .. }) => offset,
                Some(other) => {
                    return Err(XisfError::InvalidState(format!(
                        "data block given but location is '{}'",
                        other.to_attribute()
                    )))
                }
                None => {
                    return Err(XisfError::InvalidState(
                        "data block given but the header has no location".into(),
                    ))
                }
            };
            if offset < header_end {
                return Err(XisfError::InvalidState(format!(
                    "data block offset {offset} overlaps the header ending at {header_end}"
                )));
            }
            let padding = offset - header_end;
            io::copy(&mut io::repeat(0).take(padding), &mut self.writer)?;
            debug_assert_eq!(self.writer.stream_position()?, base + offset);
            self.writer.write_all(block.bytes())?;
            debug!(header_length, padding, stored = block.stored_size(), "wrote XISF file");
        }

        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

//! Byte-level codestream I/O.
//!
//! All multi-byte values are big-endian. The reader and writer operate on
//! caller-provided slices with an explicit position; the writer additionally
//! supports absolute seeks and in-place patching, which the encoder uses to
//! finalize tile-part lengths (Psot) and the TLM side-table after the fact.
//! `SegmentBuffer` is the staging area for variable-length marker segments:
//! the segment is built in memory, its length field patched once the total
//! size is known, and the whole segment committed to the writer atomically.

use crate::error::J2kError;

pub struct CodestreamReader<'a> {
    source: &'a [u8],
    position: usize,
}

impl<'a> CodestreamReader<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn bytes_left(&self) -> usize {
        self.source.len() - self.position
    }

    pub fn remaining_data(&self) -> &'a [u8] {
        &self.source[self.position..]
    }

    pub fn read_u8(&mut self) -> Result<u8, J2kError> {
        if self.position >= self.source.len() {
            return Err(J2kError::UnexpectedEndOfStream);
        }
        let value = self.source[self.position];
        self.position += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, J2kError> {
        let hi = self.read_u8()?;
        let lo = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    pub fn read_u32(&mut self) -> Result<u32, J2kError> {
        let hi = self.read_u16()?;
        let lo = self.read_u16()?;
        Ok(((hi as u32) << 16) | lo as u32)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], J2kError> {
        if count > self.bytes_left() {
            return Err(J2kError::UnexpectedEndOfStream);
        }
        let slice = &self.source[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), J2kError> {
        if count > self.bytes_left() {
            return Err(J2kError::UnexpectedEndOfStream);
        }
        self.position += count;
        Ok(())
    }

    pub fn seek(&mut self, position: usize) -> Result<(), J2kError> {
        if position > self.source.len() {
            return Err(J2kError::InvalidSeekPosition);
        }
        self.position = position;
        Ok(())
    }

    /// Reads the next two bytes without consuming them.
    pub fn peek_u16(&self) -> Result<u16, J2kError> {
        if self.bytes_left() < 2 {
            return Err(J2kError::UnexpectedEndOfStream);
        }
        Ok(u16::from_be_bytes([
            self.source[self.position],
            self.source[self.position + 1],
        ]))
    }
}

pub struct CodestreamWriter<'a> {
    destination: &'a mut [u8],
    position: usize,
    high_water: usize,
}

impl<'a> CodestreamWriter<'a> {
    pub fn new(destination: &'a mut [u8]) -> Self {
        Self {
            destination,
            position: 0,
            high_water: 0,
        }
    }

    /// Total number of bytes produced so far (independent of seeks).
    pub fn len(&self) -> usize {
        self.high_water
    }

    pub fn is_empty(&self) -> bool {
        self.high_water == 0
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn bytes_left(&self) -> usize {
        self.destination.len() - self.position
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), J2kError> {
        if self.position >= self.destination.len() {
            return Err(J2kError::DestinationTooSmall);
        }
        self.destination[self.position] = value;
        self.position += 1;
        self.high_water = self.high_water.max(self.position);
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), J2kError> {
        let bytes = value.to_be_bytes();
        self.write_u8(bytes[0])?;
        self.write_u8(bytes[1])
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), J2kError> {
        let bytes = value.to_be_bytes();
        for b in bytes {
            self.write_u8(b)?;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), J2kError> {
        if data.len() > self.destination.len() - self.position {
            return Err(J2kError::DestinationTooSmall);
        }
        self.destination[self.position..self.position + data.len()].copy_from_slice(data);
        self.position += data.len();
        self.high_water = self.high_water.max(self.position);
        Ok(())
    }

    pub fn seek(&mut self, position: usize) -> Result<(), J2kError> {
        if position > self.destination.len() {
            return Err(J2kError::InvalidSeekPosition);
        }
        self.position = position;
        Ok(())
    }

    /// Overwrites two bytes at an absolute offset. Only previously written
    /// bytes may be patched.
    pub fn patch_u16_at(&mut self, offset: usize, value: u16) -> Result<(), J2kError> {
        if offset + 2 > self.high_water {
            return Err(J2kError::InvalidSeekPosition);
        }
        self.destination[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Overwrites four bytes at an absolute offset.
    pub fn patch_u32_at(&mut self, offset: usize, value: u32) -> Result<(), J2kError> {
        if offset + 4 > self.high_water {
            return Err(J2kError::InvalidSeekPosition);
        }
        self.destination[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }
}

/// In-memory staging area for one marker segment.
///
/// Writes accumulate in the buffer, so a segment's total size is known
/// before anything reaches the destination; the 2-byte length field is
/// patched in place and the segment committed as a whole.
#[derive(Debug, Default)]
pub struct SegmentBuffer {
    data: Vec<u8>,
}

impl SegmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the buffer and ensures capacity for the expected segment size.
    pub fn begin(&mut self, expected_size: usize) {
        self.data.clear();
        self.data.reserve(expected_size);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Overwrites two staged bytes, typically the length field.
    pub fn patch_u16_at(&mut self, offset: usize, value: u16) -> Result<(), J2kError> {
        if offset + 2 > self.data.len() {
            return Err(J2kError::InvalidSeekPosition);
        }
        self.data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Flushes the staged segment to the writer and resets the cursor.
    pub fn commit(&mut self, writer: &mut CodestreamWriter<'_>) -> Result<(), J2kError> {
        writer.write_bytes(&self.data)?;
        self.data.clear();
        Ok(())
    }
}

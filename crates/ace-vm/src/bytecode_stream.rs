/// A random-access, little-endian byte cursor over an immutable bytecode buffer (§4.1).
///
/// Never mutates the underlying buffer. Reads are unaligned by design — the wire format
/// packs operands back-to-back with no padding. Reading past the end is not an error at
/// this layer; [`BytecodeStream::eof`] reports it and the dispatcher treats it as loop exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeStream {
    buffer: Vec<u8>,
    position: usize,
}

/// A read ran off the end of the buffer. Distinct from ordinary end-of-stream: `eof()`
/// means "nothing left to read", this means "tried to read more than was left".
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
#[error("read past end of bytecode stream at position {position} (wanted {wanted} bytes, {available} available)")]
pub struct UnexpectedEof {
    pub position: usize,
    pub wanted: usize,
    pub available: usize,
}

/// Primitive values that can be read directly off the wire in one shot.
///
/// Implemented for every fixed-width primitive `STORE_STATIC_*`/`LOAD_*` operands are
/// encoded as (§4.3); all reads are little-endian per §6.1.
pub trait Primitive: Sized {
    const SIZE: usize;
    fn from_le_bytes(bytes: &[u8]) -> Self;
}

macro_rules! impl_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Primitive for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le_bytes(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_primitive!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl BytecodeStream {
    /// Wraps an already-assembled bytecode buffer for reading from the start.
    #[must_use]
    pub fn new(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Reads one little-endian, primitive-typed value and advances the cursor.
    ///
    /// # Errors
    /// Returns [`UnexpectedEof`] if fewer than `T::SIZE` bytes remain.
    pub fn read<T: Primitive>(&mut self) -> Result<T, UnexpectedEof> {
        let end = self.position + T::SIZE;
        if end > self.buffer.len() {
            return Err(UnexpectedEof {
                position: self.position,
                wanted: T::SIZE,
                available: self.buffer.len().saturating_sub(self.position),
            });
        }
        let value = T::from_le_bytes(&self.buffer[self.position..end]);
        self.position = end;
        Ok(value)
    }

    /// Reads `len` raw bytes (used for UTF-8 string payloads) and advances the cursor.
    ///
    /// # Errors
    /// Returns [`UnexpectedEof`] if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8], UnexpectedEof> {
        let end = self.position + len;
        if end > self.buffer.len() {
            return Err(UnexpectedEof {
                position: self.position,
                wanted: len,
                available: self.buffer.len().saturating_sub(self.position),
            });
        }
        let bytes = &self.buffer[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Reads a length-prefixed (u32) UTF-8 string, matching `STORE_STATIC_STRING`/`LOAD_STRING`.
    ///
    /// # Errors
    /// Returns [`UnexpectedEof`] if the length prefix or the payload runs off the buffer, or
    /// an [`io::Error`] if the payload is not valid UTF-8.
    pub fn read_string_u32_len(&mut self) -> Result<String, StringReadError> {
        let len: u32 = self.read()?;
        let bytes = self.read_bytes(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(StringReadError::InvalidUtf8)
    }

    /// Reads a length-prefixed (u16) UTF-8 string, matching `STORE_STATIC_TYPE`/`LOAD_TYPE` names.
    ///
    /// # Errors
    /// Returns [`UnexpectedEof`] if the length prefix or the payload runs off the buffer, or
    /// an [`io::Error`] if the payload is not valid UTF-8.
    pub fn read_string_u16_len(&mut self) -> Result<String, StringReadError> {
        let len: u16 = self.read()?;
        let bytes = self.read_bytes(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(StringReadError::InvalidUtf8)
    }

    /// Current byte offset of the cursor.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves the cursor to an absolute byte offset. Seeking past the end is permitted; the
    /// next `eof()` check will then be true.
    pub fn seek(&mut self, offset: usize) {
        self.position = offset.min(self.buffer.len());
    }

    /// Whether the cursor has consumed the entire buffer.
    #[must_use]
    pub fn eof(&self) -> bool {
        self.position >= self.buffer.len()
    }

    /// Total length of the underlying buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the underlying buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Borrows the raw buffer, e.g. for a disassembler walking the same bytes independently.
    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}

/// Failure reading a length-prefixed string off the wire.
#[derive(Debug, thiserror::Error)]
pub enum StringReadError {
    #[error(transparent)]
    UnexpectedEof(#[from] UnexpectedEof),
    #[error("static string payload is not valid UTF-8")]
    InvalidUtf8(std::string::FromUtf8Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_primitives() {
        let mut stream = BytecodeStream::new(vec![0x01, 0x00, 0x00, 0x00, 0xff]);
        assert_eq!(stream.read::<u32>().unwrap(), 1);
        assert_eq!(stream.read::<u8>().unwrap(), 0xff);
        assert!(stream.eof());
    }

    #[test]
    fn reports_unexpected_eof_without_moving_past_end() {
        let mut stream = BytecodeStream::new(vec![0x01]);
        let err = stream.read::<u32>().unwrap_err();
        assert_eq!(err.position, 0);
        assert_eq!(err.wanted, 4);
        assert_eq!(err.available, 1);
        // a failed read must not have advanced the cursor
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn seek_past_end_is_clamped_and_reported_as_eof() {
        let mut stream = BytecodeStream::new(vec![1, 2, 3]);
        stream.seek(100);
        assert!(stream.eof());
        assert_eq!(stream.position(), 3);
    }

    #[test]
    fn reads_length_prefixed_string() {
        let mut buf = vec![];
        buf.extend_from_slice(&5u32.to_le_bytes());
        buf.extend_from_slice(b"hello");
        let mut stream = BytecodeStream::new(buf);
        assert_eq!(stream.read_string_u32_len().unwrap(), "hello");
    }

    #[test]
    fn misaligned_reads_are_permitted() {
        // one byte, then a u32 starting at an odd, non-4-aligned offset
        let mut buf = vec![0xaa];
        buf.extend_from_slice(&0x0102_0304u32.to_le_bytes());
        let mut stream = BytecodeStream::new(buf);
        assert_eq!(stream.read::<u8>().unwrap(), 0xaa);
        assert_eq!(stream.read::<u32>().unwrap(), 0x0102_0304);
    }
}

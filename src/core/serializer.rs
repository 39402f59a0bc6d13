//! Flat wire serialization: a byte-order mark, the total size of the buffer and the
//! serialized fields in native byte order. Readers on a machine of the other endianness
//! detect the swapped mark and correct every primitive they read.

pub type Buffer = Vec<u8>;
pub type BufferSlice<'a> = &'a [u8];

const BOM_VALUE: u16 = 0xA55A;
const BOM_CHANGED_VALUE: u16 = 0x5AA5;

/// Size of the byte-order mark and the size field that start every flat buffer
pub const HEADER_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("demarshalling failed")]
    DemarshallingFailed,
    #[error("byte order mark is not recognised")]
    ByteOrderMarkError,
    #[error("buffer size does not match the announced size of {0} bytes")]
    IncorrectBufferSize(u64),
    #[error("unexpected end of buffer")]
    EndOfBuffer,
}

pub trait Serializer: Sized {
    fn append(&mut self, slice: BufferSlice<'_>);

    #[inline]
    fn serialize<T: Serializable>(&mut self, serializable: &T) {
        serializable.serialize(self);
    }

    #[inline]
    fn serialize_pass<T: Serializable>(&mut self, serializable: T) {
        self.serialize(&serializable)
    }

    fn finalize(self) -> Buffer;

    #[inline]
    fn serialize_raw<T: RawSerializable>(&mut self, serializable: &T) {
        let mut bytes = Vec::with_capacity(T::SIZE);
        serializable.write_ne(&mut bytes);
        self.append(&bytes);
    }

    /// Length prefixed byte string
    #[inline]
    fn serialize_bytes(&mut self, slice: BufferSlice<'_>) {
        self.serialize_raw(&(slice.len() as u64));
        self.append(slice);
    }
}

pub trait Deserializer: Sized {
    fn consume(&mut self, amount: usize) -> Result<BufferSlice<'_>, Error>;
    fn deserialize<T: Serializable>(&mut self) -> Result<T, Error>;
    fn byte_order_correction(&self) -> bool;

    #[inline]
    fn deserialize_raw<T: RawSerializable>(&mut self) -> Result<T, Error> {
        let swap = self.byte_order_correction();
        let value = T::read_ne(self.consume(T::SIZE)?);
        Ok(if swap { value.swap_bytes() } else { value })
    }

    fn deserialize_bytes(&mut self) -> Result<Buffer, Error> {
        let length = self.deserialize_raw::<u64>()?;
        let length = usize::try_from(length).map_err(|_| Error::DemarshallingFailed)?;
        Ok(self.consume(length)?.to_vec())
    }
}

pub trait Serializable
where
    Self: Sized,
{
    fn serialize<T: Serializer>(&self, serializer: &mut T);
    fn deserialize<T: Deserializer>(deserializer: &mut T) -> Result<Self, Error>;
}

pub trait RawSerializable
where
    Self: Sized + Copy,
{
    const SIZE: usize;
    fn write_ne(&self, out: &mut Buffer);
    /// `bytes` is exactly `SIZE` long
    fn read_ne(bytes: BufferSlice<'_>) -> Self;
    fn swap_bytes(self) -> Self;
}

pub struct FlatSerializer {
    buffer: Buffer,
}

impl Default for FlatSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatSerializer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
            .put_bom()
            .put_size_placeholder()
    }

    fn put_bom(mut self) -> Self {
        self.serialize(&BOM_VALUE);
        self
    }

    fn put_size_placeholder(mut self) -> Self {
        self.serialize_pass(0u64);
        self
    }

    fn write_size_to_placeholder(&mut self) {
        let size = (self.buffer.len() as u64).to_ne_bytes();
        self.buffer[2..HEADER_SIZE].copy_from_slice(&size);
    }
}

impl Serializer for FlatSerializer {
    #[inline]
    fn append(&mut self, slice: BufferSlice<'_>) {
        self.buffer.extend_from_slice(slice)
    }

    fn finalize(mut self) -> Buffer {
        self.write_size_to_placeholder();
        self.buffer
    }
}

pub struct FlatDeserializer<'a> {
    buffer: BufferSlice<'a>,
    offset: usize,
    swap_byte_order: bool,
}

impl<'a> FlatDeserializer<'a> {
    /// Validates the header of `buffer`. A buffer whose announced size differs from its
    /// length is reported with [`Error::IncorrectBufferSize`] carrying the announced size.
    pub fn new(buffer: BufferSlice<'a>) -> Result<Self, Error> {
        let mut result = Self {
            buffer,
            offset: 0,
            swap_byte_order: false,
        };

        match result.deserialize::<u16>()? {
            BOM_VALUE => (),
            BOM_CHANGED_VALUE => result.swap_byte_order = true,
            _ => return Err(Error::ByteOrderMarkError),
        }

        let expected_buffer_size = result.deserialize::<u64>()?;
        if expected_buffer_size != buffer.len() as u64 {
            Err(Error::IncorrectBufferSize(expected_buffer_size))
        } else {
            Ok(result)
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset == self.buffer.len()
    }
}

impl<'a> Deserializer for FlatDeserializer<'a> {
    #[inline]
    fn consume(&mut self, amount: usize) -> Result<BufferSlice<'_>, Error> {
        match self.offset.checked_add(amount) {
            Some(end) if end <= self.buffer.len() => {
                let offset = self.offset;
                self.offset = end;
                Ok(&self.buffer[offset..end])
            }
            _ => Err(Error::EndOfBuffer),
        }
    }

    #[inline]
    fn deserialize<T: Serializable>(&mut self) -> Result<T, Error> {
        let offset = self.offset;
        let result = T::deserialize(self);
        if result.is_err() {
            self.offset = offset;
        }
        result
    }

    #[inline]
    fn byte_order_correction(&self) -> bool {
        self.swap_byte_order
    }
}

macro_rules! raw_serializable_impl {
    ($T:ty) => {
        impl Serializable for $T {
            #[inline]
            fn serialize<T: Serializer>(&self, serializer: &mut T) {
                serializer.serialize_raw(self);
            }

            #[inline]
            fn deserialize<T: Deserializer>(deserializer: &mut T) -> Result<Self, Error> {
                deserializer.deserialize_raw::<Self>()
            }
        }

        impl RawSerializable for $T {
            const SIZE: usize = std::mem::size_of::<$T>();

            #[inline]
            fn write_ne(&self, out: &mut Buffer) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            #[inline]
            fn read_ne(bytes: BufferSlice<'_>) -> Self {
                let mut array = [0u8; std::mem::size_of::<$T>()];
                array.copy_from_slice(bytes);
                <$T>::from_ne_bytes(array)
            }

            #[inline]
            fn swap_bytes(self) -> Self {
                <$T>::swap_bytes(self)
            }
        }
    };
}

raw_serializable_impl!(u8);
raw_serializable_impl!(u16);
raw_serializable_impl!(u32);
raw_serializable_impl!(u64);

#[cfg(test)]
mod tests {
    use super::*;

    fn is_little_endian() -> bool {
        BOM_VALUE.to_ne_bytes()[0] == 0x5A
    }

    #[test]
    fn flat_serializer_1byte_test() {
        let mut ser = FlatSerializer::new();
        ser.serialize(&0xAAu8);
        let result = ser.finalize();
        if is_little_endian() {
            assert_eq!(
                result,
                [0x5A, 0xA5, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xAA]
            );
        } else {
            assert_eq!(
                result,
                [0xA5, 0x5A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0B, 0xAA]
            );
        }
    }

    #[test]
    fn flat_deserializer_1byte_test() {
        let buffer: [u8; 11] = if is_little_endian() {
            [0x5A, 0xA5, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xAA]
        } else {
            [0xA5, 0x5A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0B, 0xAA]
        };
        let mut ser = FlatDeserializer::new(&buffer).unwrap();
        assert_eq!(0xAA, ser.deserialize::<u8>().unwrap());
        assert!(ser.is_exhausted());
    }

    #[test]
    fn flat_deserializer_shorter() {
        let buffer: [u8; 10] = if is_little_endian() {
            [0x5A, 0xA5, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        } else {
            [0xA5, 0x5A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0B]
        };
        assert_eq!(
            FlatDeserializer::new(&buffer).err(),
            Some(Error::IncorrectBufferSize(11))
        );
    }

    #[test]
    fn flat_deserializer_header_missing_partly() {
        let buffer: [u8; 8] = if is_little_endian() {
            [0x5A, 0xA5, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x00]
        } else {
            [0xA5, 0x5A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        };
        assert_eq!(FlatDeserializer::new(&buffer).err(), Some(Error::EndOfBuffer));
    }

    #[test]
    fn flat_deserializer_bom_incorrect() {
        let buffer: [u8; 8] = if is_little_endian() {
            [0x5A, 0xA6, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x00]
        } else {
            [0xA6, 0x5A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        };
        assert_eq!(
            FlatDeserializer::new(&buffer).err(),
            Some(Error::ByteOrderMarkError)
        );
    }

    #[test]
    fn flat_deserializer_bom_correction_test() {
        let buffer: [u8; 14] = if is_little_endian() {
            [0xA5, 0x5A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0E, 0xA3, 0xA2, 0xA1, 0xA0]
        } else {
            [0x5A, 0xA5, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xA0, 0xA1, 0xA2, 0xA3]
        };

        let mut ser = FlatDeserializer::new(&buffer).unwrap();
        assert_eq!(ser.deserialize::<u32>().unwrap(), 0xA3A2A1A0);
    }

    #[test]
    fn flat_deserializer_empty() {
        let buffer: [u8; 0] = [];
        assert_eq!(FlatDeserializer::new(&buffer).err(), Some(Error::EndOfBuffer));
    }

    #[test]
    fn byte_strings_keep_their_content() {
        let mut ser = FlatSerializer::new();
        ser.serialize_bytes(b"1 1690000000 Hello from producer!");
        ser.serialize_bytes(b"");
        let buffer = ser.finalize();

        let mut de = FlatDeserializer::new(&buffer).unwrap();
        assert_eq!(
            de.deserialize_bytes().unwrap(),
            b"1 1690000000 Hello from producer!".to_vec()
        );
        assert_eq!(de.deserialize_bytes().unwrap(), Vec::<u8>::new());
        assert_eq!(de.deserialize_bytes(), Err(Error::EndOfBuffer));
    }

    #[test]
    fn byte_string_length_beyond_buffer_is_rejected() {
        let mut ser = FlatSerializer::new();
        ser.serialize(&100u64);
        ser.append(b"short");
        let buffer = ser.finalize();

        let mut de = FlatDeserializer::new(&buffer).unwrap();
        assert_eq!(de.deserialize_bytes(), Err(Error::EndOfBuffer));
    }
}

//! Little-endian primitives shared by the segment codec and the trajectory archive.

use std::io::{self, Read, Write};

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    // Raw LZ4 block; the uncompressed size travels next to it.
    lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

/// Read a `u32` at `offset` of an in-memory buffer. `None` if out of range.
pub fn u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read an `f32` at `offset` of an in-memory buffer. `None` if out of range.
pub fn f32_at(buf: &[u8], offset: usize) -> Option<f32> {
    u32_at(buf, offset).map(f32::from_bits)
}

/// Write an LZ4 chunk.
///
/// Layout:
/// - tag: [u8;4]
/// - len: u32 (bytes following, including the 4-byte uncompressed length)
/// - uncompressed_len: u32
/// - compressed payload bytes
pub fn write_chunk_lz4<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let uncompressed_len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?;
    let total_len = 4u32.saturating_add(
        u32::try_from(compressed.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?,
    );

    w.write_all(&tag)?;
    write_u32_le(w, total_len)?;
    write_u32_le(w, uncompressed_len)?;
    w.write_all(&compressed)
}

/// Read the body of an LZ4 chunk whose header has already been consumed.
pub fn read_chunk_body_lz4<R: Read>(r: &mut R, len: u32) -> io::Result<Vec<u8>> {
    if len < 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "chunk shorter than its length prefix",
        ));
    }
    let uncompressed_len = read_u32_le(r)? as usize;
    let mut compressed = vec![0u8; (len - 4) as usize];
    r.read_exact(&mut compressed)?;
    decompress_lz4(&compressed, uncompressed_len)
}

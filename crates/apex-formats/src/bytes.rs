//! Bounds-checked little-endian reads over an in-memory buffer

use crate::error::{FormatError, FormatResult};

pub(crate) fn slice_at(buf: &[u8], pos: usize, len: usize) -> FormatResult<&[u8]> {
    pos.checked_add(len)
        .and_then(|end| buf.get(pos..end))
        .ok_or(FormatError::OutOfData)
}

fn array_at<const N: usize>(buf: &[u8], pos: usize) -> FormatResult<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(slice_at(buf, pos, N)?);
    Ok(out)
}

pub(crate) fn u8_at(buf: &[u8], pos: usize) -> FormatResult<u8> {
    buf.get(pos).copied().ok_or(FormatError::OutOfData)
}

pub(crate) fn u16_at(buf: &[u8], pos: usize) -> FormatResult<u16> {
    Ok(u16::from_le_bytes(array_at(buf, pos)?))
}

pub(crate) fn u32_at(buf: &[u8], pos: usize) -> FormatResult<u32> {
    Ok(u32::from_le_bytes(array_at(buf, pos)?))
}

pub(crate) fn u64_at(buf: &[u8], pos: usize) -> FormatResult<u64> {
    Ok(u64::from_le_bytes(array_at(buf, pos)?))
}

pub(crate) fn f32_at(buf: &[u8], pos: usize) -> FormatResult<f32> {
    Ok(f32::from_le_bytes(array_at(buf, pos)?))
}

pub(crate) fn f64_at(buf: &[u8], pos: usize) -> FormatResult<f64> {
    Ok(f64::from_le_bytes(array_at(buf, pos)?))
}

/// NUL-terminated string at `pos`, without the terminator
pub(crate) fn strz_at(buf: &[u8], pos: usize) -> FormatResult<Vec<u8>> {
    let tail = buf.get(pos..).ok_or(FormatError::OutOfData)?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(FormatError::OutOfData)?;
    Ok(tail[..end].to_vec())
}

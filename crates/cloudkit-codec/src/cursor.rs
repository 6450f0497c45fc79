//! Byte level reading shared by the codecs that mix ascii headers with
//! ascii or binary bodies.

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endian {
    Little,
    Big,
}

pub(crate) struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Read up to the next `\n`, without the line ending.
    pub(crate) fn read_line(&mut self) -> Option<&'a str> {
        if self.is_at_end() {
            return None;
        }
        let rest = self.remaining();
        let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        self.pos += (end + 1).min(rest.len());
        let line = &rest[..end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        // Header lines are ascii. Anything else is treated as garbage.
        std::str::from_utf8(line).ok()
    }

    /// Skip the rest of the current line, including its line ending.
    pub(crate) fn skip_line(&mut self) {
        let rest = self.remaining();
        let end = rest.iter().position(|&b| b == b'\n').map_or(rest.len(), |i| i + 1);
        self.pos += end;
    }

    pub(crate) fn skip_whitespace(&mut self) {
        while self.pos < self.data.len() && self.data[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    /// Next whitespace separated token.
    pub(crate) fn next_token(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        let rest = self.remaining();
        let end = rest
            .iter()
            .position(u8::is_ascii_whitespace)
            .unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        self.pos += end;
        std::str::from_utf8(&rest[..end]).ok()
    }

    pub(crate) fn parse_token<T: FromStr>(&mut self) -> Option<T> {
        self.next_token().and_then(|t| t.parse().ok())
    }

    pub(crate) fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N).and_then(|b| b.try_into().ok())
    }

    pub(crate) fn read_u16(&mut self, endian: Endian) -> Option<u16> {
        self.take_array().map(|b| match endian {
            Endian::Little => u16::from_le_bytes(b),
            Endian::Big => u16::from_be_bytes(b),
        })
    }

    pub(crate) fn read_u32(&mut self, endian: Endian) -> Option<u32> {
        self.take_array().map(|b| match endian {
            Endian::Little => u32::from_le_bytes(b),
            Endian::Big => u32::from_be_bytes(b),
        })
    }

    pub(crate) fn read_i32(&mut self, endian: Endian) -> Option<i32> {
        self.take_array().map(|b| match endian {
            Endian::Little => i32::from_le_bytes(b),
            Endian::Big => i32::from_be_bytes(b),
        })
    }

    pub(crate) fn read_f32(&mut self, endian: Endian) -> Option<f32> {
        self.take_array().map(|b| match endian {
            Endian::Little => f32::from_le_bytes(b),
            Endian::Big => f32::from_be_bytes(b),
        })
    }

    pub(crate) fn read_f64(&mut self, endian: Endian) -> Option<f64> {
        self.take_array().map(|b| match endian {
            Endian::Little => f64::from_le_bytes(b),
            Endian::Big => f64::from_be_bytes(b),
        })
    }
}

pub(crate) fn put_f32(out: &mut Vec<u8>, value: f32, endian: Endian) {
    match endian {
        Endian::Little => out.extend_from_slice(&value.to_le_bytes()),
        Endian::Big => out.extend_from_slice(&value.to_be_bytes()),
    }
}

pub(crate) fn put_i32(out: &mut Vec<u8>, value: i32, endian: Endian) {
    match endian {
        Endian::Little => out.extend_from_slice(&value.to_le_bytes()),
        Endian::Big => out.extend_from_slice(&value.to_be_bytes()),
    }
}

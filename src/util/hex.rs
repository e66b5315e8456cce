//! Hex formatting for raw page bytes.

use std::fmt;

/// Compact lowercase hex, e.g. `"4a2f00ff"`.
pub fn format_bytes(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Classic 16-bytes-per-line dump with an offset column and ASCII sidebar.
///
/// ```text
/// 00000000  00 01 02 03 04 05 06 07  08 09 0a 0b 0c 0d 0e 0f  |................|
/// ```
///
/// Lines that are entirely zero after the first are folded into a single
/// `*` line, which keeps dumps of sparsely filled pages short.
pub struct HexDump<'a> {
    data: &'a [u8],
    base_offset: u64,
    fold_zeros: bool,
}

impl<'a> HexDump<'a> {
    pub fn new(data: &'a [u8], base_offset: u64) -> Self {
        HexDump {
            data,
            base_offset,
            fold_zeros: true,
        }
    }

    /// Print every line, zero runs included.
    pub fn unfolded(mut self) -> Self {
        self.fold_zeros = false;
        self
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, offset: u64, chunk: &[u8]) -> fmt::Result {
    write!(f, "{:08x}  ", offset)?;
    for i in 0..16 {
        if i == 8 {
            f.write_str(" ")?;
        }
        match chunk.get(i) {
            Some(b) => write!(f, "{:02x} ", b)?,
            None => f.write_str("   ")?,
        }
    }
    f.write_str(" |")?;
    for &b in chunk {
        let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
        write!(f, "{}", c)?;
    }
    write!(f, "{:width$}|", "", width = 16 - chunk.len())
}

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut folded = false;
        let mut first = true;
        for (i, chunk) in self.data.chunks(16).enumerate() {
            let offset = self.base_offset + (i * 16) as u64;
            let zero = chunk.len() == 16 && chunk.iter().all(|&b| b == 0);
            if self.fold_zeros && zero && !first {
                if !folded {
                    f.write_str("\n*")?;
                    folded = true;
                }
                continue;
            }
            folded = false;
            if !first {
                f.write_str("\n")?;
            }
            write_line(f, offset, chunk)?;
            first = false;
        }
        Ok(())
    }
}

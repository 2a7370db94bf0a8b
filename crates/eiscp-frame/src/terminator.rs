use std::fmt;

/// A trailing byte sequence that closes an eISCP frame.
///
/// The protocol never announces which sequence a unit expects or emits, so
/// both sides of the codec have to try every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Terminator {
    /// `1A 0D 0A`
    EofCrLf,
    /// `19 0D 0A`
    EmCrLf,
    /// `0D 0A`
    CrLf,
    /// `1A 0D`
    EofCr,
    /// `0A`
    Lf,
    /// `0D`
    Cr,
    /// `1A`
    Eof,
}

/// Every terminator, longest first.
///
/// Decoding must walk this order: `0A` is a suffix of `0D 0A`, which is a
/// suffix of `1A 0D 0A`, so a shorter match tried first would leave the
/// remaining terminator bytes in the decoded body.
pub const CATALOG: [Terminator; 7] = [
    Terminator::EofCrLf,
    Terminator::EmCrLf,
    Terminator::CrLf,
    Terminator::EofCr,
    Terminator::Lf,
    Terminator::Cr,
    Terminator::Eof,
];

/// Longest terminator in [`CATALOG`].
pub const MAX_TERMINATOR_LEN: usize = 3;

impl Terminator {
    /// Raw bytes written after the frame body.
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Terminator::EofCrLf => &[0x1A, 0x0D, 0x0A],
            Terminator::EmCrLf => &[0x19, 0x0D, 0x0A],
            Terminator::CrLf => &[0x0D, 0x0A],
            Terminator::EofCr => &[0x1A, 0x0D],
            Terminator::Lf => &[0x0A],
            Terminator::Cr => &[0x0D],
            Terminator::Eof => &[0x1A],
        }
    }

    pub const fn len(self) -> usize {
        self.as_bytes().len()
    }

    /// The catalog in match order.
    pub fn all() -> &'static [Terminator] {
        &CATALOG
    }

    /// Find the terminator that closes `data`, preferring the longest match.
    pub fn detect(data: &[u8]) -> Option<Terminator> {
        CATALOG
            .iter()
            .copied()
            .find(|terminator| data.ends_with(terminator.as_bytes()))
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0x")?;
        for byte in self.as_bytes() {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

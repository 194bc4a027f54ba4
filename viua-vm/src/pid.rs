//! Process identifiers.

/// A 16-byte process identifier.
///
/// Pids are allocated by the core and are unique within it. The payload is
/// opaque to programs; the only operations are comparison and sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid([u8; 16]);

impl Pid {
    /// Construct a pid from a core-local sequence number.
    pub(crate) fn from_sequence(sequence: u64) -> Self {
        let mut raw = [0u8; 16];
        raw[..8].copy_from_slice(b"viuaproc");
        raw[8..].copy_from_slice(&sequence.to_le_bytes());
        Self(raw)
    }

    /// The raw bytes of the identifier.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let raw = &self.0;
        for (i, byte) in raw.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

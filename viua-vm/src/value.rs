//! Tagged value cells.

use crate::pid::Pid;

/// A value held in a register.
///
/// Cells are owned exclusively by their register slot; every variant is a
/// plain bit pattern, so values copy freely. Boxed containers are not part
/// of this instruction set.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum Value {
    /// The empty cell.
    #[default]
    Void,
    /// Signed 64-bit integer.
    Int(i64),
    /// Unsigned 64-bit integer.
    Uint(u64),
    /// Single-precision float.
    Float(f32),
    /// Double-precision float.
    Double(f64),
    /// Interned atom, keyed into the process's atom table.
    Atom(u64),
    /// Process identifier.
    Pid(Pid),
    /// Address into process memory, keyed into the pointer map.
    Pointer(u64),
    /// Raw bytes produced by a memory load.
    Undefined([u8; 8]),
}

impl Value {
    /// Is this the empty cell?
    pub const fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Short type tag used in diagnostics and the trace dump.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Int(_) => "is",
            Self::Uint(_) => "iu",
            Self::Float(_) => "fl",
            Self::Double(_) => "db",
            Self::Atom(_) => "atom",
            Self::Pid(_) => "pid",
            Self::Pointer(_) => "ptr",
            Self::Undefined(_) => "raw",
        }
    }

    /// Numeric cast to a signed integer.
    pub fn cast_to_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(v) => Some(v),
            Self::Uint(v) => Some(v as i64),
            Self::Float(v) => Some(v as i64),
            Self::Double(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Numeric cast to an unsigned integer.
    pub fn cast_to_u64(&self) -> Option<u64> {
        match *self {
            Self::Int(v) => Some(v as u64),
            Self::Uint(v) => Some(v),
            Self::Float(v) => Some(v as u64),
            Self::Double(v) => Some(v as u64),
            _ => None,
        }
    }

    /// Numeric cast to a single-precision float.
    pub fn cast_to_f32(&self) -> Option<f32> {
        match *self {
            Self::Int(v) => Some(v as f32),
            Self::Uint(v) => Some(v as f32),
            Self::Float(v) => Some(v),
            Self::Double(v) => Some(v as f32),
            _ => None,
        }
    }

    /// Numeric cast to a double-precision float.
    pub fn cast_to_f64(&self) -> Option<f64> {
        match *self {
            Self::Int(v) => Some(v as f64),
            Self::Uint(v) => Some(v as f64),
            Self::Float(v) => Some(v.into()),
            Self::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Truthiness, for branch conditions and logical operators.
    ///
    /// Void has no truth value; atoms, pids and pointers are truthy by
    /// virtue of existing.
    pub fn cast_to_bool(&self) -> Option<bool> {
        match *self {
            Self::Void => None,
            Self::Int(v) => Some(v != 0),
            Self::Uint(v) => Some(v != 0),
            Self::Float(v) => Some(v != 0.0),
            Self::Double(v) => Some(v != 0.0),
            Self::Atom(_) | Self::Pid(_) => Some(true),
            Self::Pointer(addr) => Some(addr != 0),
            Self::Undefined(_) => None,
        }
    }

    /// The raw bytes of the cell, as a memory store would write them.
    pub fn as_memory(&self) -> [u8; 8] {
        match *self {
            Self::Void => [0; 8],
            Self::Int(v) => v.to_le_bytes(),
            Self::Uint(v) => v.to_le_bytes(),
            Self::Float(v) => {
                let mut raw = [0u8; 8];
                raw[..4].copy_from_slice(&v.to_bits().to_le_bytes());
                raw
            }
            Self::Double(v) => v.to_bits().to_le_bytes(),
            Self::Atom(v) => v.to_le_bytes(),
            Self::Pid(pid) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&pid.as_bytes()[..8]);
                raw
            }
            Self::Pointer(addr) => addr.to_le_bytes(),
            Self::Undefined(raw) => raw,
        }
    }
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Int(v) => write!(f, "is {v}"),
            Self::Uint(v) => write!(f, "iu {v}"),
            Self::Float(v) => write!(f, "fl {v}"),
            Self::Double(v) => write!(f, "db {v}"),
            Self::Atom(key) => write!(f, "atom {key:#x}"),
            Self::Pid(pid) => write!(f, "pid {pid}"),
            Self::Pointer(addr) => write!(f, "ptr {addr:#018x}"),
            Self::Undefined(raw) => write!(f, "raw {raw:02x?}"),
        }
    }
}

use std::fmt;

/// Element types a tensor can be stored as.
///
/// Only `F32` participates in compute kernels; the others exist so data can
/// be loaded, cast and stored without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    F16,
    BF16,
    #[default]
    F32,
    F64,
    I8,
    U8,
    I32,
    I64,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn element_size(&self) -> usize {
        match self {
            DType::F16 | DType::BF16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
            DType::I8 | DType::U8 => 1,
            DType::I32 => 4,
            DType::I64 => 8,
        }
    }

    /// Number of bytes needed to store `n` elements of this dtype.
    pub fn storage_bytes(&self, n: usize) -> usize {
        self.element_size() * n
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DType::I8 | DType::U8 | DType::I32 | DType::I64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F16 => write!(f, "f16"),
            DType::BF16 => write!(f, "bf16"),
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
            DType::I8 => write!(f, "i8"),
            DType::U8 => write!(f, "u8"),
            DType::I32 => write!(f, "i32"),
            DType::I64 => write!(f, "i64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(DType::F32.element_size(), 4);
        assert_eq!(DType::BF16.element_size(), 2);
        assert_eq!(DType::I64.storage_bytes(3), 24);
    }

    #[test]
    fn test_classification() {
        assert!(DType::F16.is_float());
        assert!(!DType::F16.is_integer());
        assert!(DType::U8.is_integer());
        assert_eq!(DType::default(), DType::F32);
        assert_eq!(DType::BF16.to_string(), "bf16");
    }
}

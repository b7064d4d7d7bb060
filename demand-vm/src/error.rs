use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmapError {
    /// 不接受空地址
    NullAddress,
    /// 地址没有页对齐
    Misaligned,
    /// 范围内已存在映射
    AlreadyMapped,
    /// 空文件没有可映射的内容
    EmptyFile,
    /// 没有这个映射号
    BadMapId,
}

impl fmt::Display for MmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullAddress => write!(f, "null address"),
            Self::Misaligned => write!(f, "address not page-aligned"),
            Self::AlreadyMapped => write!(f, "range overlaps an existing mapping"),
            Self::EmptyFile => write!(f, "cannot map an empty file"),
            Self::BadMapId => write!(f, "no such mapping"),
        }
    }
}

impl Error for MmapError {}

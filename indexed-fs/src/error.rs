use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 空闲位图耗尽，所在操作整体失败
    NoSpace,
    /// 字节偏移超出三级索引的寻址能力
    OutOfRange,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpace => write!(f, "no free sector on device"),
            Self::OutOfRange => write!(f, "offset beyond double-indirect capacity"),
        }
    }
}

impl core::error::Error for FsError {}

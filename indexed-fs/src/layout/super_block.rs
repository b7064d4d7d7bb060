use core::{mem, ptr, slice};

use crate::MAGIC;

/// 超级块：
/// - 提供卷合法性校验；
/// - 定位空闲位图区域
#[derive(Debug)]
#[repr(C)]
pub struct SuperBlock {
    /// 魔数：用于校验卷的合法性
    magic: u32,
    /// 卷占据的扇区总数
    pub total_sectors: u32,
    /// 空闲位图占用扇区数，位图自1号扇区起
    pub free_map_sectors: u32,
}

impl SuperBlock {
    pub const SIZE: usize = mem::size_of::<Self>();

    #[inline]
    pub const fn zeroed() -> Self {
        Self {
            magic: 0,
            total_sectors: 0,
            free_map_sectors: 0,
        }
    }

    #[inline]
    pub fn init(&mut self, total_sectors: u32, free_map_sectors: u32) {
        *self = Self {
            magic: MAGIC,
            total_sectors,
            free_map_sectors,
        };
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), Self::SIZE) }
    }
}

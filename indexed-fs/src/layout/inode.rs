//! 磁盘 inode 与多级索引
//!
//! 文件的数据扇区由三级指针寻址：
//! - 直接指针覆盖开头 124 个扇区；
//! - 一级间接指针指向一个索引扇区，再覆盖 128 个扇区；
//! - 二级间接指针指向一个外层索引扇区，其每项各指向一个
//!   内层索引扇区，共再覆盖 128×128 个扇区。
//!
//! 指针值为 0 表示**未分配**：0号扇区是超级块，
//! 永远不会充当文件数据，故无歧义。

use core::{mem, ptr, slice};

use sector_dev::SECTOR_SIZE;

use crate::MAGIC;
use crate::error::FsError;
use crate::layout::Bitmap;
use crate::sector_cache::SectorCache;

/// 索引扇区的指针容量
const INDIRECT_COUNT: usize = SECTOR_SIZE / 4;
/// 直接指针数量，凑成磁盘 inode 恰好一个扇区
const DIRECT_COUNT: usize = 124;

/// 只用直接指针时的扇区容量
const DIRECT_CAP: usize = DIRECT_COUNT;
/// 用上一级索引时的扇区容量
const INDIRECT1_CAP: usize = DIRECT_CAP + INDIRECT_COUNT;
/// 用上二级索引时的扇区容量
const INDIRECT2_CAP: usize = INDIRECT1_CAP + INDIRECT_COUNT * INDIRECT_COUNT;

/// 磁盘 inode，序列化后恰好一个扇区
#[repr(C)]
pub struct DiskInode {
    /// 文件长度（字节），磁盘布局用4字节有符号数
    length: i32,
    /// 合法性标记
    magic: u32,
    /// 直接指针
    direct: [u32; DIRECT_COUNT],
    /// 一级间接指针
    indirect1: u32,
    /// 二级间接指针
    indirect2: u32,
}

const _: () = assert!(mem::size_of::<DiskInode>() == SECTOR_SIZE);

/// 字节偏移的归类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorLocation {
    /// 直接指针的下标
    Direct(usize),
    /// 一级索引扇区内的下标
    Indirect(usize),
    /// 二级索引：外层表下标与内层表下标
    DoubleIndirect { outer: usize, inner: usize },
    /// 超出三级索引的寻址能力
    OutOfRange,
}

impl DiskInode {
    /// 文件长度的上限（字节）
    pub const MAX_LENGTH: usize = INDIRECT2_CAP * SECTOR_SIZE;

    pub const fn new() -> Self {
        Self {
            length: 0,
            magic: MAGIC,
            direct: [0; DIRECT_COUNT],
            indirect1: 0,
            indirect2: 0,
        }
    }

    #[inline]
    pub fn init(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length.max(0) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 把字节偏移归类到某级索引
    pub fn locate(offset: usize) -> SectorLocation {
        let index = offset / SECTOR_SIZE;

        if index < DIRECT_CAP {
            SectorLocation::Direct(index)
        } else if index < INDIRECT1_CAP {
            SectorLocation::Indirect(index - DIRECT_CAP)
        } else if index < INDIRECT2_CAP {
            let index = index - INDIRECT1_CAP;
            SectorLocation::DoubleIndirect {
                outer: index / INDIRECT_COUNT,
                inner: index % INDIRECT_COUNT,
            }
        } else {
            SectorLocation::OutOfRange
        }
    }

    /// 读路径：把字节偏移解析成数据扇区编号。
    /// 偏移不小于文件长度，或相应指针未分配，都视作未映射。
    pub fn resolve(&self, offset: usize, cache: &SectorCache) -> Option<u32> {
        if offset >= self.len() {
            return None;
        }

        let sector = match Self::locate(offset) {
            SectorLocation::Direct(index) => self.direct[index],
            SectorLocation::Indirect(index) => {
                if self.indirect1 == 0 {
                    return None;
                }
                read_entry(cache, self.indirect1, index)
            }
            SectorLocation::DoubleIndirect { outer, inner } => {
                if self.indirect2 == 0 {
                    return None;
                }
                let table = read_entry(cache, self.indirect2, outer);
                if table == 0 {
                    return None;
                }
                read_entry(cache, table, inner)
            }
            SectorLocation::OutOfRange => return None,
        };

        (sector != 0).then_some(sector)
    }

    /// 把新分配的数据扇区编号登记到正确的槽位。
    /// 索引扇区在首次用到时才懒分配，新索引扇区先清零再使用。
    pub fn register_sector(
        &mut self,
        new_sector: u32,
        location: SectorLocation,
        cache: &SectorCache,
        free_map: &Bitmap,
    ) -> Result<(), FsError> {
        match location {
            SectorLocation::Direct(index) => self.direct[index] = new_sector,
            SectorLocation::Indirect(index) => {
                if self.indirect1 == 0 {
                    self.indirect1 = alloc_index_sector(cache, free_map)?;
                }
                write_entry(cache, self.indirect1, index, new_sector);
            }
            SectorLocation::DoubleIndirect { outer, inner } => {
                if self.indirect2 == 0 {
                    self.indirect2 = alloc_index_sector(cache, free_map)?;
                }

                let mut table = read_entry(cache, self.indirect2, outer);
                if table == 0 {
                    table = alloc_index_sector(cache, free_map)?;
                    write_entry(cache, self.indirect2, outer, table);
                }

                write_entry(cache, table, inner, new_sector);
            }
            SectorLocation::OutOfRange => return Err(FsError::OutOfRange),
        }

        Ok(())
    }

    /// 为 [old_end, new_end) 中每个扇区对齐的空洞分配新扇区，
    /// 登记并清零，最后把长度更新为 `new_end`。
    ///
    /// 空间中途耗尽时，长度停在已完整分配的扇区边界上，
    /// 文件保持合法（只是多占了些空间），并向调用者报告失败。
    pub fn grow(
        &mut self,
        old_end: usize,
        new_end: usize,
        cache: &SectorCache,
        free_map: &Bitmap,
    ) -> Result<(), FsError> {
        assert!(old_end <= new_end);
        if new_end > Self::MAX_LENGTH {
            return Err(FsError::OutOfRange);
        }

        let allocated = old_end.div_ceil(SECTOR_SIZE);
        let needed = new_end.div_ceil(SECTOR_SIZE);

        for index in allocated..needed {
            let result = free_map
                .alloc(cache)
                .ok_or(FsError::NoSpace)
                .and_then(|sector| {
                    self.register_sector(sector, Self::locate(index * SECTOR_SIZE), cache, free_map)
                        .map(|_| sector)
                });

            match result {
                Ok(sector) => cache.write(sector as usize, &[0; SECTOR_SIZE], 0),
                Err(e) => {
                    self.length = (index * SECTOR_SIZE).min(new_end).max(old_end) as i32;
                    return Err(e);
                }
            }
        }

        self.length = new_end as i32;
        Ok(())
    }

    /// 释放文件占用的全部扇区：
    /// 先拆二级索引（内层表在先，外层表在后），
    /// 再拆一级索引，最后是直接指针。
    /// 只在最后一个打开者关闭已删除的 inode 时调用。
    pub fn free_all_sectors(&mut self, cache: &SectorCache, free_map: &Bitmap) {
        if self.indirect2 != 0 {
            for outer in 0..INDIRECT_COUNT {
                let table = read_entry(cache, self.indirect2, outer);
                if table == 0 {
                    continue;
                }
                for inner in 0..INDIRECT_COUNT {
                    let sector = read_entry(cache, table, inner);
                    if sector != 0 {
                        free_map.dealloc(cache, sector);
                    }
                }
                free_map.dealloc(cache, table);
            }
            free_map.dealloc(cache, self.indirect2);
            self.indirect2 = 0;
        }

        if self.indirect1 != 0 {
            for index in 0..INDIRECT_COUNT {
                let sector = read_entry(cache, self.indirect1, index);
                if sector != 0 {
                    free_map.dealloc(cache, sector);
                }
            }
            free_map.dealloc(cache, self.indirect1);
            self.indirect1 = 0;
        }

        for sector in self.direct.iter_mut().filter(|s| **s != 0) {
            free_map.dealloc(cache, *sector);
            *sector = 0;
        }

        self.length = 0;
    }

    /// 从指定字节偏移读出数据填充 `buf`，返回实际读取的字节数；
    /// 读取范围被文件长度截断
    pub fn read_at(&self, offset: usize, buf: &mut [u8], cache: &SectorCache) -> usize {
        let mut start = offset;
        let end = (offset + buf.len()).min(self.len());
        if start >= end {
            return 0;
        }

        let mut read_size = 0;
        while start < end {
            // 当前扇区的末地址（字节）
            let current_end = (start / SECTOR_SIZE + 1) * SECTOR_SIZE;
            let chunk = current_end.min(end) - start;

            let Some(sector) = self.resolve(start, cache) else {
                break;
            };
            cache.read(
                sector as usize,
                &mut buf[read_size..read_size + chunk],
                start % SECTOR_SIZE,
            );

            read_size += chunk;
            start += chunk;
        }

        read_size
    }

    /// 把 `buf` 写到指定字节偏移，返回实际写入的字节数；
    /// 写入范围被文件长度截断，扩容由上层先行完成
    pub fn write_at(&self, offset: usize, buf: &[u8], cache: &SectorCache) -> usize {
        let mut start = offset;
        let end = (offset + buf.len()).min(self.len());
        if start >= end {
            return 0;
        }

        let mut written_size = 0;
        while start < end {
            let current_end = (start / SECTOR_SIZE + 1) * SECTOR_SIZE;
            let chunk = current_end.min(end) - start;

            let Some(sector) = self.resolve(start, cache) else {
                break;
            };
            cache.write(
                sector as usize,
                &buf[written_size..written_size + chunk],
                start % SECTOR_SIZE,
            );

            written_size += chunk;
            start += chunk;
        }

        written_size
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), SECTOR_SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), SECTOR_SIZE) }
    }
}

impl Default for DiskInode {
    fn default() -> Self {
        Self::new()
    }
}

/// 取索引扇区第 `index` 项的扇区编号
fn read_entry(cache: &SectorCache, table: u32, index: usize) -> u32 {
    let mut raw = [0; 4];
    cache.read(table as usize, &mut raw, index * 4);
    u32::from_le_bytes(raw)
}

/// 改写索引扇区的第 `index` 项
fn write_entry(cache: &SectorCache, table: u32, index: usize, sector: u32) {
    cache.write(table as usize, &sector.to_le_bytes(), index * 4);
}

/// 分配并清零一个新索引扇区
fn alloc_index_sector(cache: &SectorCache, free_map: &Bitmap) -> Result<u32, FsError> {
    let sector = free_map.alloc(cache).ok_or(FsError::NoSpace)?;
    cache.write(sector as usize, &[0; SECTOR_SIZE], 0);
    Ok(sector)
}

//! # 扇区设备接口层
//!
//! 块设备以**扇区**为单位存取数据，例如磁盘、U盘等；
//! [`SectorDevice`] 就是对读写此类设备的抽象，
//! 实现了此特质的类型称为**扇区设备驱动**。
//!
//! 文件系统一侧经由扇区缓存读写设备；
//! 交换区为了吞吐量直接读写设备，不走缓存。

#![no_std]

use core::any::Any;

/// 扇区大小（字节），设备I/O的最小单位
pub const SECTOR_SIZE: usize = 512;

/// 扇区设备驱动特质
pub trait SectorDevice: Send + Sync + Any {
    fn read_sector(&self, sector: usize, buf: &mut [u8]);
    fn write_sector(&self, sector: usize, buf: &[u8]);

    /// 设备的扇区总数
    fn sector_count(&self) -> usize;
}

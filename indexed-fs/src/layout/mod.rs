//! # 磁盘数据结构层
//!
//! 磁盘布局：
//! 超级块 | 空闲位图 | 数据区域
//!
//! inode 与其指向的数据扇区都从数据区域分配，
//! 位图一位对应设备一个扇区。

mod super_block;
pub use super_block::SuperBlock;

mod bitmap;
pub use bitmap::Bitmap;

mod inode;
pub use inode::{DiskInode, SectorLocation};

//! # 索引式文件系统
//!
//! 教学操作系统的存储核心：定容扇区缓存、
//! 直接/一级间接/二级间接索引的 inode 分配器，
//! 以及由空闲位图管理的磁盘卷。

#![no_std]

extern crate alloc;

/* 整体架构，自上而下 */

// 索引节点层：内存中的文件句柄，读写与扩容逻辑
mod inode;

// 磁盘卷管理层：格式化、空闲位图、句柄注册表
mod fs;

// 磁盘数据结构层：超级块、空闲位图、磁盘 inode
mod layout;

// 扇区缓存层：内存上的磁盘扇区缓存，时钟置换
mod sector_cache;

mod error;

pub use self::{
    error::FsError,
    fs::IndexedFs,
    inode::Inode,
    layout::{DiskInode, SectorLocation},
    sector_cache::{CacheStats, SectorCache},
};
pub use sector_dev::{SECTOR_SIZE, SectorDevice};

/// 魔数 "INOD"，兼当磁盘 inode 的合法性标记
pub const MAGIC: u32 = 0x494e_4f44;
pub const SECTOR_BITS: usize = SECTOR_SIZE * 8;

type DataSector = [u8; SECTOR_SIZE];

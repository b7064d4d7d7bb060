//! # 索引节点层
//!
//! 内存中的文件句柄。句柄由 [`IndexedFs`] 的注册表按扇区号发放，
//! 引用计数归零时最后一次释放；被标记删除的文件此时才归还扇区。

use alloc::sync::Arc;
use core::sync::atomic::{
    AtomicBool, AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};

use spin::Mutex;

use crate::error::FsError;
use crate::fs::IndexedFs;
use crate::layout::DiskInode;

pub struct Inode {
    /// 磁盘 inode 所在扇区
    sector: u32,
    fs: Arc<IndexedFs>,
    /// 删除标记：最后一个打开者关闭时清算
    removed: AtomicBool,
    /// 大于零则拒绝写入
    deny_write: AtomicUsize,
    /// 扩容串行锁：判断是否越过文件末尾、分配扇区、
    /// 登记指针、落盘长度，全程持有
    extend: Mutex<()>,
}

impl Inode {
    pub(crate) fn new(sector: u32, fs: Arc<IndexedFs>) -> Self {
        Self {
            sector,
            fs,
            removed: AtomicBool::new(false),
            deny_write: AtomicUsize::new(0),
            extend: Mutex::new(()),
        }
    }

    #[inline]
    pub fn sector(&self) -> u32 {
        self.sector
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.load().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 从指定偏移读出数据填充 `buf`，返回实际读取的字节数；
    /// 越过文件末尾的部分不读
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.load().read_at(offset, buf, self.fs.cache())
    }

    /// 把 `buf` 写到指定偏移，必要时先扩容文件。
    /// 空间不足时整个写入失败；拒写期间写入 0 字节。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, FsError> {
        if self.deny_write.load(Acquire) > 0 {
            return Ok(0);
        }

        let cache = self.fs.cache();
        let extend = self.extend.lock();
        let mut disk_inode = self.load();

        let end = offset + buf.len();
        if end > disk_inode.len() {
            let result = disk_inode.grow(disk_inode.len(), end, cache, self.fs.free_map());
            // 长度与指针一并落盘，失败也不例外
            cache.write(self.sector as usize, disk_inode.as_bytes(), 0);
            result?;
        }
        drop(extend);

        Ok(disk_inode.write_at(offset, buf, cache))
    }

    /// 标记删除；真正的清算推迟到最后一个打开者关闭时
    #[inline]
    pub fn remove(&self) {
        self.removed.store(true, Release);
    }

    #[inline]
    pub fn deny_write(&self) {
        self.deny_write.fetch_add(1, Release);
    }

    pub fn allow_write(&self) {
        let prev = self.deny_write.fetch_sub(1, Release);
        assert!(prev > 0);
    }

    fn load(&self) -> DiskInode {
        let mut disk_inode = DiskInode::new();
        self.fs
            .cache()
            .read(self.sector as usize, disk_inode.as_bytes_mut(), 0);
        debug_assert!(disk_inode.is_valid());
        disk_inode
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        self.fs
            .release_inode(self.sector, self.removed.load(Relaxed));
    }
}

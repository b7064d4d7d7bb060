//! # 扇区缓存层
//!
//! 设备读写速度远慢于内存，因此在内存中开辟定容缓冲池，
//! 把即将操作的扇区复制进来，命中时直接在内存上读写。
//!
//! 池满时以时钟算法挑选受害者：访问位为真则清零并前进，
//! 第一个访问位为假的条目被换出（脏则先写回设备）。
//!
//! ## 锁的划分
//!
//! 每个条目各有一把锁，保护其标志位与数据；
//! 时钟指针另有一把专用锁，查找与选定受害者的全过程都持有它，
//! 因此同一扇区同时至多出现在一个条目中，
//! 两个线程也不会并发推动指针。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};

use log::trace;
use spin::{Mutex, MutexGuard};

use sector_dev::{SECTOR_SIZE, SectorDevice};

use crate::DataSector;

/// 定容扇区缓存池
pub struct SectorCache {
    device: Arc<dyn SectorDevice>,
    entries: Vec<Mutex<CacheEntry>>,
    /// 时钟指针，兼作全表扫描锁
    hand: Mutex<usize>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    evictions: AtomicUsize,
    writebacks: AtomicUsize,
}

/// 缓存条目：数据块只换内容，不换位置
struct CacheEntry {
    sector: usize,
    in_use: bool,
    dirty: bool,
    accessed: bool,
    data: DataSector,
}

/// 缓存运行统计的快照
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub evictions: usize,
    pub writebacks: usize,
}

impl SectorCache {
    /// 缓存条目数的默认上限
    pub const CAPACITY: usize = 64;

    #[inline]
    pub fn new(device: Arc<dyn SectorDevice>) -> Self {
        Self::with_capacity(device, Self::CAPACITY)
    }

    pub fn with_capacity(device: Arc<dyn SectorDevice>, capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            device,
            entries: (0..capacity)
                .map(|_| Mutex::new(CacheEntry::empty()))
                .collect(),
            hand: Mutex::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            evictions: AtomicUsize::new(0),
            writebacks: AtomicUsize::new(0),
        }
    }

    /// 把 `sector` 扇区自 `offset` 起的字节复制进 `dst`
    pub fn read(&self, sector: usize, dst: &mut [u8], offset: usize) {
        assert!(offset + dst.len() <= SECTOR_SIZE);
        let mut entry = self.acquire(sector, false);
        dst.copy_from_slice(&entry.data[offset..offset + dst.len()]);
        entry.accessed = true;
    }

    /// 把 `src` 复制到 `sector` 扇区自 `offset` 起的位置。
    ///
    /// 未命中时是读改写语义：先从设备读入整个扇区再改其中一段；
    /// 唯有整扇区覆写可以跳过读设备。
    pub fn write(&self, sector: usize, src: &[u8], offset: usize) {
        assert!(offset + src.len() <= SECTOR_SIZE);
        let overwrite = offset == 0 && src.len() == SECTOR_SIZE;
        let mut entry = self.acquire(sector, overwrite);
        entry.data[offset..offset + src.len()].copy_from_slice(src);
        entry.accessed = true;
        entry.dirty = true;
    }

    /// 关停前显式写回全部脏条目
    pub fn flush_all(&self) {
        for entry in &self.entries {
            self.flush_entry(&mut entry.lock());
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Relaxed),
            misses: self.misses.load(Relaxed),
            evictions: self.evictions.load(Relaxed),
            writebacks: self.writebacks.load(Relaxed),
        }
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn SectorDevice> {
        &self.device
    }
}

impl SectorCache {
    /// 命中则返回既有条目，未命中则占用空位或驱逐一个条目，
    /// 换入目标扇区。返回时持有条目锁。
    ///
    /// `overwrite` 表示调用者将覆写整个扇区，换入时无需读设备。
    fn acquire(&self, sector: usize, overwrite: bool) -> MutexGuard<'_, CacheEntry> {
        let mut hand = self.hand.lock();
        let hand = &mut *hand;

        if let Some(slot) = self.lookup(sector) {
            self.hits.fetch_add(1, Relaxed);
            return self.entries[slot].lock();
        }

        self.misses.fetch_add(1, Relaxed);
        trace!("sector cache miss: #{sector}");

        // 先找空位，没有才进入时钟扫描
        let slot = self
            .entries
            .iter()
            .position(|entry| !entry.lock().in_use)
            .unwrap_or_else(|| self.select_victim(hand));

        let mut entry = self.entries[slot].lock();
        if entry.in_use && entry.dirty {
            self.writebacks.fetch_add(1, Relaxed);
            self.device.write_sector(entry.sector, &entry.data);
        }

        entry.sector = sector;
        entry.in_use = true;
        entry.dirty = false;
        entry.accessed = false;
        if overwrite {
            entry.data.fill(0);
        } else {
            self.device.read_sector(sector, &mut entry.data);
        }

        entry
    }

    /// 线性扫描在用条目，未命中则返回空
    fn lookup(&self, sector: usize) -> Option<usize> {
        self.entries.iter().position(|entry| {
            let entry = entry.lock();
            entry.in_use && entry.sector == sector
        })
    }

    /// 时钟扫描挑选受害者，指针越过选中的条目。
    /// 池满之后所有条目都在用，扫描必然终止。
    fn select_victim(&self, hand: &mut usize) -> usize {
        loop {
            let slot = *hand;
            *hand = (*hand + 1) % self.entries.len();

            let mut entry = self.entries[slot].lock();
            debug_assert!(entry.in_use);
            if entry.accessed {
                entry.accessed = false;
            } else {
                self.evictions.fetch_add(1, Relaxed);
                trace!("sector cache evicts #{}", entry.sector);
                return slot;
            }
        }
    }

    /// 写回单个条目
    fn flush_entry(&self, entry: &mut CacheEntry) {
        if entry.in_use && entry.dirty {
            self.writebacks.fetch_add(1, Relaxed);
            self.device.write_sector(entry.sector, &entry.data);
            entry.dirty = false;
        }
    }
}

impl Drop for SectorCache {
    fn drop(&mut self) {
        self.flush_all();
    }
}

impl CacheEntry {
    const fn empty() -> Self {
        Self {
            sector: 0,
            in_use: false,
            dirty: false,
            accessed: false,
            data: [0; SECTOR_SIZE],
        }
    }
}

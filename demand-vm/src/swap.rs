//! 交换区：专用扇区设备上按页划分的槽位。
//! 为了吞吐量直接读写设备，不经过扇区缓存。

use std::sync::{Arc, Mutex};

use log::trace;

use sector_dev::{SECTOR_SIZE, SectorDevice};

use crate::PAGE_SIZE;

/// 一页对应的扇区数
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// 交换槽句柄。持有即拥有：占位标志独立于槽号，
/// 0号槽与"未换出"不再混同。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapSlot(usize);

pub struct SwapStore {
    device: Arc<dyn SectorDevice>,
    /// 一位对应一个槽；扫描并翻转在锁内完成，
    /// 两个并发的置换不会拿到同一个槽
    bitmap: Mutex<Vec<u64>>,
    slots: usize,
}

impl SwapStore {
    pub fn new(device: Arc<dyn SectorDevice>) -> Self {
        let slots = device.sector_count() / SECTORS_PER_PAGE;
        assert!(slots > 0);
        Self {
            device,
            bitmap: Mutex::new(vec![0; slots.div_ceil(64)]),
            slots,
        }
    }

    /// 槽位总数
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots
    }

    /// 原子地认领首个空闲槽。
    /// 交换区耗尽没有恢复路径：调页器本应把
    /// 物理内存加交换区的总量算在内，走到这里是不变量被破坏。
    pub fn allocate_slot(&self) -> SwapSlot {
        let mut bitmap = self.bitmap.lock().unwrap();

        for (group, bits) in bitmap.iter_mut().enumerate() {
            if *bits == u64::MAX {
                continue;
            }
            let ingroup = bits.trailing_ones() as usize;
            let index = group * 64 + ingroup;
            if index >= self.slots {
                break;
            }

            *bits |= 1 << ingroup;
            trace!("swap slot {index} allocated");
            return SwapSlot(index);
        }

        panic!("swap store exhausted");
    }

    /// 把一页数据写进槽位，按扇区粒度搬运
    pub fn write(&self, slot: SwapSlot, page: &[u8]) {
        assert_eq!(page.len(), PAGE_SIZE);
        debug_assert!(self.is_allocated(slot));

        for i in 0..SECTORS_PER_PAGE {
            self.device.write_sector(
                slot.0 * SECTORS_PER_PAGE + i,
                &page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE],
            );
        }
    }

    /// 从槽位读出一页数据；槽位必须在用
    pub fn read(&self, slot: SwapSlot, page: &mut [u8]) {
        assert_eq!(page.len(), PAGE_SIZE);
        assert!(self.is_allocated(slot));

        for i in 0..SECTORS_PER_PAGE {
            self.device.read_sector(
                slot.0 * SECTORS_PER_PAGE + i,
                &mut page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE],
            );
        }
    }

    /// 归还槽位；数据仍被引用时不得调用
    pub fn release(&self, slot: SwapSlot) {
        let mut bitmap = self.bitmap.lock().unwrap();
        let (group, ingroup) = (slot.0 / 64, slot.0 % 64);

        assert_ne!(bitmap[group] & 1 << ingroup, 0);
        bitmap[group] ^= 1 << ingroup;
        trace!("swap slot {} released", slot.0);
    }

    pub fn is_allocated(&self, slot: SwapSlot) -> bool {
        let bitmap = self.bitmap.lock().unwrap();
        bitmap[slot.0 / 64] & 1 << (slot.0 % 64) != 0
    }

    /// 在用槽位的数量
    pub fn allocated_slots(&self) -> usize {
        let bitmap = self.bitmap.lock().unwrap();
        bitmap.iter().map(|bits| bits.count_ones() as usize).sum()
    }
}

impl SwapSlot {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

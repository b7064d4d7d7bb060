use spin::Mutex;

use sector_dev::SECTOR_SIZE;

use crate::SECTOR_BITS;
use crate::sector_cache::SectorCache;

/// u64 一组，一个位图扇区装 64 组
const GROUPS_PER_SECTOR: usize = SECTOR_SIZE / 8;

/// 空闲位图，经由扇区缓存持久化在磁盘上：
/// 第 n 位对应设备第 n 个扇区
#[derive(Debug)]
pub struct Bitmap {
    /// 位图的起始扇区
    start_sector: usize,
    /// 位图占用扇区数
    sectors: usize,
    /// 扫描并翻转必须原子，两个并发的扩容不能拿到同一扇区
    guard: Mutex<()>,
}

/// 位在位图中的坐标
struct BitPos(u32);

impl Bitmap {
    #[inline]
    pub fn new(start_sector: usize, sectors: usize) -> Self {
        Self {
            start_sector,
            sectors,
            guard: Mutex::new(()),
        }
    }

    /// 位图可指示的扇区总数
    #[inline]
    pub fn capacity(&self) -> usize {
        self.sectors * SECTOR_BITS
    }

    /// 原子地分配一个空闲扇区并返回其编号。
    /// 空间用尽则返回空。
    pub fn alloc(&self, cache: &SectorCache) -> Option<u32> {
        let _guard = self.guard.lock();

        for sector_index in 0..self.sectors {
            let sector = self.start_sector + sector_index;
            for group_index in 0..GROUPS_PER_SECTOR {
                let mut raw = [0; 8];
                cache.read(sector, &mut raw, group_index * 8);
                let bits = u64::from_le_bytes(raw);
                if bits == u64::MAX {
                    continue;
                }

                let ingroup_index = bits.trailing_ones() as usize;
                let flipped = bits | 1 << ingroup_index;
                cache.write(sector, &flipped.to_le_bytes(), group_index * 8);
                return Some(BitPos::encode(sector_index, group_index, ingroup_index));
            }
        }

        None
    }

    /// 归还一个扇区
    pub fn dealloc(&self, cache: &SectorCache, id: u32) {
        let _guard = self.guard.lock();
        let (sector_index, group_index, ingroup_index) = BitPos(id).decode();
        let sector = self.start_sector + sector_index;

        let mut raw = [0; 8];
        cache.read(sector, &mut raw, group_index * 8);
        let bits = u64::from_le_bytes(raw);

        // 归还的编号一定有对应的位
        assert_ne!(bits & 1 << ingroup_index, 0);

        cache.write(sector, &(bits ^ 1 << ingroup_index).to_le_bytes(), group_index * 8);
    }

    /// 把一个编号预先标为在用，格式化时保留元数据扇区用
    pub fn set(&self, cache: &SectorCache, id: u32) {
        let _guard = self.guard.lock();
        let (sector_index, group_index, ingroup_index) = BitPos(id).decode();
        let sector = self.start_sector + sector_index;

        let mut raw = [0; 8];
        cache.read(sector, &mut raw, group_index * 8);
        let bits = u64::from_le_bytes(raw) | 1 << ingroup_index;
        cache.write(sector, &bits.to_le_bytes(), group_index * 8);
    }
}

impl BitPos {
    /// 线性映射编码得到扇区编号
    #[inline]
    fn encode(sector_index: usize, group_index: usize, ingroup_index: usize) -> u32 {
        (sector_index * SECTOR_BITS + group_index * 64 + ingroup_index) as u32
    }

    fn decode(self) -> (usize, usize, usize) {
        let mut id = self.0 as usize;

        let sector_index = id / SECTOR_BITS;
        id %= SECTOR_BITS;
        (sector_index, id / 64, id % 64)
    }
}

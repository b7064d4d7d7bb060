//! # 磁盘卷管理层
//!
//! 构建出卷的布局并使用：0号扇区是超级块，
//! 随后是覆盖整个设备的空闲位图，其余扇区按需分配，
//! 既当磁盘 inode 也当数据扇区。

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};

use log::{debug, info};
use spin::Mutex;

use sector_dev::{SECTOR_SIZE, SectorDevice};

use crate::SECTOR_BITS;
use crate::error::FsError;
use crate::inode::Inode;
use crate::layout::{Bitmap, DiskInode, SuperBlock};
use crate::sector_cache::SectorCache;

pub struct IndexedFs {
    cache: Arc<SectorCache>,
    free_map: Bitmap,
    /// 打开句柄的注册表：同一扇区的多次打开共享同一句柄
    open_inodes: Mutex<BTreeMap<u32, Weak<Inode>>>,
}

impl IndexedFs {
    /// 格式化设备并挂载
    pub fn format(device: Arc<dyn SectorDevice>) -> Arc<Self> {
        let total_sectors = device.sector_count();
        let free_map_sectors = total_sectors.div_ceil(SECTOR_BITS);
        let reserved = 1 + free_map_sectors;
        assert!(reserved < total_sectors);
        info!("formatting volume: {total_sectors} sectors, {free_map_sectors} free-map sectors");

        let cache = Arc::new(SectorCache::new(device));
        let free_map = Bitmap::new(1, free_map_sectors);

        for sector in 0..reserved {
            cache.write(sector, &[0; SECTOR_SIZE], 0);
        }

        // 元数据扇区与位图末尾多出的位都标成在用
        for sector in 0..reserved {
            free_map.set(&cache, sector as u32);
        }
        for id in total_sectors..free_map.capacity() {
            free_map.set(&cache, id as u32);
        }

        let mut super_block = SuperBlock::zeroed();
        super_block.init(total_sectors as u32, free_map_sectors as u32);
        cache.write(0, super_block.as_bytes(), 0);
        cache.flush_all();

        Arc::new(Self {
            cache,
            free_map,
            open_inodes: Mutex::new(BTreeMap::new()),
        })
    }

    /// 挂载已格式化的设备
    pub fn open(device: Arc<dyn SectorDevice>) -> Arc<Self> {
        let cache = Arc::new(SectorCache::new(device));

        let mut super_block = SuperBlock::zeroed();
        cache.read(0, super_block.as_bytes_mut(), 0);
        assert!(super_block.is_valid(), "error when loading volume");
        debug!(
            "opened volume: {} sectors, {} free-map sectors",
            super_block.total_sectors, super_block.free_map_sectors
        );

        Arc::new(Self {
            cache,
            free_map: Bitmap::new(1, super_block.free_map_sectors as usize),
            open_inodes: Mutex::new(BTreeMap::new()),
        })
    }

    /// 新建一个长度为 `length` 的文件，返回其 inode 所在扇区。
    /// 空间不足时整个操作失败，已分配的扇区尽力回滚。
    pub fn create_inode(&self, length: usize) -> Result<u32, FsError> {
        let sector = self.free_map.alloc(&self.cache).ok_or(FsError::NoSpace)?;

        let mut disk_inode = DiskInode::new();
        if length > 0 {
            if let Err(e) = disk_inode.grow(0, length, &self.cache, &self.free_map) {
                disk_inode.free_all_sectors(&self.cache, &self.free_map);
                self.free_map.dealloc(&self.cache, sector);
                return Err(e);
            }
        }

        self.cache.write(sector as usize, disk_inode.as_bytes(), 0);
        debug!("created inode at #{sector}, length {length}");
        Ok(sector)
    }

    /// 打开 `sector` 上的 inode；再次打开返回同一句柄
    pub fn open_inode(self: &Arc<Self>, sector: u32) -> Arc<Inode> {
        let mut open_inodes = self.open_inodes.lock();

        if let Some(inode) = open_inodes.get(&sector).and_then(Weak::upgrade) {
            return inode;
        }

        let mut disk_inode = DiskInode::new();
        self.cache.read(sector as usize, disk_inode.as_bytes_mut(), 0);
        assert!(disk_inode.is_valid(), "not an inode sector: #{sector}");

        let inode = Arc::new(Inode::new(sector, self.clone()));
        open_inodes.insert(sector, Arc::downgrade(&inode));
        inode
    }

    /// 关停前显式写回全部脏扇区
    #[inline]
    pub fn flush(&self) {
        self.cache.flush_all();
    }

    #[inline]
    pub fn cache(&self) -> &Arc<SectorCache> {
        &self.cache
    }
}

impl IndexedFs {
    pub(crate) fn free_map(&self) -> &Bitmap {
        &self.free_map
    }

    /// 最后一个打开者走了，句柄出注册表；
    /// 已删除的 inode 此时归还全部扇区
    pub(crate) fn release_inode(&self, sector: u32, removed: bool) {
        let mut open_inodes = self.open_inodes.lock();
        match open_inodes.get(&sector) {
            // 其间有人重新打开，句柄已经易主
            Some(weak) if weak.strong_count() > 0 => return,
            Some(_) => {
                open_inodes.remove(&sector);
            }
            None => return,
        }
        drop(open_inodes);

        if removed {
            let mut disk_inode = DiskInode::new();
            self.cache.read(sector as usize, disk_inode.as_bytes_mut(), 0);
            disk_inode.free_all_sectors(&self.cache, &self.free_map);
            self.cache.write(sector as usize, &[0; SECTOR_SIZE], 0);
            self.free_map.dealloc(&self.cache, sector);
            debug!("removed inode #{sector} torn down");
        }
    }
}

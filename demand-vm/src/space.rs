//! 地址空间：一个进程的页目录、页表与内存映射文件的集合。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use indexed_fs::Inode;

use crate::PAGE_SIZE;
use crate::error::MmapError;
use crate::frame::Pager;
use crate::page::{VmDirectory, VmEntry};
use crate::table::PageTable;

/// 一次 mmap 调用的标识，munmap 时凭此撤销
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MapId(usize);

pub struct AddressSpace {
    directory: VmDirectory,
    table: Mutex<PageTable>,
    mmaps: Mutex<BTreeMap<MapId, MmapRecord>>,
    next_map_id: AtomicUsize,
}

/// 一段活跃的文件映射占据的各页
struct MmapRecord {
    vaddrs: Vec<usize>,
}

impl AddressSpace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            directory: VmDirectory::new(),
            table: Mutex::new(PageTable::new()),
            mmaps: Mutex::new(BTreeMap::new()),
            next_map_id: AtomicUsize::new(0),
        })
    }

    pub fn directory(&self) -> &VmDirectory {
        &self.directory
    }

    pub fn table(&self) -> &Mutex<PageTable> {
        &self.table
    }

    /// 将整个文件映射到 `vaddr` 起的连续页。页面按需装入，
    /// 脏页在撤销映射或被置换时写回文件。
    pub fn mmap(&self, file: Arc<Inode>, vaddr: usize) -> Result<MapId, MmapError> {
        if vaddr == 0 {
            return Err(MmapError::NullAddress);
        }
        if vaddr % PAGE_SIZE != 0 {
            return Err(MmapError::Misaligned);
        }
        let length = file.len();
        if length == 0 {
            return Err(MmapError::EmptyFile);
        }

        let mut vaddrs = Vec::with_capacity(length.div_ceil(PAGE_SIZE));
        for offset in (0..length).step_by(PAGE_SIZE) {
            let page_vaddr = vaddr + offset;
            let read_bytes = (length - offset).min(PAGE_SIZE);
            let entry = VmEntry::new_mapped_file(
                page_vaddr,
                true,
                file.clone(),
                offset,
                read_bytes,
                PAGE_SIZE - read_bytes,
            );
            if !self.directory.insert(entry) {
                // 撞上已登记的页，撤销已插入的部分
                for vaddr in vaddrs {
                    self.directory.remove(vaddr);
                }
                return Err(MmapError::AlreadyMapped);
            }
            vaddrs.push(page_vaddr);
        }

        let id = MapId(self.next_map_id.fetch_add(1, Ordering::Relaxed));
        self.mmaps.lock().unwrap().insert(id, MmapRecord { vaddrs });
        log::debug!("mmap {length} bytes at {vaddr:#x} as {id:?}");
        Ok(id)
    }

    /// 撤销一次文件映射：脏页写回文件，占用的帧与登记全部释放
    pub fn munmap(self: &Arc<Self>, id: MapId, pager: &Pager) -> Result<(), MmapError> {
        let record = self
            .mmaps
            .lock()
            .unwrap()
            .remove(&id)
            .ok_or(MmapError::BadMapId)?;
        for vaddr in record.vaddrs {
            if let Some(entry) = self.directory.remove(vaddr) {
                pager.release_page(self, &entry);
            }
        }
        Ok(())
    }

    /// 销毁整个地址空间：所有页的帧、交换槽与映射彻底回收。
    /// 脏的映射文件页仍会写回。
    pub fn destroy(self: &Arc<Self>, pager: &Pager) {
        for entry in self.directory.take_all() {
            pager.release_page(self, &entry);
        }
        self.mmaps.lock().unwrap().clear();
    }
}

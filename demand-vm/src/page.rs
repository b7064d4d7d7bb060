//! 虚拟页目录：按页对齐的虚拟地址登记每一页的来源，
//! 缺页时据此决定从可执行映像、映射文件还是交换区取数据。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use indexed_fs::Inode;

use crate::PAGE_SIZE;
use crate::swap::SwapSlot;
use crate::table::page_floor;

/// 一页的登记信息。`loaded` 表示当前是否驻留在某个页帧中。
pub struct VmEntry {
    pub vaddr: usize,
    pub writable: bool,
    pub loaded: bool,
    pub backing: Backing,
}

/// 页面内容的来源
pub enum Backing {
    /// 可执行映像的一段：首次缺页从文件读入，
    /// 被置换时若已写脏则转为匿名页存入交换区
    Binary {
        file: Arc<Inode>,
        offset: usize,
        read_bytes: usize,
        zero_bytes: usize,
    },
    /// 内存映射文件的一页：脏页写回文件本身
    MappedFile {
        file: Arc<Inode>,
        offset: usize,
        read_bytes: usize,
        zero_bytes: usize,
    },
    /// 匿名页：首次缺页填零，被置换后存入交换区
    Anonymous { slot: Option<SwapSlot> },
}

impl VmEntry {
    pub fn new_binary(
        vaddr: usize,
        writable: bool,
        file: Arc<Inode>,
        offset: usize,
        read_bytes: usize,
        zero_bytes: usize,
    ) -> Self {
        assert_eq!(vaddr % PAGE_SIZE, 0);
        assert_eq!(read_bytes + zero_bytes, PAGE_SIZE);
        Self {
            vaddr,
            writable,
            loaded: false,
            backing: Backing::Binary {
                file,
                offset,
                read_bytes,
                zero_bytes,
            },
        }
    }

    pub fn new_mapped_file(
        vaddr: usize,
        writable: bool,
        file: Arc<Inode>,
        offset: usize,
        read_bytes: usize,
        zero_bytes: usize,
    ) -> Self {
        assert_eq!(vaddr % PAGE_SIZE, 0);
        assert_eq!(read_bytes + zero_bytes, PAGE_SIZE);
        Self {
            vaddr,
            writable,
            loaded: false,
            backing: Backing::MappedFile {
                file,
                offset,
                read_bytes,
                zero_bytes,
            },
        }
    }

    pub fn new_anonymous(vaddr: usize, writable: bool) -> Self {
        assert_eq!(vaddr % PAGE_SIZE, 0);
        Self {
            vaddr,
            writable,
            loaded: false,
            backing: Backing::Anonymous { slot: None },
        }
    }
}

/// 一个地址空间内所有已登记页的目录
pub struct VmDirectory {
    entries: Mutex<BTreeMap<usize, Arc<Mutex<VmEntry>>>>,
}

impl Default for VmDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl VmDirectory {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// 登记一页；同一页已存在时返回 false 并丢弃新登记
    pub fn insert(&self, entry: VmEntry) -> bool {
        let vaddr = entry.vaddr;
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&vaddr) {
            return false;
        }
        entries.insert(vaddr, Arc::new(Mutex::new(entry)));
        true
    }

    /// 查找覆盖 `vaddr` 的登记页（地址向下取页边界）
    pub fn find(&self, vaddr: usize) -> Option<Arc<Mutex<VmEntry>>> {
        self.entries
            .lock()
            .unwrap()
            .get(&page_floor(vaddr))
            .cloned()
    }

    pub fn remove(&self, vaddr: usize) -> Option<Arc<Mutex<VmEntry>>> {
        self.entries.lock().unwrap().remove(&page_floor(vaddr))
    }

    /// 取走全部登记页，目录清空。用于地址空间销毁。
    pub fn take_all(&self) -> Vec<Arc<Mutex<VmEntry>>> {
        let mut entries = self.entries.lock().unwrap();
        core::mem::take(&mut *entries).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

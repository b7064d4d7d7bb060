//! 页帧管理器：固定数量的物理页帧，缺页时按需装入，
//! 帧耗尽时用时钟算法挑选牺牲页换出。
//!
//! 锁序：池锁 → 页登记锁 → (页表锁 | 帧数据锁)，
//! 任何路径都不得在持有页登记锁时再去取池锁。

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use enumflags2::BitFlags;
use sector_dev::SectorDevice;

use crate::PAGE_SIZE;
use crate::page::{Backing, VmEntry};
use crate::space::AddressSpace;
use crate::swap::{SwapSlot, SwapStore};
use crate::table::PteFlag;

/// 页帧编号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId(usize);

impl FrameId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

pub struct Pager {
    /// 各帧的页面内容，独立于池锁加锁
    frames: Vec<Mutex<Box<[u8; PAGE_SIZE]>>>,
    inner: Mutex<PoolInner>,
    /// 有帧回收时唤醒等待分配的线程
    freed: Condvar,
    swap: SwapStore,
}

struct PoolInner {
    free: VecDeque<FrameId>,
    /// 可被置换的帧，按装入顺序排列，时钟指针在其上扫描
    clock: Vec<FrameId>,
    hand: usize,
    owners: Vec<Option<FrameOwner>>,
}

/// 帧当前装载的页
struct FrameOwner {
    space: Arc<AddressSpace>,
    entry: Arc<Mutex<VmEntry>>,
}

impl Pager {
    pub fn new(frame_count: usize, swap_device: Arc<dyn SectorDevice>) -> Self {
        assert!(frame_count > 0);
        Self {
            frames: (0..frame_count)
                .map(|_| Mutex::new(Box::new([0; PAGE_SIZE])))
                .collect(),
            inner: Mutex::new(PoolInner {
                free: (0..frame_count).map(FrameId).collect(),
                clock: Vec::with_capacity(frame_count),
                hand: 0,
                owners: (0..frame_count).map(|_| None).collect(),
            }),
            freed: Condvar::new(),
            swap: SwapStore::new(swap_device),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// 当前空闲（未被任何页占用）的帧数
    pub fn free_frames(&self) -> usize {
        self.inner.lock().unwrap().free.len()
    }

    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    /// 处理 `vaddr` 上的缺页：装入页面内容并建立映射。
    /// 该地址未在目录中登记时返回 false。
    pub fn load_page(&self, space: &Arc<AddressSpace>, vaddr: usize) -> bool {
        let Some(entry_arc) = space.directory().find(vaddr) else {
            return false;
        };

        // 分配可能触发置换乃至阻塞，期间不可持有页登记锁
        let id = self.allocate(space, &entry_arc);

        let mut entry = entry_arc.lock().unwrap();
        if entry.loaded {
            // 竞争的缺页已先一步装入，退还刚分配的帧
            drop(entry);
            self.discard(id);
            return true;
        }

        self.populate(id, &mut entry);

        let mut flags = BitFlags::<PteFlag>::empty();
        if entry.writable {
            flags |= PteFlag::W;
        }
        space
            .table()
            .lock()
            .unwrap()
            .map(entry.vaddr, id, flags)
            .unwrap_or_else(|e| panic!("page already mapped at {:#x}", e.0));
        entry.loaded = true;
        let entry_vaddr = entry.vaddr;
        drop(entry);

        // 装入完成后才进入时钟队列，避免半成品帧被换出
        self.activate(id, &entry_arc);

        // 装入期间 munmap 或销毁可能已把该页撤销登记，补一次回收
        match space.directory().find(entry_vaddr) {
            Some(current) if Arc::ptr_eq(&current, &entry_arc) => {}
            _ => self.release_page(space, &entry_arc),
        }
        true
    }

    /// 回收一个登记页可能占用的资源：驻留的帧、交换槽、
    /// 未写回的脏映射文件页。页随后从任何意义上消失。
    pub fn release_page(&self, space: &Arc<AddressSpace>, entry_arc: &Arc<Mutex<VmEntry>>) {
        let mut inner = self.inner.lock().unwrap();
        let mut entry = entry_arc.lock().unwrap();

        if entry.loaded {
            // 驻留页以页表定位其帧：置 loaded 与建立映射
            // 在装入方的同一个临界区内完成，二者必然一致。
            // 帧可能尚未进入时钟队列，不能按队列查。
            let vaddr = entry.vaddr;
            let (id, dirty) = {
                let mut table = space.table().lock().unwrap();
                let pte = table.translate(vaddr).expect("loaded page not mapped");
                let dirty = table.is_dirty(vaddr);
                let _ = table.unmap(vaddr);
                (pte.frame(), dirty)
            };
            if dirty {
                if let Backing::MappedFile {
                    file,
                    offset,
                    read_bytes,
                    ..
                } = &entry.backing
                {
                    let data = self.frames[id.index()].lock().unwrap();
                    if let Err(e) = file.write_at(*offset, &data.as_slice()[..*read_bytes]) {
                        log::error!("write back of mapped page {vaddr:#x} failed: {e}");
                    }
                }
            }
            entry.loaded = false;
            self.reclaim_locked(&mut inner, id);
        } else {
            // 装入尚未完成的页由装入方收尾；
            // 只有真正不驻留的匿名页才在这里归还交换槽
            let in_flight = inner.owners.iter().any(|owner| {
                owner
                    .as_ref()
                    .is_some_and(|owner| Arc::ptr_eq(&owner.entry, entry_arc))
            });
            if !in_flight {
                if let Backing::Anonymous { slot } = &mut entry.backing {
                    if let Some(slot) = slot.take() {
                        self.swap.release(slot);
                    }
                }
            }
        }
    }

    /// 临时访问某帧的页面内容。模拟缺页后的内存读写。
    pub fn with_frame<R>(&self, id: FrameId, f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R) -> R {
        let mut data = self.frames[id.index()].lock().unwrap();
        f(&mut data)
    }

    /// 取得一个空闲帧并登记属主。没有空闲帧时先尝试置换，
    /// 置换也无计可施（所有帧都在装入途中）则阻塞等待。
    fn allocate(&self, space: &Arc<AddressSpace>, entry: &Arc<Mutex<VmEntry>>) -> FrameId {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(id) = inner.free.pop_front() {
                inner.owners[id.index()] = Some(FrameOwner {
                    space: space.clone(),
                    entry: entry.clone(),
                });
                return id;
            }
            if !self.evict_locked(&mut *inner) {
                inner = self.freed.wait(inner).unwrap();
            }
        }
    }

    /// 时钟算法选出牺牲帧并换出。持有池锁调用，
    /// 从查找到回收一气呵成，不给并发分配插入的机会。
    fn evict_locked(&self, inner: &mut PoolInner) -> bool {
        if inner.clock.is_empty() {
            return false;
        }

        // 扫描期间访问位可能被并发重置，扫到受害者为止：
        // 每圈都清访问位，队列非空则扫描必然推进
        loop {
            if inner.hand >= inner.clock.len() {
                inner.hand = 0;
            }
            let id = inner.clock[inner.hand];
            let (space, entry_arc) = {
                let owner = inner.owners[id.index()]
                    .as_ref()
                    .expect("clock frame has no owner");
                (owner.space.clone(), owner.entry.clone())
            };

            let mut entry = entry_arc.lock().unwrap();
            let vaddr = entry.vaddr;
            let mut table = space.table().lock().unwrap();
            if table.is_accessed(vaddr) {
                table.set_accessed(vaddr, false);
                drop(table);
                inner.hand += 1;
                continue;
            }

            let dirty = table.is_dirty(vaddr);
            let _ = table.unmap(vaddr);
            drop(table);

            self.write_out(id, &mut entry, dirty);
            entry.loaded = false;
            drop(entry);

            self.reclaim_locked(inner, id);
            log::trace!("evicted page {vaddr:#x} from frame {}", id.index());
            return true;
        }
    }

    /// 按页的来源决定换出去向
    fn write_out(&self, id: FrameId, entry: &mut VmEntry, dirty: bool) {
        let guard = self.frames[id.index()].lock().unwrap();
        let data = guard.as_slice();
        let mut becomes_anonymous: Option<SwapSlot> = None;
        match &mut entry.backing {
            Backing::Binary { .. } => {
                // 改写过的映像页从此与文件脱钩，入交换区；
                // 干净的直接丢弃，重读映像即可
                if dirty {
                    let slot = self.swap.allocate_slot();
                    self.swap.write(slot, data);
                    becomes_anonymous = Some(slot);
                }
            }
            Backing::MappedFile {
                file,
                offset,
                read_bytes,
                ..
            } => {
                if dirty {
                    if let Err(e) = file.write_at(*offset, &data[..*read_bytes]) {
                        log::error!("write back of mapped page failed: {e}");
                    }
                }
            }
            Backing::Anonymous { slot } => {
                // 匿名页的内容只存在于内存中，无论脏否都须换出
                debug_assert!(slot.is_none());
                let new_slot = self.swap.allocate_slot();
                self.swap.write(new_slot, data);
                *slot = Some(new_slot);
            }
        }
        drop(guard);
        if let Some(slot) = becomes_anonymous {
            entry.backing = Backing::Anonymous { slot: Some(slot) };
        }
    }

    /// 按页的来源填充帧内容
    fn populate(&self, id: FrameId, entry: &mut VmEntry) {
        let mut guard = self.frames[id.index()].lock().unwrap();
        let data = guard.as_mut_slice();
        match &mut entry.backing {
            Backing::Binary {
                file,
                offset,
                read_bytes,
                ..
            }
            | Backing::MappedFile {
                file,
                offset,
                read_bytes,
                ..
            } => {
                let read = file.read_at(*offset, &mut data[..*read_bytes]);
                data[read..].fill(0);
            }
            Backing::Anonymous { slot } => match slot.take() {
                Some(slot) => {
                    self.swap.read(slot, data);
                    self.swap.release(slot);
                }
                // 首次触碰的匿名页是全零页
                None => data.fill(0),
            },
        }
    }

    /// 装入完毕的帧进入时钟队列，自此可被置换。
    /// 其间被并发回收的帧已另作他用，不再入队。
    fn activate(&self, id: FrameId, entry: &Arc<Mutex<VmEntry>>) {
        let mut inner = self.inner.lock().unwrap();
        let owned = inner.owners[id.index()]
            .as_ref()
            .is_some_and(|owner| Arc::ptr_eq(&owner.entry, entry));
        if owned {
            inner.clock.push(id);
        }
    }

    /// 退还一个未进入时钟队列的帧
    fn discard(&self, id: FrameId) {
        let mut inner = self.inner.lock().unwrap();
        inner.owners[id.index()] = None;
        inner.free.push_back(id);
        self.freed.notify_one();
    }

    /// 将帧放回空闲链；在时钟队列上的帧一并移出，维护时钟指针
    fn reclaim_locked(&self, inner: &mut PoolInner, id: FrameId) {
        if let Some(pos) = inner.clock.iter().position(|x| *x == id) {
            inner.clock.remove(pos);
            if pos < inner.hand {
                inner.hand -= 1;
            }
        }
        inner.owners[id.index()] = None;
        inner.free.push_back(id);
        self.freed.notify_one();
    }
}

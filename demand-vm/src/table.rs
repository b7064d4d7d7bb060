//! 软件页表：虚拟页号到页帧的映射，附带保护位与
//! 访问/脏标志。真实硬件上这些位由 MMU 维护，
//! 此处由外部的缺页蹦床（或测试）代为置位，
//! 置换器读取并清除它们。

use std::collections::BTreeMap;

use enumflags2::{BitFlags, bitflags};

use crate::PAGE_SIZE;
use crate::frame::FrameId;

pub struct PageTable {
    entries: BTreeMap<usize, Pte>,
}

/// 页表项
#[derive(Debug, Clone, Copy)]
pub struct Pte {
    frame: FrameId,
    flags: BitFlags<PteFlag>,
}

/// - W(Write)：允许写入；
/// - A(Accessed)：自上次清零以来页面被访问过；
/// - D(Dirty)：自映射建立以来页面被改写过
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PteFlag {
    W = 0b001,
    A = 0b010,
    D = 0b100,
}

#[derive(Debug)]
pub struct MappedVaddr(pub usize);

#[derive(Debug)]
pub struct UnmappedVaddr(pub usize);

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// 为 `vaddr` 所在的页建立到 `frame` 的映射
    pub fn map(
        &mut self,
        vaddr: usize,
        frame: FrameId,
        flags: impl Into<BitFlags<PteFlag>>,
    ) -> Result<(), MappedVaddr> {
        assert_eq!(vaddr % PAGE_SIZE, 0);
        if self.entries.contains_key(&vaddr) {
            return Err(MappedVaddr(vaddr));
        }

        self.entries.insert(
            vaddr,
            Pte {
                frame,
                flags: flags.into(),
            },
        );
        Ok(())
    }

    /// 撤销 `vaddr` 所在页的映射
    pub fn unmap(&mut self, vaddr: usize) -> Result<(), UnmappedVaddr> {
        self.entries
            .remove(&page_floor(vaddr))
            .map(|_| ())
            .ok_or(UnmappedVaddr(vaddr))
    }

    pub fn translate(&self, vaddr: usize) -> Option<Pte> {
        self.entries.get(&page_floor(vaddr)).copied()
    }

    pub fn is_accessed(&self, vaddr: usize) -> bool {
        self.flag(vaddr, PteFlag::A)
    }

    pub fn is_dirty(&self, vaddr: usize) -> bool {
        self.flag(vaddr, PteFlag::D)
    }

    pub fn set_accessed(&mut self, vaddr: usize, value: bool) {
        self.set_flag(vaddr, PteFlag::A, value);
    }

    pub fn set_dirty(&mut self, vaddr: usize, value: bool) {
        self.set_flag(vaddr, PteFlag::D, value);
    }

    fn flag(&self, vaddr: usize, flag: PteFlag) -> bool {
        self.entries
            .get(&page_floor(vaddr))
            .is_some_and(|pte| pte.flags.contains(flag))
    }

    fn set_flag(&mut self, vaddr: usize, flag: PteFlag, value: bool) {
        if let Some(pte) = self.entries.get_mut(&page_floor(vaddr)) {
            if value {
                pte.flags |= flag;
            } else {
                pte.flags &= !BitFlags::from(flag);
            }
        }
    }
}

impl Pte {
    #[inline]
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    #[inline]
    pub fn flags(&self) -> BitFlags<PteFlag> {
        self.flags
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.flags.contains(PteFlag::W)
    }
}

/// 向下取页边界
#[inline]
pub fn page_floor(vaddr: usize) -> usize {
    vaddr & !(PAGE_SIZE - 1)
}

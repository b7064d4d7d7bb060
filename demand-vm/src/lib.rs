//! # 按需调页内存核心
//!
//! 教学操作系统的内存一侧：定容物理页帧池（时钟近似LRU置换）、
//! 按虚拟地址索引的页目录、位图管理的交换区。
//!
//! 数据流：缺页或 mmap 填充向 [`Pager`] 索要页帧，
//! 页描述符指明如何填充（经由文件句柄读文件，或从交换槽换入）；
//! 置换沿同一套管线反向运行——脏的映射文件页写回文件，
//! 其余脏页写进交换区。

pub const PAGE_SIZE: usize = 4096;

mod error;
mod frame;
mod page;
mod space;
mod swap;
mod table;

pub use self::{
    error::MmapError,
    frame::{FrameId, Pager},
    page::{Backing, VmDirectory, VmEntry},
    space::{AddressSpace, MapId},
    swap::{SwapSlot, SwapStore},
    table::{PageTable, Pte, PteFlag},
};

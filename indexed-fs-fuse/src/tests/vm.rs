use std::sync::Arc;
use std::thread;

use demand_vm::{AddressSpace, Backing, MmapError, PAGE_SIZE, Pager, VmEntry};
use indexed_fs::{IndexedFs, Inode};

use crate::MemDevice;

const SECTORS_PER_PAGE: usize = PAGE_SIZE / indexed_fs::SECTOR_SIZE;

fn make_pager(frames: usize, swap_pages: usize) -> Pager {
    Pager::new(frames, Arc::new(MemDevice::new(swap_pages * SECTORS_PER_PAGE)))
}

fn make_file(fs: &Arc<IndexedFs>, data: &[u8]) -> Arc<Inode> {
    let sector = fs.create_inode(0).unwrap();
    let inode = fs.open_inode(sector);
    inode.write_at(0, data).unwrap();
    inode
}

fn write_page(pager: &Pager, space: &Arc<AddressSpace>, vaddr: usize, byte: u8) {
    let mut table = space.table().lock().unwrap();
    let pte = table.translate(vaddr).expect("page not mapped");
    table.set_accessed(vaddr, true);
    table.set_dirty(vaddr, true);
    drop(table);
    pager.with_frame(pte.frame(), |data| data.fill(byte));
}

fn read_page(pager: &Pager, space: &Arc<AddressSpace>, vaddr: usize) -> Vec<u8> {
    let mut table = space.table().lock().unwrap();
    let pte = table.translate(vaddr).expect("page not mapped");
    table.set_accessed(vaddr, true);
    drop(table);
    pager.with_frame(pte.frame(), |data| data.to_vec())
}

#[test]
fn swap_slot_round_trip() {
    let pager = make_pager(1, 8);
    let swap = pager.swap();
    assert_eq!(swap.capacity(), 8);
    assert_eq!(swap.allocated_slots(), 0);

    let slot = swap.allocate_slot();
    assert!(swap.is_allocated(slot));

    let page: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 241) as u8).collect();
    swap.write(slot, &page);
    let mut back = vec![0u8; PAGE_SIZE];
    swap.read(slot, &mut back);
    assert_eq!(back, page);

    swap.release(slot);
    assert!(!swap.is_allocated(slot));
    assert_eq!(swap.allocated_slots(), 0);
}

#[test]
fn anonymous_page_starts_zeroed() {
    let pager = make_pager(2, 8);
    let space = AddressSpace::new();
    space.directory().insert(VmEntry::new_anonymous(0x1000, true));

    assert!(pager.load_page(&space, 0x1000));
    assert!(read_page(&pager, &space, 0x1000).iter().all(|b| *b == 0));
}

#[test]
fn fault_on_unregistered_address_fails() {
    let pager = make_pager(2, 8);
    let space = AddressSpace::new();
    assert!(!pager.load_page(&space, 0x4000));
}

#[test]
fn eviction_round_trips_through_swap() {
    let pager = make_pager(2, 8);
    let space = AddressSpace::new();
    for vaddr in [0x1000, 0x2000, 0x3000] {
        space.directory().insert(VmEntry::new_anonymous(vaddr, true));
    }

    assert!(pager.load_page(&space, 0x1000));
    write_page(&pager, &space, 0x1000, 0xA1);
    assert!(pager.load_page(&space, 0x2000));
    write_page(&pager, &space, 0x2000, 0xB2);

    // 第三页挤掉最久未访问的 0x1000
    assert!(pager.load_page(&space, 0x3000));
    assert!(space.table().lock().unwrap().translate(0x1000).is_none());
    assert_eq!(pager.swap().allocated_slots(), 1);

    // 换回来内容原封不动
    assert!(pager.load_page(&space, 0x1000));
    assert!(read_page(&pager, &space, 0x1000).iter().all(|b| *b == 0xA1));
    assert_eq!(pager.swap().allocated_slots(), 1, "0x2000 now lives in swap");
}

#[test]
fn accessed_bit_spares_a_page_from_eviction() {
    let pager = make_pager(2, 8);
    let space = AddressSpace::new();
    for vaddr in [0x1000, 0x2000, 0x3000] {
        space.directory().insert(VmEntry::new_anonymous(vaddr, true));
    }

    assert!(pager.load_page(&space, 0x1000));
    assert!(pager.load_page(&space, 0x2000));
    // 0x1000 最近被访问过，时钟会放过它而改选 0x2000
    space.table().lock().unwrap().set_accessed(0x1000, true);

    assert!(pager.load_page(&space, 0x3000));
    let table = space.table().lock().unwrap();
    assert!(table.translate(0x1000).is_some());
    assert!(table.translate(0x2000).is_none());
}

#[test]
fn clean_binary_page_is_discarded_not_swapped() {
    let fs = IndexedFs::format(Arc::new(MemDevice::new(1024)));
    let file = make_file(&fs, &vec![0xEE; PAGE_SIZE]);

    let pager = make_pager(1, 8);
    let space = AddressSpace::new();
    space.directory().insert(VmEntry::new_binary(
        0x1000,
        true,
        file.clone(),
        0,
        PAGE_SIZE,
        0,
    ));
    space.directory().insert(VmEntry::new_anonymous(0x2000, true));

    assert!(pager.load_page(&space, 0x1000));
    assert!(read_page(&pager, &space, 0x1000).iter().all(|b| *b == 0xEE));

    // 只有一个帧，装入第二页必然驱逐干净的映像页
    assert!(pager.load_page(&space, 0x2000));
    assert_eq!(pager.swap().allocated_slots(), 0);

    // 重新缺页从文件重读
    assert!(pager.load_page(&space, 0x1000));
    assert!(read_page(&pager, &space, 0x1000).iter().all(|b| *b == 0xEE));
}

#[test]
fn dirty_binary_page_moves_to_swap() {
    let fs = IndexedFs::format(Arc::new(MemDevice::new(1024)));
    let file = make_file(&fs, &vec![0xEE; PAGE_SIZE]);

    let pager = make_pager(1, 8);
    let space = AddressSpace::new();
    space.directory().insert(VmEntry::new_binary(
        0x1000,
        true,
        file.clone(),
        0,
        PAGE_SIZE,
        0,
    ));
    space.directory().insert(VmEntry::new_anonymous(0x2000, true));

    assert!(pager.load_page(&space, 0x1000));
    write_page(&pager, &space, 0x1000, 0x77);

    assert!(pager.load_page(&space, 0x2000));
    assert_eq!(pager.swap().allocated_slots(), 1);
    {
        let entry = space.directory().find(0x1000).unwrap();
        let entry = entry.lock().unwrap();
        assert!(matches!(entry.backing, Backing::Anonymous { slot: Some(_) }));
    }

    // 改写过的页此后与映像脱钩，从交换区回来
    assert!(pager.load_page(&space, 0x1000));
    assert!(read_page(&pager, &space, 0x1000).iter().all(|b| *b == 0x77));

    // 文件本身毫发无损
    let mut buf = vec![0u8; PAGE_SIZE];
    file.read_at(0, &mut buf);
    assert!(buf.iter().all(|b| *b == 0xEE));
}

#[test]
fn binary_tail_page_zero_fills_past_file_data() {
    let fs = IndexedFs::format(Arc::new(MemDevice::new(1024)));
    let file = make_file(&fs, &vec![0xEE; 100]);

    let pager = make_pager(1, 8);
    let space = AddressSpace::new();
    space
        .directory()
        .insert(VmEntry::new_binary(0x1000, false, file, 0, 100, PAGE_SIZE - 100));

    assert!(pager.load_page(&space, 0x1000));
    let data = read_page(&pager, &space, 0x1000);
    assert!(data[..100].iter().all(|b| *b == 0xEE));
    assert!(data[100..].iter().all(|b| *b == 0));
}

#[test]
fn mmap_rejects_bad_arguments() {
    let fs = IndexedFs::format(Arc::new(MemDevice::new(1024)));
    let file = make_file(&fs, b"content");
    let empty = {
        let sector = fs.create_inode(0).unwrap();
        fs.open_inode(sector)
    };
    let space = AddressSpace::new();

    assert_eq!(space.mmap(file.clone(), 0), Err(MmapError::NullAddress));
    assert_eq!(space.mmap(file.clone(), 0x1234), Err(MmapError::Misaligned));
    assert_eq!(space.mmap(empty, 0x1000), Err(MmapError::EmptyFile));

    space.directory().insert(VmEntry::new_anonymous(0x1000, true));
    assert_eq!(space.mmap(file, 0x1000), Err(MmapError::AlreadyMapped));
}

#[test]
fn overlapping_mmap_rolls_back_cleanly() {
    let fs = IndexedFs::format(Arc::new(MemDevice::new(1024)));
    // 两页长的文件
    let file = make_file(&fs, &vec![0xCD; PAGE_SIZE + 100]);
    let space = AddressSpace::new();

    // 第二页处埋一个既有登记，映射中途撞上
    space.directory().insert(VmEntry::new_anonymous(0x2000, true));
    assert_eq!(space.mmap(file, 0x1000), Err(MmapError::AlreadyMapped));

    // 第一页的登记已被撤销，既有登记原样保留
    assert!(space.directory().find(0x1000).is_none());
    assert!(space.directory().find(0x2000).is_some());
}

#[test]
fn munmap_writes_dirty_pages_back() {
    let fs = IndexedFs::format(Arc::new(MemDevice::new(1024)));
    let file = make_file(&fs, &vec![0xCD; PAGE_SIZE + 100]);

    let pager = make_pager(4, 8);
    let space = AddressSpace::new();
    let id = space.mmap(file.clone(), 0x10000).unwrap();

    assert!(pager.load_page(&space, 0x10000));
    write_page(&pager, &space, 0x10000, 0x5A);
    // 第二页装入但不写
    assert!(pager.load_page(&space, 0x11000));

    space.munmap(id, &pager).unwrap();
    assert_eq!(pager.free_frames(), 4);
    assert!(space.directory().find(0x10000).is_none());

    let mut buf = vec![0u8; PAGE_SIZE + 100];
    file.read_at(0, &mut buf);
    assert!(buf[..PAGE_SIZE].iter().all(|b| *b == 0x5A));
    assert!(buf[PAGE_SIZE..].iter().all(|b| *b == 0xCD));

    // 同一个映射号不能撤销两次
    assert_eq!(space.munmap(id, &pager), Err(MmapError::BadMapId));
}

#[test]
fn evicted_dirty_mapped_page_reaches_the_file() {
    let fs = IndexedFs::format(Arc::new(MemDevice::new(1024)));
    let file = make_file(&fs, &vec![0xCD; PAGE_SIZE]);

    let pager = make_pager(1, 8);
    let space = AddressSpace::new();
    space.mmap(file.clone(), 0x10000).unwrap();
    space.directory().insert(VmEntry::new_anonymous(0x1000, true));

    assert!(pager.load_page(&space, 0x10000));
    write_page(&pager, &space, 0x10000, 0x5A);

    // 驱逐即写回，无须等到 munmap
    assert!(pager.load_page(&space, 0x1000));
    assert_eq!(pager.swap().allocated_slots(), 0, "mapped pages never swap");

    let mut buf = vec![0u8; PAGE_SIZE];
    file.read_at(0, &mut buf);
    assert!(buf.iter().all(|b| *b == 0x5A));
}

#[test]
fn eviction_proceeds_when_every_page_was_accessed() {
    let pager = make_pager(2, 8);
    let space = AddressSpace::new();
    for vaddr in [0x1000, 0x2000, 0x3000] {
        space.directory().insert(VmEntry::new_anonymous(vaddr, true));
    }

    assert!(pager.load_page(&space, 0x1000));
    assert!(pager.load_page(&space, 0x2000));
    {
        let mut table = space.table().lock().unwrap();
        table.set_accessed(0x1000, true);
        table.set_accessed(0x2000, true);
    }

    // 没有现成的未访问帧，时钟清一圈访问位后仍能选出受害者
    assert!(pager.load_page(&space, 0x3000));
    assert!(space.table().lock().unwrap().translate(0x3000).is_some());
}

#[test]
fn munmap_racing_fault_leaves_pool_consistent() {
    let fs = IndexedFs::format(Arc::new(MemDevice::new(4096)));
    let file = make_file(&fs, &vec![0x3C; PAGE_SIZE]);
    let pager = make_pager(2, 32);

    for _ in 0..2000 {
        let space = AddressSpace::new();
        let id = space.mmap(file.clone(), 0x10000).unwrap();

        thread::scope(|s| {
            let pager = &pager;
            let fault_space = space.clone();
            s.spawn(move || {
                pager.load_page(&fault_space, 0x10000);
            });
            let unmap_space = space.clone();
            s.spawn(move || {
                unmap_space.munmap(id, pager).unwrap();
            });
        });

        space.destroy(&pager);
        assert_eq!(pager.free_frames(), pager.frame_count());
    }
    assert_eq!(pager.swap().allocated_slots(), 0);
}

#[test]
fn destroy_reclaims_frames_and_swap() {
    let fs = IndexedFs::format(Arc::new(MemDevice::new(1024)));
    let file = make_file(&fs, &vec![0xCD; PAGE_SIZE]);

    let pager = make_pager(2, 8);
    let space = AddressSpace::new();
    space.mmap(file, 0x10000).unwrap();
    for vaddr in [0x1000, 0x2000, 0x3000] {
        space.directory().insert(VmEntry::new_anonymous(vaddr, true));
    }

    for vaddr in [0x1000, 0x2000, 0x3000, 0x10000] {
        assert!(pager.load_page(&space, vaddr));
        write_page(&pager, &space, vaddr, 0x11);
    }
    assert!(pager.swap().allocated_slots() > 0);

    space.destroy(&pager);
    assert_eq!(pager.free_frames(), pager.frame_count());
    assert_eq!(pager.swap().allocated_slots(), 0);
    assert!(space.directory().is_empty());
}

use std::sync::Arc;
use std::thread;

use indexed_fs::{IndexedFs, SECTOR_SIZE};

use crate::MemDevice;

fn make_fs(sectors: usize) -> Arc<IndexedFs> {
    IndexedFs::format(Arc::new(MemDevice::new(sectors)))
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn write_then_read_small_file() {
    let fs = make_fs(1024);
    let sector = fs.create_inode(0).unwrap();
    let inode = fs.open_inode(sector);

    let data = b"hello, volume";
    assert_eq!(inode.write_at(0, data).unwrap(), data.len());
    assert_eq!(inode.len(), data.len());

    let mut buf = vec![0u8; data.len()];
    assert_eq!(inode.read_at(0, &mut buf), data.len());
    assert_eq!(&buf, data);
}

#[test]
fn read_past_end_returns_zero_bytes() {
    let fs = make_fs(1024);
    let sector = fs.create_inode(100).unwrap();
    let inode = fs.open_inode(sector);

    let mut buf = [0xFFu8; 64];
    assert_eq!(inode.read_at(100, &mut buf), 0);
    assert_eq!(inode.read_at(1000, &mut buf), 0);
    // 跨越末尾的读取被截断
    assert_eq!(inode.read_at(90, &mut buf), 10);
}

#[test]
fn preallocated_inode_reads_as_zeroes() {
    let fs = make_fs(1024);
    let sector = fs.create_inode(3 * SECTOR_SIZE + 7).unwrap();
    let inode = fs.open_inode(sector);

    assert_eq!(inode.len(), 3 * SECTOR_SIZE + 7);
    let mut buf = vec![0xFFu8; inode.len()];
    assert_eq!(inode.read_at(0, &mut buf), inode.len());
    assert!(buf.iter().all(|b| *b == 0));
}

#[test]
fn growth_zero_fills_the_gap() {
    let fs = make_fs(1024);
    let sector = fs.create_inode(0).unwrap();
    let inode = fs.open_inode(sector);

    // 在远超当前末尾处写入，中间的空洞必须读出全零
    inode.write_at(10_000, b"tail").unwrap();
    assert_eq!(inode.len(), 10_004);

    let mut buf = vec![0xFFu8; 10_004];
    assert_eq!(inode.read_at(0, &mut buf), 10_004);
    assert!(buf[..10_000].iter().all(|b| *b == 0));
    assert_eq!(&buf[10_000..], b"tail");
}

#[test]
fn large_file_spans_all_index_levels() {
    let fs = make_fs(4096);
    let sector = fs.create_inode(0).unwrap();
    let inode = fs.open_inode(sector);

    // 50 万字节：穿过直接区、一级间接区，深入二级间接区
    let data = pattern(500_000);
    assert_eq!(inode.write_at(0, &data).unwrap(), data.len());
    assert_eq!(inode.len(), 500_000);

    let mut buf = vec![0u8; 500_000];
    assert_eq!(inode.read_at(0, &mut buf), 500_000);
    assert_eq!(buf, data);

    // 非对齐偏移处的局部读
    let mut chunk = [0u8; 1000];
    assert_eq!(inode.read_at(129_000, &mut chunk), 1000);
    assert_eq!(&chunk[..], &data[129_000..130_000]);
}

#[test]
fn concurrent_extension_keeps_both_writes() {
    let fs = make_fs(2048);
    let sector = fs.create_inode(0).unwrap();
    let inode = fs.open_inode(sector);

    let low = pattern(100_000);
    let high: Vec<u8> = (0..100_000).map(|i| (i % 199) as u8).collect();

    thread::scope(|s| {
        let inode_a = inode.clone();
        let low = &low;
        s.spawn(move || {
            inode_a.write_at(0, low).unwrap();
        });
        let inode_b = inode.clone();
        let high = &high;
        s.spawn(move || {
            inode_b.write_at(100_000, high).unwrap();
        });
    });

    assert_eq!(inode.len(), 200_000);
    let mut buf = vec![0u8; 200_000];
    inode.read_at(0, &mut buf);
    assert_eq!(&buf[..100_000], &low[..]);
    assert_eq!(&buf[100_000..], &high[..]);
}

#[test]
fn open_inode_returns_shared_handle() {
    let fs = make_fs(1024);
    let sector = fs.create_inode(0).unwrap();

    let a = fs.open_inode(sector);
    let b = fs.open_inode(sector);
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn deny_write_blocks_until_allowed() {
    let fs = make_fs(1024);
    let sector = fs.create_inode(0).unwrap();
    let inode = fs.open_inode(sector);

    inode.write_at(0, b"abc").unwrap();
    inode.deny_write();
    assert_eq!(inode.write_at(3, b"def").unwrap(), 0);
    assert_eq!(inode.len(), 3);

    inode.allow_write();
    assert_eq!(inode.write_at(3, b"def").unwrap(), 3);
    assert_eq!(inode.len(), 6);
}

#[test]
fn removed_inode_frees_its_sectors() {
    // 小卷：回收不生效的话第二个大文件根本放不下
    let fs = make_fs(1024);

    for _ in 0..3 {
        let sector = fs.create_inode(0).unwrap();
        let inode = fs.open_inode(sector);
        inode.write_at(0, &pattern(300_000)).unwrap();
        inode.remove();
    }
}

#[test]
fn volume_survives_remount() {
    let device = Arc::new(MemDevice::new(1024));
    let data = pattern(20_000);

    let sector = {
        let fs = IndexedFs::format(device.clone());
        let sector = fs.create_inode(0).unwrap();
        let inode = fs.open_inode(sector);
        inode.write_at(0, &data).unwrap();
        drop(inode);
        fs.flush();
        sector
    };

    let fs = IndexedFs::open(device);
    let inode = fs.open_inode(sector);
    assert_eq!(inode.len(), 20_000);
    let mut buf = vec![0u8; 20_000];
    inode.read_at(0, &mut buf);
    assert_eq!(buf, data);
}

#[test]
fn volume_runs_out_of_space() {
    let fs = make_fs(64);
    let sector = fs.create_inode(0).unwrap();
    let inode = fs.open_inode(sector);

    // 卷只有 64 个扇区，迟早碰壁
    assert!(inode.write_at(0, &pattern(64 * SECTOR_SIZE)).is_err());
    // 长度停在完整分配到的扇区边界上
    assert_eq!(inode.len() % SECTOR_SIZE, 0);
    assert!(inode.len() < 64 * SECTOR_SIZE);
}

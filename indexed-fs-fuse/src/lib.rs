#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{Read, Write};
use std::io::{Seek, SeekFrom};
use std::sync::Mutex;

use sector_dev::SECTOR_SIZE;
use sector_dev::SectorDevice;

/// 宿主机文件充当扇区设备，镜像文件的制作与检查都经它进行
pub struct SectorFile {
    file: Mutex<File>,
    sectors: usize,
}

impl SectorFile {
    pub fn new(file: File, sectors: usize) -> Self {
        Self {
            file: Mutex::new(file),
            sectors,
        }
    }
}

impl SectorDevice for SectorFile {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(
            file.read(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete sector!"
        );
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(
            file.write(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete sector!"
        );
    }

    fn sector_count(&self) -> usize {
        self.sectors
    }
}

/// 内存扇区设备，测试用
pub struct MemDevice {
    sectors: Vec<Mutex<[u8; SECTOR_SIZE]>>,
}

impl MemDevice {
    pub fn new(sector_count: usize) -> Self {
        Self {
            sectors: (0..sector_count)
                .map(|_| Mutex::new([0; SECTOR_SIZE]))
                .collect(),
        }
    }
}

impl SectorDevice for MemDevice {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) {
        let data = self.sectors[sector].lock().unwrap();
        buf.copy_from_slice(&data[..buf.len()]);
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) {
        let mut data = self.sectors[sector].lock().unwrap();
        data[..buf.len()].copy_from_slice(buf);
    }

    fn sector_count(&self) -> usize {
        self.sectors.len()
    }
}

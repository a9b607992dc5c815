// SPDX-License-Identifier: GPL-3.0-only

//! Android boot image container
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! 0    magic          [u8; 8]   "ANDROID!"
//! 8    kernel_size    u32
//! 12   kernel_addr    u32
//! 16   ramdisk_size   u32
//! 20   ramdisk_addr   u32
//! 24   second_size    u32
//! 28   second_addr    u32
//! 32   tags_addr      u32
//! 36   page_size      u32
//! 40   unused         [u32; 2]
//! 48   name           [u8; 16]
//! 64   cmdline        [u8; 512]
//! 576  id             [u32; 8]
//! ```
//!
//! The kernel starts one page into the file; the ramdisk starts at the first page
//! boundary after the kernel.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Result, SysError};

pub const BOOT_MAGIC: &[u8; 8] = b"ANDROID!";
pub const HEADER_SIZE: usize = 608;

const NAME_OFFSET: usize = 48;
const CMDLINE_OFFSET: usize = 64;
const CMDLINE_SIZE: usize = 512;
const ID_OFFSET: usize = 576;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImageHeader {
    pub kernel_size: u32,
    pub kernel_addr: u32,
    pub ramdisk_size: u32,
    pub ramdisk_addr: u32,
    pub second_size: u32,
    pub second_addr: u32,
    pub tags_addr: u32,
    pub page_size: u32,
    pub name: String,
    pub cmdline: String,
    pub id: [u32; 8],
}

fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// NUL-terminated string inside a fixed-size field
fn c_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

impl BootImageHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(SysError::InvalidBootImage(format!(
                "header is {} bytes, expected {}",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        if &bytes[..8] != BOOT_MAGIC {
            return Err(SysError::InvalidBootImage("bad magic".to_string()));
        }

        let page_size = le_u32(bytes, 36);
        if page_size == 0 {
            return Err(SysError::InvalidBootImage("page size is zero".to_string()));
        }

        let mut id = [0u32; 8];
        for (index, word) in id.iter_mut().enumerate() {
            *word = le_u32(bytes, ID_OFFSET + index * 4);
        }

        Ok(Self {
            kernel_size: le_u32(bytes, 8),
            kernel_addr: le_u32(bytes, 12),
            ramdisk_size: le_u32(bytes, 16),
            ramdisk_addr: le_u32(bytes, 20),
            second_size: le_u32(bytes, 24),
            second_addr: le_u32(bytes, 28),
            tags_addr: le_u32(bytes, 32),
            page_size,
            name: c_string(&bytes[NAME_OFFSET..CMDLINE_OFFSET]),
            cmdline: c_string(&bytes[CMDLINE_OFFSET..CMDLINE_OFFSET + CMDLINE_SIZE]),
            id,
        })
    }

    pub fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                SysError::InvalidBootImage("truncated header".to_string())
            } else {
                SysError::Io(e)
            }
        })?;
        Self::parse(&bytes)
    }

    pub fn kernel_offset(&self) -> u64 {
        u64::from(self.page_size)
    }

    pub fn ramdisk_offset(&self) -> u64 {
        let page = u64::from(self.page_size);
        let kernel_pages = u64::from(self.kernel_size).div_ceil(page);
        page + kernel_pages * page
    }
}

/// Copy exactly `len` bytes starting at `offset` into a new file at `dest`.
fn extract_range(source: &mut File, offset: u64, len: u64, dest: &Path) -> Result<()> {
    source.seek(SeekFrom::Start(offset))?;

    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dest)?;

    let copied = io::copy(&mut source.take(len), &mut out)?;
    if copied != len {
        return Err(SysError::InvalidBootImage(format!(
            "expected {len} bytes at offset {offset}, found {copied}"
        )));
    }

    out.flush()?;
    debug!("Extracted {} bytes at {} into {:?}", len, offset, dest);
    Ok(())
}

/// Split a boot image into its kernel and ramdisk files.
pub fn extract_boot_image(image: &Path, kernel_out: &Path, ramdisk_out: &Path) -> Result<BootImageHeader> {
    let mut file = File::open(image).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            SysError::DeviceNotFound(image.display().to_string())
        } else {
            SysError::Io(e)
        }
    })?;

    let header = BootImageHeader::read_from(&mut file)?;
    info!(
        "Boot image {:?}: kernel {} bytes, ramdisk {} bytes, page {}",
        image, header.kernel_size, header.ramdisk_size, header.page_size
    );

    extract_range(
        &mut file,
        header.kernel_offset(),
        u64::from(header.kernel_size),
        kernel_out,
    )?;
    extract_range(
        &mut file,
        header.ramdisk_offset(),
        u64::from(header.ramdisk_size),
        ramdisk_out,
    )?;

    Ok(header)
}

// SPDX-License-Identifier: GPL-3.0-only

//! Boot manager status (aggregate root)

use std::sync::Arc;

use serde::Serialize;

use crate::{PartitionTable, Rom, RomId};

#[derive(Debug, Default, Serialize)]
pub struct Status {
    /// Internal ROMs first, then removable ROMs; each scan batch is sorted
    pub roms: Vec<Rom>,

    pub current_rom: Option<RomId>,

    pub auto_boot_rom: Option<RomId>,

    pub auto_boot_seconds: i32,

    /// UUID of the partition holding the current ROM
    pub curr_rom_part: Option<String>,

    /// Set while running as the continuation stage after a kexec handoff
    pub is_second_boot: bool,

    #[serde(serialize_with = "serialize_partitions")]
    pub partitions: PartitionTable,
}

fn serialize_partitions<S: serde::Serializer>(
    table: &PartitionTable,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(table.snapshot().iter().map(Arc::as_ref))
}

impl Status {
    pub fn new(partitions: PartitionTable) -> Self {
        Self {
            partitions,
            ..Self::default()
        }
    }

    pub fn rom(&self, id: RomId) -> Option<&Rom> {
        self.roms.iter().find(|rom| rom.id == id)
    }

    /// Find a ROM by name, optionally restricted to a partition UUID.
    pub fn find_rom(&self, name: &str, part_uuid: Option<&str>) -> Option<&Rom> {
        self.roms.iter().find(|rom| {
            rom.name == name
                && part_uuid.is_none_or(|uuid| rom.partition_uuid().as_deref() == Some(uuid))
        })
    }

    pub fn current(&self) -> Option<&Rom> {
        self.current_rom.and_then(|id| self.rom(id))
    }

    pub fn auto_boot(&self) -> Option<&Rom> {
        self.auto_boot_rom.and_then(|id| self.rom(id))
    }

    /// Append a scan batch; callers sort the batch beforehand.
    pub fn add_roms(&mut self, batch: Vec<Rom>) {
        self.roms.extend(batch);
    }

    /// Drop every ROM found on removable media, clearing references to them.
    pub fn remove_usb_roms(&mut self) -> usize {
        let before = self.roms.len();
        self.roms.retain(|rom| !rom.rom_type.is_usb());

        if self.current_rom.is_some_and(|id| self.rom(id).is_none()) {
            self.current_rom = None;
        }
        if self.auto_boot_rom.is_some_and(|id| self.rom(id).is_none()) {
            self.auto_boot_rom = None;
        }

        before - self.roms.len()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{Partition, RomType};

    fn rom(id: u32, name: &str, rom_type: RomType, partition: Option<&Arc<Partition>>) -> Rom {
        Rom {
            id: RomId(id),
            name: name.to_string(),
            base_path: PathBuf::from("/roms").join(name),
            rom_type,
            partition: partition.map(Arc::downgrade),
            has_bootimg: false,
        }
    }

    #[test]
    fn finds_roms_by_name_and_partition() {
        let usb = Arc::new(Partition::new("sda1", "ABCD-1234", "ext4"));
        let mut status = Status::default();
        status.add_roms(vec![
            rom(0, "Internal", RomType::Default, None),
            rom(1, "cm", RomType::AndroidInternal, None),
            rom(2, "cm", RomType::AndroidUsbDir, Some(&usb)),
        ]);

        assert_eq!(status.find_rom("cm", None).map(|r| r.id), Some(RomId(1)));
        assert_eq!(
            status.find_rom("cm", Some("ABCD-1234")).map(|r| r.id),
            Some(RomId(2))
        );
        assert!(status.find_rom("cm", Some("other")).is_none());
    }

    #[test]
    fn removing_usb_roms_clears_dangling_selections() {
        let usb = Arc::new(Partition::new("sda1", "u", "ext4"));
        let mut status = Status::default();
        status.add_roms(vec![
            rom(0, "Internal", RomType::Default, None),
            rom(1, "ubuntu", RomType::UbuntuUsbDir, Some(&usb)),
        ]);
        status.current_rom = Some(RomId(1));
        status.auto_boot_rom = Some(RomId(0));

        assert_eq!(status.remove_usb_roms(), 1);
        assert_eq!(status.roms.len(), 1);
        assert_eq!(status.current_rom, None);
        assert_eq!(status.auto_boot_rom, Some(RomId(0)));
    }
}

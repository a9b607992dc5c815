// SPDX-License-Identifier: GPL-3.0-only

//! `blkid` output parsing
//!
//! Lines look like `/dev/block/sda1: LABEL="My Disk" UUID="ABCD-1234" TYPE="vfat"`.

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    /// Full device path as printed by blkid
    pub device: String,
    /// Last path component of `device`
    pub name: String,
    pub uuid: String,
    /// Empty when blkid did not report a type
    pub fs_type: String,
}

/// Split `KEY="value"` pairs; values may contain spaces.
fn tokens(mut rest: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();

    loop {
        rest = rest.trim_start();
        let Some((key, after)) = rest.split_once("=\"") else {
            break;
        };
        let Some((value, tail)) = after.split_once('"') else {
            break;
        };
        pairs.push((key.trim(), value));
        rest = tail;
    }

    pairs
}

fn parse_line(line: &str) -> Option<BlockEntry> {
    let (device, attributes) = line.split_once(':')?;
    let device = device.trim();
    let name = device.rsplit('/').next().unwrap_or(device).to_string();

    let mut uuid = None;
    let mut fs_type = String::new();
    for (key, value) in tokens(attributes) {
        match key {
            "UUID" => uuid = Some(value.to_string()),
            "TYPE" => fs_type = value.to_string(),
            _ => {}
        }
    }

    let Some(uuid) = uuid else {
        warn!("Part {} does not have UUID, line: {:?}", name, line);
        return None;
    };

    Some(BlockEntry {
        device: device.to_string(),
        name,
        uuid,
        fs_type,
    })
}

pub fn parse_blkid(output: &str) -> Vec<BlockEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(parse_line)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_uuid_and_type() {
        let entries = parse_blkid("/dev/block/sda1: UUID=\"ABCD-1234\" TYPE=\"ext4\"\n");

        assert_eq!(
            entries,
            vec![BlockEntry {
                device: "/dev/block/sda1".to_string(),
                name: "sda1".to_string(),
                uuid: "ABCD-1234".to_string(),
                fs_type: "ext4".to_string(),
            }]
        );
    }

    #[test]
    fn drops_lines_without_uuid() {
        let output = "/dev/block/mmcblk0p1: TYPE=\"vfat\"\n\
                      /dev/block/sdb1: LABEL=\"My Disk\" UUID=\"01D2-AB\" TYPE=\"ntfs\"\n";

        let entries = parse_blkid(output);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "sdb1");
        assert_eq!(entries[0].fs_type, "ntfs");
    }

    #[test]
    fn partuuid_is_not_mistaken_for_uuid() {
        let entries = parse_blkid("/dev/sda2: PARTUUID=\"p-1\" TYPE=\"ext4\"");
        assert!(entries.is_empty());
    }
}

/// Drive slot table

use crate::drive::backend;
use crate::error::{DriveError, Result};
use crate::geometry::{SectorAddress, SECTOR_LEN};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Mapping from drive slot number to backing image file
///
/// A slot without an entry is unmounted. Handlers only ever read the table;
/// mounting and unmounting belong to the operator.
#[derive(Debug, Clone, Default)]
pub struct DriveTable {
    drives: BTreeMap<u8, PathBuf>,
}

impl DriveTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an image file to a drive slot, replacing any previous binding
    pub fn mount<P: Into<PathBuf>>(&mut self, drive: u8, path: P) -> Option<PathBuf> {
        self.drives.insert(drive, path.into())
    }

    /// Remove the binding for a drive slot
    pub fn unmount(&mut self, drive: u8) -> Option<PathBuf> {
        self.drives.remove(&drive)
    }

    /// Get the image path for a drive slot
    pub fn path(&self, drive: u8) -> Option<&Path> {
        self.drives.get(&drive).map(|p| p.as_path())
    }

    /// Check whether a drive slot is mounted
    pub fn is_mounted(&self, drive: u8) -> bool {
        self.drives.contains_key(&drive)
    }

    /// Iterate mounted slots in ascending order
    pub fn mounted(&self) -> impl Iterator<Item = (u8, &Path)> {
        self.drives.iter().map(|(d, p)| (*d, p.as_path()))
    }

    /// Number of mounted slots
    pub fn len(&self) -> usize {
        self.drives.len()
    }

    /// Check if no slot is mounted
    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }

    fn require(&self, drive: u8) -> Result<&Path> {
        self.path(drive).ok_or(DriveError::NotMounted(drive))
    }

    /// Check that the image behind a drive slot can be opened
    pub fn check(&self, drive: u8) -> Result<()> {
        backend::check_image(self.require(drive)?)
    }

    /// Read one sector from a mounted drive
    pub fn read_sector(&self, addr: SectorAddress) -> Result<[u8; SECTOR_LEN]> {
        addr.validate()?;
        let path = self.require(addr.drive)?;
        backend::read_sector(path, addr.track, addr.sector)
    }

    /// Write one sector to a mounted drive
    pub fn write_sector(&self, addr: SectorAddress, data: &[u8]) -> Result<()> {
        addr.validate()?;
        let path = self.require(addr.drive)?;
        backend::write_sector(path, addr.track, addr.sector, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_unmount() {
        let mut table = DriveTable::new();
        assert!(table.is_empty());

        assert!(table.mount(0, "a.dsk").is_none());
        assert_eq!(table.mount(0, "b.dsk"), Some(PathBuf::from("a.dsk")));
        table.mount(3, "c.dsk");

        assert_eq!(table.len(), 2);
        assert_eq!(table.path(0), Some(Path::new("b.dsk")));
        assert!(table.is_mounted(3));

        assert_eq!(table.unmount(3), Some(PathBuf::from("c.dsk")));
        assert!(table.unmount(3).is_none());
        assert!(!table.is_mounted(3));
    }

    #[test]
    fn test_mounted_order() {
        let mut table = DriveTable::new();
        table.mount(9, "nine.dsk");
        table.mount(1, "one.dsk");

        let slots: Vec<u8> = table.mounted().map(|(d, _)| d).collect();
        assert_eq!(slots, vec![1, 9]);
    }

    #[test]
    fn test_unmounted_slot() {
        let table = DriveTable::new();
        assert!(matches!(table.check(2), Err(DriveError::NotMounted(2))));
        assert!(matches!(
            table.read_sector(SectorAddress::new(2, 0, 0)),
            Err(DriveError::NotMounted(2))
        ));
        assert!(matches!(
            table.write_sector(SectorAddress::new(2, 0, 0), &[0; SECTOR_LEN]),
            Err(DriveError::NotMounted(2))
        ));
    }

    #[test]
    fn test_geometry_checked_before_mount() {
        let table = DriveTable::new();
        assert!(matches!(
            table.read_sector(SectorAddress::new(0, 200, 0)),
            Err(DriveError::InvalidGeometry { .. })
        ));
    }
}

/// Sector I/O on raw image files
///
/// Every operation opens the image afresh, so remounting a slot or editing
/// the file between commands needs no cache invalidation.

use crate::error::{DriveError, Result};
use crate::geometry::{sector_offset, validate, SECTOR_LEN};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Check that an image file can be opened for reading
pub fn check_image<P: AsRef<Path>>(path: P) -> Result<()> {
    File::open(path)?;
    Ok(())
}

/// Read one sector from an image file
///
/// An image too short to contain the sector is an I/O error.
pub fn read_sector<P: AsRef<Path>>(path: P, track: u8, sector: u8) -> Result<[u8; SECTOR_LEN]> {
    validate(track, sector)?;

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(sector_offset(track, sector)))?;

    let mut data = [0u8; SECTOR_LEN];
    file.read_exact(&mut data)?;
    Ok(data)
}

/// Write one sector to an existing image file
///
/// The file is never created. Data is synced before returning. A failure
/// part way through may leave the sector partially written.
pub fn write_sector<P: AsRef<Path>>(path: P, track: u8, sector: u8, data: &[u8]) -> Result<()> {
    validate(track, sector)?;
    if data.len() != SECTOR_LEN {
        return Err(DriveError::InvalidLength {
            expected: SECTOR_LEN,
            actual: data.len(),
        });
    }

    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(sector_offset(track, sector)))?;
    file.write_all(data)?;
    file.sync_data()?;
    Ok(())
}

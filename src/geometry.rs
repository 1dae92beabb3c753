/// Fixed 8" floppy geometry and sector addressing
///
/// Images are raw sector dumps with no header:
/// - 77 tracks
/// - 32 sectors per track
/// - 137 bytes per sector
/// - Sectors are stored track-major: T0S0, T0S1, ... T0S31, T1S0, ...

use crate::error::{DriveError, Result};

/// Tracks per disk
pub const TRACKS: usize = 77;

/// Sectors per track
pub const SECTORS_PER_TRACK: usize = 32;

/// Sector size in bytes
pub const SECTOR_LEN: usize = 137;

/// Bytes in one track
pub const TRACK_LEN: usize = SECTOR_LEN * SECTORS_PER_TRACK;

/// Expected size of a complete image file
pub const IMAGE_SIZE: usize = TRACK_LEN * TRACKS;

/// Byte used to fill freshly formatted sectors (CP/M empty directory marker)
pub const FILLER_BYTE: u8 = 0xE5;

/// Address of a sector on a mounted drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorAddress {
    /// Drive slot number
    pub drive: u8,
    /// Track number (0-based)
    pub track: u8,
    /// Sector within the track (0-based)
    pub sector: u8,
}

impl SectorAddress {
    /// Create a new sector address
    pub fn new(drive: u8, track: u8, sector: u8) -> Self {
        Self {
            drive,
            track,
            sector,
        }
    }

    /// Check the track and sector against the disk geometry
    pub fn validate(&self) -> Result<()> {
        validate(self.track, self.sector)
    }

    /// Byte offset of this sector within an image file
    #[inline]
    pub fn offset(&self) -> u64 {
        sector_offset(self.track, self.sector)
    }
}

impl std::fmt::Display for SectorAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "drive {} track {} sector {}",
            self.drive, self.track, self.sector
        )
    }
}

/// Check a track/sector pair against the disk geometry
pub fn validate(track: u8, sector: u8) -> Result<()> {
    if (track as usize) < TRACKS && (sector as usize) < SECTORS_PER_TRACK {
        Ok(())
    } else {
        Err(DriveError::geometry(track, sector))
    }
}

/// Byte offset of a track/sector pair within an image file
#[inline]
pub fn sector_offset(track: u8, sector: u8) -> u64 {
    (track as u64) * TRACK_LEN as u64 + (sector as u64) * SECTOR_LEN as u64
}

/// Blank image creation

use crate::error::{DriveError, Result};
use crate::geometry::{FILLER_BYTE, TRACKS, TRACK_LEN};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

/// Create a new formatted image filled with the CP/M filler byte
///
/// Refuses to overwrite an existing file.
pub fn create_blank<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(DriveError::ImageExists(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let track = vec![FILLER_BYTE; TRACK_LEN];
    for _ in 0..TRACKS {
        file.write_all(&track)?;
    }
    file.sync_all()?;
    Ok(())
}

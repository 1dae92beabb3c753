use thiserror::Error;

/// Result type alias for drive and link operations
pub type Result<T> = std::result::Result<T, DriveError>;

/// Errors that can occur while serving disks or running transfers
#[derive(Debug, Error)]
pub enum DriveError {
    /// I/O error from the backing image, the serial link or a local file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Track or sector outside the fixed disk geometry
    #[error("Invalid geometry: track {track}, sector {sector} (max: {max_track}/{max_sector})")]
    InvalidGeometry {
        /// Requested track
        track: u8,
        /// Requested sector within the track
        sector: u8,
        /// Highest valid track number
        max_track: u8,
        /// Highest valid sector number
        max_sector: u8,
    },

    /// No image file is mounted in the drive slot
    #[error("Drive {0} not mounted")]
    NotMounted(u8),

    /// Sector payload of the wrong size
    #[error("Invalid sector length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required length
        expected: usize,
        /// Supplied length
        actual: usize,
    },

    /// The image file already exists and would be overwritten
    #[error("Image already exists: {0}")]
    ImageExists(String),

    /// The peer or the operator cancelled a block transfer
    #[error("Transfer cancelled: {0}")]
    Cancelled(String),

    /// A block transfer ran out of retries
    #[error("Transfer failed after {attempts} attempts: {stage}")]
    RetriesExhausted {
        /// Protocol stage that kept failing
        stage: &'static str,
        /// Number of attempts made
        attempts: usize,
    },
}

impl DriveError {
    /// Create a geometry error for the given track and sector
    pub fn geometry(track: u8, sector: u8) -> Self {
        DriveError::InvalidGeometry {
            track,
            sector,
            max_track: (crate::geometry::TRACKS - 1) as u8,
            max_sector: (crate::geometry::SECTORS_PER_TRACK - 1) as u8,
        }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        DriveError::Cancelled(message.into())
    }

    /// Create a retry exhaustion error
    pub fn retries(stage: &'static str, attempts: usize) -> Self {
        DriveError::RetriesExhausted { stage, attempts }
    }
}

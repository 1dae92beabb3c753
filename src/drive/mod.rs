/// Virtual drives backed by raw image files

/// Sector I/O against backing image files
pub mod backend;
/// Blank image creation
pub mod image;
/// Drive slot to image file mapping
pub mod table;

pub use backend::{check_image, read_sector, write_sector};
pub use image::create_blank;
pub use table::DriveTable;

/*!
# serialdrive

Disk-over-serial server for an Altair 8800 running CP/M 2.2. The host emulates
8" floppy drives backed by raw image files, sharing one serial line between the
terminal session, in-band disk commands and XMODEM file transfers.

## Features

- Byte-at-a-time framing of in-band commands (attention byte `0xFF`)
- Sector reads and writes against raw 77 x 32 x 137 byte images
- Up to 256 drive slots mounted and unmounted at runtime
- Side channel for XMODEM transfers, started from the remote or the host
- Keystroke relay that never collides with a pending command byte

## Quick Start

```rust,no_run
use serialdrive::{Link, Session, SectorAddress};
use std::sync::Arc;

let port = std::fs::OpenOptions::new().read(true).write(true).open("/dev/ttyUSB0")?;
let link = Arc::new(Link::new(port.try_clone()?));
link.mount(0, "serialcpm.dsk");

// Serve commands until the port closes
let mut session = Session::new(Arc::clone(&link), std::io::stdout());
session.run(port)?;

// Sectors can also be read directly
let data = link.drives().read_sector(SectorAddress::new(0, 2, 0))?;
assert_eq!(data.len(), 137);
# Ok::<(), serialdrive::DriveError>(())
```

## Wire Protocol

| Command | Arguments | Reply |
|---|---|---|
| `FF 0F` | drive | `00` or `FF` |
| `FF 10` | drive, track, sector | `00` + 137 bytes, or `FF` |
| `FF 11` | drive, track, sector, 137 bytes | `00` or `FF` |
| `FF 12` | | host receives a file by XMODEM |
| `FF 13` | | host sends a file by XMODEM |
| `FF FE` | byte | none (debug output) |
| `FF FF` | | literal `FF` data byte |

## Modules

- `geometry`: Disk geometry constants and sector addressing
- `drive`: Drive table and image file I/O
- `protocol`: Command codes and the framing state machine
- `link`: Shared link state, reader session, side channel and relay
- `transfer`: Block transfer service and XMODEM
- `error`: Error types and Result alias
*/

#![warn(missing_docs)]

/// Drive table and image file I/O
pub mod drive;
/// Error types and Result alias
pub mod error;
/// Disk geometry constants and sector addressing
pub mod geometry;
/// Shared link state, reader session, side channel and relay
pub mod link;
/// Command codes and the framing state machine
pub mod protocol;
/// Block transfer service and XMODEM
pub mod transfer;

// Re-export common types
pub use drive::{create_blank, DriveTable};
pub use error::{DriveError, Result};
pub use geometry::{SectorAddress, IMAGE_SIZE, SECTORS_PER_TRACK, SECTOR_LEN, TRACKS};
pub use link::{
    Keystroke, Link, Relay, Session, SideChannel, SideChannelBridge, SideChannelGuard, MENU_KEY,
};
pub use protocol::{Command, Frame, Framer, LinkState, PendingCommand, Request};
pub use transfer::{BlockTransfer, Channel, Direction, FilePicker, TransferService, Xmodem};

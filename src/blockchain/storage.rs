use std::fs::File;
use std::io::{self, Cursor, Read, Seek, Write};

/// Backing store for a chain: a seekable byte file with a durability barrier.
pub trait Storage: Read + Write + Seek {
    /// Makes everything written so far durable.
    fn sync(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl Storage for File {
    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.sync_data()
    }
}

impl Storage for Cursor<Vec<u8>> {}

use crate::models::{SummaryRow, HEADER};
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub struct SummaryWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    created: bool,
}

impl SummaryWriter {
    /// Create the file with a header row, or open an existing one for appending.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (file, created) = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => (f, true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let f = OpenOptions::new()
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("opening {} for append", path.display()))?;
                (f, false)
            }
            Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
        };
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if created {
            writer.write_record(HEADER)?;
            writer.flush()?;
        }
        Ok(SummaryWriter { path, writer, created })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when this call created the file.
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn append(&mut self, row: &SummaryRow) -> Result<()> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        Ok(())
    }
}

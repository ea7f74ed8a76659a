//! File-backed scratch store
//!
//! Stands in for RTC memory on the host: the file holds exactly one scratch
//! region and is replaced atomically on save.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::PathBuf;

use log::info;
use willow_core::scratch::{
    BackendMessage, SCRATCH_REGION_LEN, ScratchError, ScratchState, ScratchStore, decode_region,
    encode_region,
};

pub struct FileScratchStore {
    path: PathBuf,
}

impl FileScratchStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn backend_error(context: &str, e: io::Error) -> ScratchError {
    let mut message = BackendMessage::new();
    let _ = write!(message, "{}: {}", context, e);
    ScratchError::Backend(message)
}

impl ScratchStore for FileScratchStore {
    fn load(&mut self) -> Result<ScratchState, ScratchError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No scratch file at {}, cold start", self.path.display());
                return Ok(ScratchState::default());
            }
            Err(e) => return Err(backend_error("read", e)),
        };

        let region: [u8; SCRATCH_REGION_LEN] =
            bytes.try_into().map_err(|_| ScratchError::Corrupt)?;
        Ok(decode_region(&region)?.unwrap_or_default())
    }

    fn save(&mut self, state: &ScratchState) -> Result<(), ScratchError> {
        let region = encode_region(state)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, region).map_err(|e| backend_error("write", e))?;
        fs::rename(&tmp, &self.path).map_err(|e| backend_error("rename", e))
    }
}

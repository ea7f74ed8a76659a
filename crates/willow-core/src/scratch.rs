//! Scratch state: the only data that survives power-down
//!
//! The state is kept in a small fixed-size region (RTC memory on the device, a
//! file on the host). Region layout:
//!
//! - magic: 4 bytes (`WLW1`)
//! - length: 1 byte, length of the encoded body
//! - body: postcard-encoded [`ScratchState`] followed by a CRC-32 (ISCSI)
//! - padding: zero up to [`SCRATCH_REGION_LEN`]
//!
//! A region without the magic is treated as a first-ever boot. A region with
//! the magic but a bad checksum is reported as corrupt.

use crc::{CRC_32_ISCSI, Crc};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::acquisition::FilteredSample;

pub const SCRATCH_REGION_LEN: usize = 32;

const MAGIC: [u8; 4] = *b"WLW1";
const HEADER_LEN: usize = MAGIC.len() + 1;

static CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Values last transmitted to the broker, used as the delta baseline.
///
/// This is *not* the most recent sample: it only changes after a confirmed
/// upload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ScratchState {
    pub last_uploaded_temperature: f32,
    pub last_uploaded_moisture: f32,
}

impl ScratchState {
    /// Baseline after `sample` has been uploaded.
    pub fn from_upload(sample: &FilteredSample) -> Self {
        Self {
            last_uploaded_temperature: sample.temperature,
            last_uploaded_moisture: sample.moisture,
        }
    }
}

/// Backend failure text, truncated to fit.
pub type BackendMessage = heapless::String<64>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScratchError {
    #[error("scratch region failed its integrity check")]
    Corrupt,
    #[error("scratch state does not fit the scratch region")]
    Encode,
    #[error("scratch backend error: {0}")]
    Backend(BackendMessage),
}

/// Persistent scratch store. Survives power loss; yields the default state on
/// first boot.
pub trait ScratchStore {
    fn load(&mut self) -> Result<ScratchState, ScratchError>;
    fn save(&mut self, state: &ScratchState) -> Result<(), ScratchError>;
}

impl<T: ScratchStore + ?Sized> ScratchStore for &mut T {
    fn load(&mut self) -> Result<ScratchState, ScratchError> {
        (**self).load()
    }

    fn save(&mut self, state: &ScratchState) -> Result<(), ScratchError> {
        (**self).save(state)
    }
}

/// Serialize `state` into a complete scratch region.
pub fn encode_region(state: &ScratchState) -> Result<[u8; SCRATCH_REGION_LEN], ScratchError> {
    let mut region = [0u8; SCRATCH_REGION_LEN];
    region[..MAGIC.len()].copy_from_slice(&MAGIC);

    let body_len = postcard::to_slice_crc32(state, &mut region[HEADER_LEN..], CRC.digest())
        .map_err(|_| ScratchError::Encode)?
        .len();
    region[MAGIC.len()] = body_len as u8;

    Ok(region)
}

/// Decode a scratch region. `Ok(None)` means the region was never written.
pub fn decode_region(
    region: &[u8; SCRATCH_REGION_LEN],
) -> Result<Option<ScratchState>, ScratchError> {
    if region[..MAGIC.len()] != MAGIC {
        return Ok(None);
    }

    let body_len = region[MAGIC.len()] as usize;
    let body = region
        .get(HEADER_LEN..HEADER_LEN + body_len)
        .ok_or(ScratchError::Corrupt)?;

    postcard::from_bytes_crc32(body, CRC.digest())
        .map(Some)
        .map_err(|_| ScratchError::Corrupt)
}

/// Scratch store over a plain memory region, as on a device with
/// battery-backed or RTC RAM.
pub struct MemoryScratchStore {
    region: [u8; SCRATCH_REGION_LEN],
}

impl MemoryScratchStore {
    /// A region as found on first power-up.
    pub const fn blank() -> Self {
        Self {
            region: [0; SCRATCH_REGION_LEN],
        }
    }

    pub const fn from_region(region: [u8; SCRATCH_REGION_LEN]) -> Self {
        Self { region }
    }

    pub fn region(&self) -> &[u8; SCRATCH_REGION_LEN] {
        &self.region
    }
}

impl ScratchStore for MemoryScratchStore {
    fn load(&mut self) -> Result<ScratchState, ScratchError> {
        Ok(decode_region(&self.region)?.unwrap_or_default())
    }

    fn save(&mut self, state: &ScratchState) -> Result<(), ScratchError> {
        self.region = encode_region(state)?;
        Ok(())
    }
}

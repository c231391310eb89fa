//! CRC-32C (Castagnoli) over frame payloads.
//!
//! There are two implementations that must produce identical results for every input: a
//!  portable table-driven one (the `crc` crate's `CRC_32_ISCSI` algorithm) and one using the
//!  CPU's CRC instructions (SSE4.2 on x86_64, the `crc` extension on aarch64). [crc32c] picks
//!  the hardware path if the running CPU supports it.

use std::fmt::{Debug, Formatter};
use crc::{Crc, CRC_32_ISCSI};

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[derive(Clone, Copy, Eq, PartialEq, Default)]
pub struct Checksum(pub u32);
impl Debug for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
impl Checksum {
    pub const NONE: Checksum = Checksum(0);

    pub fn of(payload: &[u8]) -> Checksum {
        Checksum(crc32c(payload))
    }
}

/// CRC-32C of `data`, using the fastest implementation available on this CPU
pub fn crc32c(data: &[u8]) -> u32 {
    if hardware_crc32c_available() {
        crc32c_hw(data)
    }
    else {
        crc32c_sw(data)
    }
}

/// Portable CRC-32C: reflected, initial value `0xffff_ffff`, final value complemented
pub fn crc32c_sw(data: &[u8]) -> u32 {
    CASTAGNOLI.checksum(data)
}

/// CRC-32C using the CPU's CRC instructions. Falls back to [crc32c_sw] on CPUs without them, so
///  this is always safe to call.
pub fn crc32c_hw(data: &[u8]) -> u32 {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("sse4.2") {
            // SAFETY: the required CPU feature was just detected
            return unsafe { x86::crc32c(data) };
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        if std::arch::is_aarch64_feature_detected!("crc") {
            // SAFETY: the required CPU feature was just detected
            return unsafe { aarch64::crc32c(data) };
        }
    }

    crc32c_sw(data)
}

pub fn hardware_crc32c_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("sse4.2")
    }
    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("crc")
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

/// The CRC instructions consume 8 bytes per step in little-endian order, which is the same
///  order the reflected algorithm processes single bytes in.
fn le_word(chunk: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(chunk);
    u64::from_le_bytes(bytes)
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use std::arch::x86_64::{_mm_crc32_u64, _mm_crc32_u8};

    #[target_feature(enable = "sse4.2")]
    pub unsafe fn crc32c(data: &[u8]) -> u32 {
        let mut chunks = data.chunks_exact(8);

        let mut crc = u32::MAX as u64;
        for chunk in &mut chunks {
            crc = _mm_crc32_u64(crc, super::le_word(chunk));
        }

        let mut crc = crc as u32;
        for &b in chunks.remainder() {
            crc = _mm_crc32_u8(crc, b);
        }
        !crc
    }
}

#[cfg(target_arch = "aarch64")]
mod aarch64 {
    use std::arch::aarch64::{__crc32cb, __crc32cd};

    #[target_feature(enable = "crc")]
    pub unsafe fn crc32c(data: &[u8]) -> u32 {
        let mut chunks = data.chunks_exact(8);

        let mut crc = u32::MAX;
        for chunk in &mut chunks {
            crc = __crc32cd(crc, super::le_word(chunk));
        }
        for &b in chunks.remainder() {
            crc = __crc32cb(crc, b);
        }
        !crc
    }
}

//! ISO 7816-3 Fi/Di tables
//!
//! The clock rate conversion integer F and the baud rate adjustment integer D
//! are announced as 4 bit indices, in TA1 of the ATR or PPS1 of a PPS request.

/// Table 7 of ISO 7816-3:2006, zero entries are reserved
pub const FI_TABLE: [u16; 16] = [
    372, 372, 558, 744, 1116, 1488, 1860, 0, 0, 512, 768, 1024, 1536, 2048, 0, 0,
];

/// Table 8 of ISO 7816-3:2006, zero entries are reserved
pub const DI_TABLE: [u8; 16] = [0, 1, 2, 4, 8, 16, 32, 64, 12, 20, 0, 0, 0, 0, 0, 0];

/// The F/D ratio used when no TA1 is present (Fi = 372, Di = 1)
pub const DEFAULT_FD_RATIO: u16 = 372;

/// Compute the F/D ratio from the F and D indices
///
/// Returns `None` when either index points at a reserved table entry.
pub fn compute_fd_ratio(f_index: u8, d_index: u8) -> Option<u16> {
    let f = *FI_TABLE.get(usize::from(f_index))?;
    let d = *DI_TABLE.get(usize::from(d_index))?;
    if f == 0 || d == 0 {
        return None;
    }
    Some(f / u16::from(d))
}

/// Compute the F/D ratio from a packed TA1/PPS1 byte (Fi in the high nibble)
pub fn fd_ratio_from_byte(fidi: u8) -> Option<u16> {
    compute_fd_ratio(fidi >> 4, fidi & 0x0F)
}

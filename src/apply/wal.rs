// ABOUTME: WAL segment naming for the prefetched SQL file layout
// ABOUTME: Maps an LSN to the canonical 24-hex-character segment name

use crate::lsn::Lsn;
use anyhow::{bail, Result};

/// Compute the canonical WAL segment name containing `lsn`.
///
/// The name is `TTTTTTTTXXXXXXXXYYYYYYYY`: the timeline, then the segment
/// number split by the number of segments per 4 GiB of WAL, all zero-padded
/// uppercase hex. This matches the file names the source cluster itself
/// would use for its WAL segments, which is what the prefetch stage derives
/// its `.sql` file names from.
pub fn wal_segment_name(timeline: u32, lsn: Lsn, wal_segment_size: u32) -> String {
    let seg_size = wal_segment_size as u64;
    let segno = lsn.as_u64() / seg_size;
    let segments_per_xlog_id = 0x1_0000_0000u64 / seg_size;

    format!(
        "{:08X}{:08X}{:08X}",
        timeline,
        segno / segments_per_xlog_id,
        segno % segments_per_xlog_id
    )
}

/// Validate a WAL segment size read from the prefetch context file.
///
/// The valid range is the one the source cluster enforces: a power of two
/// between 1 MiB and 1 GiB.
pub fn validate_wal_segment_size(wal_segment_size: u32) -> Result<()> {
    const MIN: u32 = 1024 * 1024;
    const MAX: u32 = 1024 * 1024 * 1024;

    if !wal_segment_size.is_power_of_two() || !(MIN..=MAX).contains(&wal_segment_size) {
        bail!(
            "Invalid WAL segment size {}: expected a power of two between 1MB and 1GB",
            wal_segment_size
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEG_16MB: u32 = 0x0100_0000;

    #[test]
    fn test_first_segments_on_timeline_1() {
        let lsn: Lsn = "0/1600000".parse().unwrap();
        assert_eq!(wal_segment_name(1, lsn, SEG_16MB), "000000010000000000000001");

        let lsn: Lsn = "0/2000000".parse().unwrap();
        assert_eq!(wal_segment_name(1, lsn, SEG_16MB), "000000010000000000000002");
    }

    #[test]
    fn test_segment_boundaries() {
        // the last byte of segment 1 and the first byte of segment 2
        let last: Lsn = "0/1FFFFFF".parse().unwrap();
        let first: Lsn = "0/2000000".parse().unwrap();
        assert_eq!(wal_segment_name(1, last, SEG_16MB), "000000010000000000000001");
        assert_eq!(wal_segment_name(1, first, SEG_16MB), "000000010000000000000002");
    }

    #[test]
    fn test_names_above_4gib_use_the_xlog_id_split() {
        // 16MB segments: 256 segments per 4GiB of WAL, so LSN 1/0 starts
        // the segment named ...00000001 00000000, not ...00000000 00000100.
        let lsn: Lsn = "1/0".parse().unwrap();
        assert_eq!(wal_segment_name(1, lsn, SEG_16MB), "000000010000000100000000");

        let lsn: Lsn = "5/A0000000".parse().unwrap();
        assert_eq!(wal_segment_name(1, lsn, SEG_16MB), "0000000100000005000000A0");
    }

    #[test]
    fn test_other_segment_sizes() {
        // 64MB segments: 64 per 4GiB
        let seg_64mb: u32 = 0x0400_0000;
        let lsn: Lsn = "1/0".parse().unwrap();
        assert_eq!(wal_segment_name(3, lsn, seg_64mb), "000000030000000100000000");

        // 1GB segments: 4 per 4GiB
        let seg_1gb: u32 = 0x4000_0000;
        let lsn: Lsn = "0/C0000000".parse().unwrap();
        assert_eq!(wal_segment_name(1, lsn, seg_1gb), "000000010000000000000003");
    }

    #[test]
    fn test_timeline_is_the_first_8_digits() {
        let lsn: Lsn = "0/1600000".parse().unwrap();
        assert_eq!(wal_segment_name(0x2A, lsn, SEG_16MB), "0000002A0000000000000001");
    }

    #[test]
    fn test_validate_wal_segment_size() {
        assert!(validate_wal_segment_size(SEG_16MB).is_ok());
        assert!(validate_wal_segment_size(1024 * 1024).is_ok());
        assert!(validate_wal_segment_size(1024 * 1024 * 1024).is_ok());

        assert!(validate_wal_segment_size(0).is_err());
        assert!(validate_wal_segment_size(512 * 1024).is_err());
        assert!(validate_wal_segment_size(SEG_16MB + 1).is_err());
        assert!(validate_wal_segment_size(3 * 1024 * 1024).is_err());
    }
}

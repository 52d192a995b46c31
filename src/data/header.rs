use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{QcError, Result};

/// Seconds between 1904-01-01T00:00:00Z (file epoch) and the Unix epoch.
pub const FILE_EPOCH_OFFSET_SECS: i64 = 2_082_844_800;

// ---------------------------------------------------------------------------
// HeaderBlock – one keyed block from the version 6 header section
// ---------------------------------------------------------------------------

/// Keyed block from the extended header section. The payload is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderBlock {
    /// Four character block key.
    pub key: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl HeaderBlock {
    /// Bytes this block occupies in the file (key + size field + payload).
    pub fn encoded_len(&self) -> usize {
        8 + self.data.len()
    }
}

// ---------------------------------------------------------------------------
// CsFileHeader
// ---------------------------------------------------------------------------

/// Metadata decoded from the front of a cross-spectra file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CsFileHeader {
    pub version: i16,
    pub timestamp: DateTime<Utc>,
    /// Spectra kind; values >= 2 carry an extra quality channel per range row.
    pub cskind: i16,
    pub site_code: String,
    pub cover_minutes: i32,
    pub deleted_source: bool,
    pub override_source: bool,
    pub start_freq_mhz: f32,
    pub rep_freq_mhz: f32,
    pub bandwidth_khz: f32,
    pub sweep_up: bool,
    pub num_doppler_cells: i32,
    pub num_range_cells: i32,
    pub first_range_cell: i32,
    pub range_cell_dist_km: f32,
    pub output_interval: i32,
    pub create_type_code: String,
    pub creator_version: String,
    pub num_active_channels: i32,
    pub num_spectra_channels: i32,
    /// Bit mask of active antenna channels.
    pub active_channels: u32,
    /// Extended header blocks, in file order.
    pub blocks: Vec<HeaderBlock>,
}

impl CsFileHeader {
    /// `(num_range, num_doppler)` after checking both are strictly positive.
    pub fn dimensions(&self) -> Result<(usize, usize)> {
        let range = usize::try_from(self.num_range_cells).ok().filter(|&n| n > 0);
        let doppler = usize::try_from(self.num_doppler_cells).ok().filter(|&n| n > 0);
        match (range, doppler) {
            (Some(r), Some(d)) => Ok((r, d)),
            _ => Err(QcError::Format(format!(
                "invalid dimensions: {} range cells, {} doppler cells",
                self.num_range_cells, self.num_doppler_cells
            ))),
        }
    }

    pub fn has_quality(&self) -> bool {
        self.cskind >= 2
    }

    /// Size of the version 6 block section (excluding its own size field).
    pub fn v6_section_size(&self) -> usize {
        self.blocks.iter().map(HeaderBlock::encoded_len).sum()
    }

    /// Total encoded header size in bytes.
    pub fn header_size(&self) -> usize {
        100 + self.v6_section_size() + 4
    }

    /// Seconds since the file epoch, as stored on disk.
    pub fn raw_timestamp(&self) -> Result<u32> {
        u32::try_from(self.timestamp.timestamp() + FILE_EPOCH_OFFSET_SECS).map_err(|_| {
            QcError::Format(format!("timestamp {} outside file range", self.timestamp))
        })
    }

    pub fn summary(&self) -> HeaderSummary {
        HeaderSummary {
            site_code: self.site_code.clone(),
            timestamp: self.timestamp.to_rfc3339(),
            version: self.version,
            cskind: self.cskind,
            num_range_cells: self.num_range_cells,
            num_doppler_cells: self.num_doppler_cells,
            start_freq_mhz: self.start_freq_mhz,
            bandwidth_khz: self.bandwidth_khz,
            range_cell_dist_km: self.range_cell_dist_km,
            blocks: self.blocks.len(),
        }
    }
}

/// Decode a stored file timestamp.
pub fn timestamp_from_raw(seconds: u32) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(i64::from(seconds) - FILE_EPOCH_OFFSET_SECS, 0)
        .ok_or_else(|| QcError::Format(format!("timestamp {seconds} out of range")))
}

/// Flat view of a header, one CSV row per file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderSummary {
    pub site_code: String,
    pub timestamp: String,
    pub version: i16,
    pub cskind: i16,
    pub num_range_cells: i32,
    pub num_doppler_cells: i32,
    pub start_freq_mhz: f32,
    pub bandwidth_khz: f32,
    pub range_cell_dist_km: f32,
    pub blocks: usize,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_header(num_range: i32, num_doppler: i32) -> CsFileHeader {
        CsFileHeader {
            version: 6,
            timestamp: timestamp_from_raw(3_707_740_800).unwrap(),
            cskind: 1,
            site_code: "ASSA".to_string(),
            cover_minutes: 60,
            deleted_source: false,
            override_source: true,
            start_freq_mhz: 4.53,
            rep_freq_mhz: 2.0,
            bandwidth_khz: 25.7,
            sweep_up: true,
            num_doppler_cells: num_doppler,
            num_range_cells: num_range,
            first_range_cell: 1,
            range_cell_dist_km: 5.83,
            output_interval: 60,
            create_type_code: "RDLn".to_string(),
            creator_version: "1.0 ".to_string(),
            num_active_channels: 3,
            num_spectra_channels: 3,
            active_channels: 0b111,
            blocks: Vec::new(),
        }
    }

    #[test]
    fn test_timestamp_round_trip() {
        let raw = 3_707_740_800;
        let ts = timestamp_from_raw(raw).unwrap();
        let mut header = sample_header(2, 2);
        header.timestamp = ts;
        assert_eq!(header.raw_timestamp().unwrap(), raw);
    }

    #[test]
    fn test_file_epoch() {
        let ts = timestamp_from_raw(0).unwrap();
        assert_eq!(ts.to_rfc3339(), "1904-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_dimensions_rejects_non_positive() {
        assert_eq!(sample_header(3, 8).dimensions().unwrap(), (3, 8));
        assert!(sample_header(0, 8).dimensions().unwrap_err().is_format_error());
        assert!(sample_header(3, -1).dimensions().unwrap_err().is_format_error());
    }

    #[test]
    fn test_header_size_counts_blocks() {
        let mut header = sample_header(2, 2);
        assert_eq!(header.header_size(), 104);
        header.blocks.push(HeaderBlock {
            key: "TIME".to_string(),
            data: vec![0; 12],
        });
        assert_eq!(header.v6_section_size(), 20);
        assert_eq!(header.header_size(), 124);
    }
}

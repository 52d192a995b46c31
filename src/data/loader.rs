use std::io::Read;

use log::{debug, warn};
use num_complex::Complex64;

use crate::error::{QcError, Result};
use super::header::{timestamp_from_raw, CsFileHeader, HeaderBlock};
use super::model::{CsFile, Samples, Spectrum};
use super::serialization::{ByteOrder, Deserializer, Serializer};

/// Every cross-spectra file is big-endian.
pub const FILE_BYTE_ORDER: ByteOrder = ByteOrder::BigEndian;

/// The only header layout this reader understands.
pub const SUPPORTED_VERSION: i16 = 6;

/// Header size up to and including each `vN_extent` field, for N = 1..=5.
const EXTENT_BASES: [usize; 5] = [10, 16, 24, 72, 100];

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Decode one cross-spectra file from an in-memory buffer.
///
/// Layout (big-endian):
/// * header fields, ending with the version 6 keyed block section
/// * per range row: antenna1, antenna2, antenna3 (real `f32` rows),
///   cross12, cross13, cross23 (complex rows, `f32` re/im interleaved),
///   and a real quality row when `cskind >= 2`
///
/// No partially decoded file is ever returned.
pub fn load(buf: &[u8]) -> Result<CsFile> {
    let mut de = Deserializer::new(buf, FILE_BYTE_ORDER);
    let header = read_header(&mut de).map_err(truncated("header"))?;
    let spectra = read_spectra(&mut de, &header)?;
    if de.remaining() > 0 {
        warn!(
            "{}: {} trailing bytes after spectra ignored",
            header.site_code,
            de.remaining()
        );
    }
    spectra.into_file(header)
}

/// Read everything from `reader`, then decode it.
pub fn load_from<R: Read>(mut reader: R) -> Result<CsFile> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    load(&buf)
}

/// Encode a file back into its on-disk representation.
///
/// Cross channels must still be complex and the antenna/quality channels
/// real; spectra are written as `f32`.
pub fn dump(file: &CsFile) -> Result<Vec<u8>> {
    let header = file.header();
    if header.version != SUPPORTED_VERSION {
        return Err(QcError::UnsupportedVersion(header.version));
    }
    let (num_range, num_doppler) = header.dimensions()?;
    if header.has_quality() != file.quality().is_some() {
        return Err(QcError::Format(format!(
            "cskind {} does not match presence of quality channel",
            header.cskind
        )));
    }

    let mut ser = Serializer::new(FILE_BYTE_ORDER);
    write_header(&mut ser, header)?;

    let real = [file.antenna1(), file.antenna2(), file.antenna3()];
    let complex = [file.cross12(), file.cross13(), file.cross23()];
    for row in 0..num_range {
        let cells = row * num_doppler..(row + 1) * num_doppler;
        for sp in real {
            write_real_row(&mut ser, sp, cells.clone())?;
        }
        for sp in complex {
            write_complex_row(&mut ser, sp, cells.clone())?;
        }
        if let Some(q) = file.quality() {
            write_real_row(&mut ser, q, cells.clone())?;
        }
    }
    Ok(ser.into_bytes())
}

impl CsFile {
    pub fn from_bytes(buf: &[u8]) -> Result<CsFile> {
        load(buf)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        dump(self)
    }
}

/// Number of bytes the spectra of `header` occupy.
pub fn spectra_len(header: &CsFileHeader) -> Result<usize> {
    let (num_range, num_doppler) = header.dimensions()?;
    // three real rows + three complex rows (+ quality row)
    let floats_per_row = (if header.has_quality() { 10 } else { 9 }) * num_doppler;
    num_range
        .checked_mul(floats_per_row)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| QcError::Format(format!("{num_range}x{num_doppler} spectra overflow usize")))
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

fn truncated(section: &'static str) -> impl Fn(QcError) -> QcError {
    move |err| match err {
        QcError::OutOfBounds { offset, needed, remaining } => QcError::Format(format!(
            "truncated {section}: needed {needed} bytes at offset {offset}, {remaining} left"
        )),
        other => other,
    }
}

fn read_header(de: &mut Deserializer<'_>) -> Result<CsFileHeader> {
    let version = de.unpack_i16()?;
    if version != SUPPORTED_VERSION {
        return Err(QcError::UnsupportedVersion(version));
    }
    let timestamp = timestamp_from_raw(de.unpack_u32()?)?;
    let mut extents = [0i32; 5];
    extents[0] = de.unpack_i32()?;

    let cskind = de.unpack_i16()?;
    extents[1] = de.unpack_i32()?;

    let site_code = de.unpack_fixed_string(4)?;
    extents[2] = de.unpack_i32()?;

    let cover_minutes = de.unpack_i32()?;
    let deleted_source = de.unpack_i32()? != 0;
    let override_source = de.unpack_i32()? != 0;
    let start_freq_mhz = de.unpack_f32()?;
    let rep_freq_mhz = de.unpack_f32()?;
    let bandwidth_khz = de.unpack_f32()?;
    let sweep_up = de.unpack_i32()? != 0;
    let num_doppler_cells = de.unpack_i32()?;
    let num_range_cells = de.unpack_i32()?;
    let first_range_cell = de.unpack_i32()?;
    let range_cell_dist_km = de.unpack_f32()?;
    extents[3] = de.unpack_i32()?;

    let output_interval = de.unpack_i32()?;
    let create_type_code = de.unpack_fixed_string(4)?;
    let creator_version = de.unpack_fixed_string(4)?;
    let num_active_channels = de.unpack_i32()?;
    let num_spectra_channels = de.unpack_i32()?;
    let active_channels = de.unpack_u32()?;
    extents[4] = de.unpack_i32()?;

    let mut section_left = de.unpack_u32()? as usize;
    let mut blocks = Vec::new();
    while section_left > 0 {
        let key = de.unpack_fixed_string(4)?;
        let size = de.unpack_u32()? as usize;
        let consumed = size + 8;
        if consumed > section_left {
            return Err(QcError::Format(format!(
                "header block {key:?} of {size} bytes overruns header section"
            )));
        }
        let data = de.unpack_bytes(size)?.to_vec();
        debug!("header block {key:?}: {size} bytes");
        blocks.push(HeaderBlock { key, data });
        section_left -= consumed;
    }

    let header = CsFileHeader {
        version,
        timestamp,
        cskind,
        site_code,
        cover_minutes,
        deleted_source,
        override_source,
        start_freq_mhz,
        rep_freq_mhz,
        bandwidth_khz,
        sweep_up,
        num_doppler_cells,
        num_range_cells,
        first_range_cell,
        range_cell_dist_km,
        output_interval,
        create_type_code,
        creator_version,
        num_active_channels,
        num_spectra_channels,
        active_channels,
        blocks,
    };

    for (n, (&stored, expected)) in extents.iter().zip(expected_extents(&header)).enumerate() {
        if i64::from(stored) != expected {
            warn!(
                "{}: v{} extent is {stored}, header size implies {expected}",
                header.site_code,
                n + 1
            );
        }
    }
    Ok(header)
}

fn expected_extents(header: &CsFileHeader) -> [i64; 5] {
    let size = header.header_size() as i64;
    EXTENT_BASES.map(|base| size - base as i64)
}

/// On-disk `vN_extent` values for a header of `header_size` bytes.
fn extent_fields(header_size: usize) -> Result<[i32; 5]> {
    let mut extents = [0i32; 5];
    for (slot, base) in extents.iter_mut().zip(EXTENT_BASES) {
        *slot = header_size
            .checked_sub(base)
            .and_then(|e| i32::try_from(e).ok())
            .ok_or_else(|| QcError::Format(format!("header of {header_size} bytes does not fit its extent fields")))?;
    }
    Ok(extents)
}

fn write_header(ser: &mut Serializer, header: &CsFileHeader) -> Result<()> {
    let extents = extent_fields(header.header_size())?;

    ser.pack_i16(header.version);
    ser.pack_u32(header.raw_timestamp()?);
    ser.pack_i32(extents[0]);

    ser.pack_i16(header.cskind);
    ser.pack_i32(extents[1]);

    ser.pack_fixed_string(&header.site_code, 4)?;
    ser.pack_i32(extents[2]);

    ser.pack_i32(header.cover_minutes);
    ser.pack_i32(i32::from(header.deleted_source));
    ser.pack_i32(i32::from(header.override_source));
    ser.pack_f32(header.start_freq_mhz);
    ser.pack_f32(header.rep_freq_mhz);
    ser.pack_f32(header.bandwidth_khz);
    ser.pack_i32(i32::from(header.sweep_up));
    ser.pack_i32(header.num_doppler_cells);
    ser.pack_i32(header.num_range_cells);
    ser.pack_i32(header.first_range_cell);
    ser.pack_f32(header.range_cell_dist_km);
    ser.pack_i32(extents[3]);

    ser.pack_i32(header.output_interval);
    ser.pack_fixed_string(&header.create_type_code, 4)?;
    ser.pack_fixed_string(&header.creator_version, 4)?;
    ser.pack_i32(header.num_active_channels);
    ser.pack_i32(header.num_spectra_channels);
    ser.pack_u32(header.active_channels);
    ser.pack_i32(extents[4]);

    let section = u32::try_from(header.v6_section_size())
        .map_err(|_| QcError::Format("header block section exceeds u32".to_string()))?;
    ser.pack_u32(section);
    for block in &header.blocks {
        let size = u32::try_from(block.data.len())
            .map_err(|_| QcError::Format(format!("header block {:?} exceeds u32", block.key)))?;
        ser.pack_fixed_string(&block.key, 4)?;
        ser.pack_u32(size);
        ser.pack_bytes(&block.data);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Spectra
// ---------------------------------------------------------------------------

struct RawSpectra {
    num_range: usize,
    num_doppler: usize,
    real: [Vec<f64>; 3],
    complex: [Vec<Complex64>; 3],
    quality: Option<Vec<f64>>,
}

impl RawSpectra {
    fn into_file(self, header: CsFileHeader) -> Result<CsFile> {
        let (r, d) = (self.num_range, self.num_doppler);
        let [a1, a2, a3] = self.real;
        let [c12, c13, c23] = self.complex;
        let spectra = [
            Spectrum::real(r, d, a1)?,
            Spectrum::real(r, d, a2)?,
            Spectrum::real(r, d, a3)?,
            Spectrum::complex(r, d, c12)?,
            Spectrum::complex(r, d, c13)?,
            Spectrum::complex(r, d, c23)?,
        ];
        let quality = self.quality.map(|q| Spectrum::real(r, d, q)).transpose()?;
        CsFile::new(header, spectra, quality)
    }
}

fn read_spectra(de: &mut Deserializer<'_>, header: &CsFileHeader) -> Result<RawSpectra> {
    let (num_range, num_doppler) = header.dimensions()?;
    let needed = spectra_len(header)?;
    if de.remaining() < needed {
        return Err(QcError::Format(format!(
            "spectra need {needed} bytes but only {} remain",
            de.remaining()
        )));
    }

    let cells = num_range * num_doppler;
    let mut real: [Vec<f64>; 3] = std::array::from_fn(|_| Vec::with_capacity(cells));
    let mut complex: [Vec<Complex64>; 3] = std::array::from_fn(|_| Vec::with_capacity(cells));
    let mut quality = header.has_quality().then(|| Vec::with_capacity(cells));

    for _ in 0..num_range {
        for values in real.iter_mut() {
            read_real_row(de, num_doppler, values)?;
        }
        for values in complex.iter_mut() {
            read_complex_row(de, num_doppler, values)?;
        }
        if let Some(values) = quality.as_mut() {
            read_real_row(de, num_doppler, values)?;
        }
    }
    debug!(
        "{}: decoded {num_range}x{num_doppler} spectra (quality: {})",
        header.site_code,
        quality.is_some()
    );

    Ok(RawSpectra {
        num_range,
        num_doppler,
        real,
        complex,
        quality,
    })
}

fn read_real_row(de: &mut Deserializer<'_>, num_doppler: usize, out: &mut Vec<f64>) -> Result<()> {
    let row = de.unpack_f32_array(num_doppler)?;
    out.extend(row.into_iter().map(f64::from));
    Ok(())
}

fn read_complex_row(de: &mut Deserializer<'_>, num_doppler: usize, out: &mut Vec<Complex64>) -> Result<()> {
    let row = de.unpack_f32_array(2 * num_doppler)?;
    out.extend(
        row.chunks_exact(2)
            .map(|pair| Complex64::new(f64::from(pair[0]), f64::from(pair[1]))),
    );
    Ok(())
}

fn write_real_row(ser: &mut Serializer, sp: &Spectrum, cells: std::ops::Range<usize>) -> Result<()> {
    match sp.samples() {
        Samples::Real(v) => {
            for &x in &v[cells] {
                ser.pack_f32(x as f32);
            }
            Ok(())
        }
        Samples::Complex(_) => Err(QcError::Format(
            "complex values in a real channel cannot be encoded".to_string(),
        )),
    }
}

fn write_complex_row(ser: &mut Serializer, sp: &Spectrum, cells: std::ops::Range<usize>) -> Result<()> {
    match sp.samples() {
        Samples::Complex(v) => {
            for z in &v[cells] {
                ser.pack_f32(z.re as f32);
                ser.pack_f32(z.im as f32);
            }
            Ok(())
        }
        Samples::Real(_) => Err(QcError::Format(
            "real values in a cross channel cannot be encoded".to_string(),
        )),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::header::tests::sample_header;
    use crate::data::model::Channel;

    /// Synthetic file whose cell values encode their channel and position.
    pub(crate) fn synthetic_file(num_range: usize, num_doppler: usize, cskind: i16) -> CsFile {
        let mut header = sample_header(num_range as i32, num_doppler as i32);
        header.cskind = cskind;
        header.blocks.push(HeaderBlock {
            key: "TIME".to_string(),
            data: vec![1, 2, 3, 4, 5],
        });
        let cells = num_range * num_doppler;
        let real = |ch: f64| Spectrum::real(num_range, num_doppler, (0..cells).map(|i| ch * 100.0 + i as f64).collect()).unwrap();
        let cplx = |ch: f64| {
            Spectrum::complex(
                num_range,
                num_doppler,
                (0..cells).map(|i| Complex64::new(ch + i as f64, -(i as f64) * 0.5)).collect(),
            )
            .unwrap()
        };
        let quality = (cskind >= 2).then(|| real(9.0));
        CsFile::new(header, [real(1.0), real(2.0), real(3.0), cplx(4.0), cplx(5.0), cplx(6.0)], quality).unwrap()
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        for cskind in [1, 2] {
            let file = synthetic_file(3, 4, cskind);
            let bytes = dump(&file).unwrap();
            let decoded = load(&bytes).unwrap();
            assert_eq!(decoded, file, "cskind {cskind}");
            assert_eq!(dump(&decoded).unwrap(), bytes);
        }
    }

    #[test]
    fn test_encoded_length() {
        let file = synthetic_file(3, 4, 1);
        let bytes = dump(&file).unwrap();
        let header = file.header();
        assert_eq!(bytes.len(), header.header_size() + spectra_len(header).unwrap());
        assert_eq!(header.header_size(), 104 + 13);
    }

    #[test]
    fn test_all_channels_share_header_shape() {
        let bytes = dump(&synthetic_file(5, 7, 2)).unwrap();
        let file = load(&bytes).unwrap();
        for ch in Channel::STANDARD.into_iter().chain([Channel::Quality]) {
            assert_eq!(file.channel(ch).unwrap().shape(), (5, 7), "{ch}");
        }
    }

    #[test]
    fn test_row_interleaving() {
        let bytes = dump(&synthetic_file(2, 2, 1)).unwrap();
        let header_size = synthetic_file(2, 2, 1).header().header_size();
        let mut de = Deserializer::new(&bytes[header_size..], FILE_BYTE_ORDER);
        // first row of antenna1, then first row of antenna2
        assert_eq!(de.unpack_f32_array(4).unwrap(), vec![100.0, 101.0, 200.0, 201.0]);
    }

    #[test]
    fn test_truncated_final_block_is_format_error() {
        let bytes = dump(&synthetic_file(2, 3, 1)).unwrap();
        let err = load(&bytes[..bytes.len() - 4]).unwrap_err();
        assert!(matches!(err, QcError::Format(_)), "{err}");
    }

    #[test]
    fn test_truncated_header_is_format_error() {
        let bytes = dump(&synthetic_file(2, 3, 1)).unwrap();
        let err = load(&bytes[..40]).unwrap_err();
        assert!(matches!(err, QcError::Format(_)), "{err}");
    }

    #[test]
    fn test_negative_dimensions_rejected() {
        let file = synthetic_file(2, 3, 1);
        let mut bytes = dump(&file).unwrap();
        // num_doppler_cells sits at offset 52
        bytes[52..56].copy_from_slice(&(-2i32).to_be_bytes());
        let err = load(&bytes).unwrap_err();
        assert!(err.is_format_error(), "{err}");
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = dump(&synthetic_file(2, 3, 1)).unwrap();
        bytes[0..2].copy_from_slice(&5i16.to_be_bytes());
        assert!(matches!(load(&bytes), Err(QcError::UnsupportedVersion(5))));
    }

    #[test]
    fn test_block_overrunning_section_rejected() {
        let file = synthetic_file(2, 3, 1);
        let mut bytes = dump(&file).unwrap();
        // size field of the first block follows section size (100) and key (104)
        bytes[108..112].copy_from_slice(&1000u32.to_be_bytes());
        assert!(load(&bytes).unwrap_err().is_format_error());
    }

    #[test]
    fn test_real_cross_channel_cannot_be_encoded() {
        let file = synthetic_file(2, 2, 1);
        let flat = file.with_channel(Channel::Cross12, Spectrum::real(2, 2, vec![0.0; 4]).unwrap()).unwrap();
        assert!(dump(&flat).is_err());
    }

    #[test]
    fn test_extent_fields_range() {
        assert_eq!(extent_fields(117).unwrap(), [107, 101, 93, 45, 17]);
        let too_big = i32::MAX as usize + 20;
        assert!(extent_fields(too_big).unwrap_err().is_format_error());
    }

    #[test]
    fn test_load_from_reader() {
        let bytes = dump(&synthetic_file(2, 2, 1)).unwrap();
        let file = load_from(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(file.shape(), (2, 2));
    }
}

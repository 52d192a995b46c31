use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{Float64Builder, Int32Array, Int64Array, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::info;
use parquet::arrow::ArrowWriter;

use crate::processing::SignalProcessor;
use super::header::CsFileHeader;
use super::loader;
use super::model::{Channel, CsFile, Spectrum};

// ---------------------------------------------------------------------------
// DataSet – headers and one channel of many files
// ---------------------------------------------------------------------------

/// Parallel, loader-ordered sequences of headers and spectra.
#[derive(Debug, Clone, Default)]
pub struct DataSet {
    headers: Vec<CsFileHeader>,
    spectra: Vec<Spectrum>,
}

impl DataSet {
    /// Read every file in `paths`, run `channel` through `preprocess`, and
    /// keep it with the file's header. The first unreadable file aborts.
    pub fn load<P: AsRef<Path>>(paths: &[P], preprocess: &dyn SignalProcessor, channel: Channel) -> Result<Self> {
        let mut dataset = DataSet::default();
        for path in paths {
            let path = path.as_ref();
            let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            let file = loader::load(&bytes).with_context(|| format!("decoding {}", path.display()))?;
            dataset
                .push(&file, preprocess, channel)
                .with_context(|| format!("preprocessing {}", path.display()))?;
        }
        info!("loaded {} files ({channel})", dataset.len());
        Ok(dataset)
    }

    /// Build from already decoded files.
    pub fn from_files(files: &[CsFile], preprocess: &dyn SignalProcessor, channel: Channel) -> Result<Self> {
        let mut dataset = DataSet::default();
        for file in files {
            dataset.push(file, preprocess, channel)?;
        }
        Ok(dataset)
    }

    fn push(&mut self, file: &CsFile, preprocess: &dyn SignalProcessor, channel: Channel) -> Result<()> {
        let Some(spectrum) = file.channel(channel) else {
            bail!("file from {} has no {channel} channel", file.header().site_code);
        };
        let spectrum = preprocess.process(spectrum)?;
        self.headers.push(file.header().clone());
        self.spectra.push(spectrum);
        Ok(())
    }

    pub fn headers(&self) -> &[CsFileHeader] {
        &self.headers
    }

    pub fn spectra(&self) -> &[Spectrum] {
        &self.spectra
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    // ---- Exports ----

    /// One row per (file, range cell): list columns `x` (Doppler index) and
    /// `y` (values; magnitudes for complex channels) plus file metadata.
    pub fn write_parquet(&self, path: &Path) -> Result<usize> {
        let mut x_builder = ListBuilder::new(Float64Builder::new());
        let mut y_builder = ListBuilder::new(Float64Builder::new());
        let mut file_index = Vec::new();
        let mut site_code = Vec::new();
        let mut timestamp = Vec::new();
        let mut range_cell = Vec::new();

        for (i, (header, spectrum)) in self.headers.iter().zip(&self.spectra).enumerate() {
            let stamp = header.timestamp.to_rfc3339();
            for range in 0..spectrum.num_range() {
                let values = x_builder.values();
                for d in 0..spectrum.num_doppler() {
                    values.append_value(d as f64);
                }
                x_builder.append(true);

                let values = y_builder.values();
                for v in spectrum.row_values(range) {
                    values.append_value(v);
                }
                y_builder.append(true);

                file_index.push(i as i64);
                site_code.push(header.site_code.clone());
                timestamp.push(stamp.clone());
                range_cell.push(range as i32);
            }
        }
        let rows = file_index.len();

        let item = Arc::new(Field::new("item", DataType::Float64, true));
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::List(item.clone()), false),
            Field::new("y", DataType::List(item), false),
            Field::new("file_index", DataType::Int64, false),
            Field::new("site_code", DataType::Utf8, false),
            Field::new("timestamp", DataType::Utf8, false),
            Field::new("range_cell", DataType::Int32, false),
        ]));

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(x_builder.finish()),
                Arc::new(y_builder.finish()),
                Arc::new(Int64Array::from(file_index)),
                Arc::new(StringArray::from(site_code)),
                Arc::new(StringArray::from(timestamp)),
                Arc::new(Int32Array::from(range_cell)),
            ],
        )
        .context("building record batch")?;

        let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
        writer.write(&batch).context("writing parquet batch")?;
        writer.close().context("closing parquet writer")?;
        info!("wrote {rows} rows to {}", path.display());
        Ok(rows)
    }

    /// One CSV row of header fields per file.
    pub fn write_headers_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
        for header in &self.headers {
            writer.serialize(header.summary()).context("writing header row")?;
        }
        writer.flush()?;
        Ok(())
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float32Array, Float64Array, Float64Builder,
    Int32Array, Int64Array, LargeListArray, ListArray, ListBuilder, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::{debug, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde_json::{Map, Value as JsonValue};

use super::model::{AirVac, MetadataValue, Spectrum, SpectrumMeta};
use crate::analysis::linelist::{Transition, TransitionTable};

/// Array columns. Everything else in a file is metadata.
const WAVE: &str = "wave";
const FLUX: &str = "flux";
const SIG: &str = "sig";
const CO: &str = "co";
/// Written only when finite pixels are masked: 1 keeps a pixel, 0 masks it.
const MASK: &str = "mask";
const ARRAY_COLUMNS: [&str; 5] = [WAVE, FLUX, SIG, CO, MASK];

/// Metadata keys that map onto typed fields instead of `SpectrumMeta::extra`.
const AIRVAC: &str = "airvac";
const INSTRUMENT: &str = "instrument";
const WAVE_UNIT: &str = "wave_unit";
const FLUX_UNIT: &str = "flux_unit";
/// Continuum control points as a JSON string `[[wave, co], ...]`.
const CONTPOINTS: &str = "contpoints";

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load spectra from a file, one spectrum per row.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – `wave`, `flux` (and optional `sig`, `co`, `mask`) list columns
/// * `.json`    – `[{ "wave": [...], "flux": [...], ...meta }, ...]`
/// * `.csv`     – `wave`, `flux`, `sig`, `co`, `mask` columns of semicolon-separated floats
///
/// Non-finite flux values are loaded as masked pixels, as are pixels whose
/// `mask` entry is 0.
pub fn load_file(path: &Path) -> Result<Vec<Spectrum>> {
    let spectra = match extension(path).as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
    .with_context(|| format!("loading {}", path.display()))?;
    info!("loaded {} spectra from {}", spectra.len(), path.display());
    Ok(spectra)
}

/// Write spectra to `.parquet` or `.json`, the inverse of [`load_file`].
/// Flux is written as stored (not normalized) together with the continuum.
pub fn save_file(path: &Path, spectra: &[Spectrum]) -> Result<()> {
    match extension(path).as_str() {
        "parquet" | "pq" => save_parquet(path, spectra),
        "json" => save_json(path, spectra),
        other => bail!("Cannot write spectra as .{other}"),
    }
    .with_context(|| format!("writing {}", path.display()))?;
    info!("wrote {} spectra to {}", spectra.len(), path.display());
    Ok(())
}

/// Load a line list from JSON (`[{"name", "wrest", "f"}, ...]`) or CSV with
/// the same header. The list takes its name from the file stem.
pub fn load_linelist(path: &Path) -> Result<TransitionTable> {
    let transitions: Vec<Transition> = match extension(path).as_str() {
        "json" => {
            let text = std::fs::read_to_string(path).context("reading line list")?;
            serde_json::from_str(&text).context("parsing line list")?
        }
        "csv" => {
            let mut reader = csv::Reader::from_path(path).context("opening line list")?;
            reader
                .deserialize()
                .collect::<std::result::Result<_, _>>()
                .context("parsing line list")?
        }
        other => bail!("Unsupported line list extension: .{other}"),
    };
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("linelist");
    debug!("line list '{name}': {} transitions", transitions.len());
    Ok(TransitionTable::new(name, transitions))
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Row → Spectrum
// ---------------------------------------------------------------------------

struct Row {
    wave: Vec<f64>,
    flux: Vec<f64>,
    sig: Option<Vec<f64>>,
    co: Option<Vec<f64>>,
    mask: Option<Vec<f64>>,
    metadata: BTreeMap<String, MetadataValue>,
}

impl Row {
    fn into_spectrum(self, row: usize) -> Result<Spectrum> {
        let mask = match &self.mask {
            Some(m) if m.len() != self.flux.len() => {
                bail!("Row {row}: mask has {} values for {} pixels", m.len(), self.flux.len())
            }
            Some(m) => self
                .flux
                .iter()
                .zip(m)
                .map(|(f, &keep)| f.is_finite() && keep != 0.0)
                .collect(),
            None => self.flux.iter().map(|f| f.is_finite()).collect(),
        };
        let mut spec = Spectrum::new(self.wave, self.flux, self.sig)
            .with_context(|| format!("Row {row}: invalid spectrum"))?;
        spec.set_mask(mask)?;
        if let Some(co) = self.co {
            spec.set_continuum(co)
                .with_context(|| format!("Row {row}: invalid continuum"))?;
        }

        let mut meta = SpectrumMeta::default();
        let mut wave_unit = spec.wave_unit();
        let mut flux_unit = spec.flux_unit();
        for (key, value) in self.metadata {
            if matches!(value, MetadataValue::Null) {
                continue;
            }
            match (key.as_str(), &value) {
                (AIRVAC, MetadataValue::String(s)) => {
                    meta.airvac = match s.as_str() {
                        "air" => AirVac::Air,
                        "vac" => AirVac::Vacuum,
                        other => bail!("Row {row}: unknown airvac '{other}'"),
                    }
                }
                (INSTRUMENT, MetadataValue::String(s)) => meta.instrument = Some(s.clone()),
                (CONTPOINTS, MetadataValue::String(s)) => {
                    meta.contpoints = serde_json::from_str(s)
                        .with_context(|| format!("Row {row}: invalid continuum points"))?;
                }
                (WAVE_UNIT, MetadataValue::String(s)) => {
                    wave_unit = serde_json::from_value(JsonValue::String(s.clone()))
                        .with_context(|| format!("Row {row}: unknown wavelength unit '{s}'"))?;
                }
                (FLUX_UNIT, MetadataValue::String(s)) => {
                    flux_unit = serde_json::from_value(JsonValue::String(s.clone()))
                        .with_context(|| format!("Row {row}: unknown flux unit '{s}'"))?;
                }
                _ => {
                    meta.extra.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(spec.with_units(wave_unit, flux_unit).with_meta(meta))
    }
}

/// Scalar metadata of one spectrum as written to disk.
fn metadata_of(spec: &Spectrum) -> BTreeMap<String, MetadataValue> {
    let meta = spec.meta();
    let mut out = meta.extra.clone();
    out.insert(AIRVAC.into(), MetadataValue::String(meta.airvac.as_str().into()));
    if let Some(instrument) = &meta.instrument {
        out.insert(INSTRUMENT.into(), MetadataValue::String(instrument.clone()));
    }
    if !meta.contpoints.is_empty() {
        let points = serde_json::json!(meta.contpoints).to_string();
        out.insert(CONTPOINTS.into(), MetadataValue::String(points));
    }
    let unit_name = |v: JsonValue| match v {
        JsonValue::String(s) => MetadataValue::String(s),
        other => MetadataValue::String(other.to_string()),
    };
    out.insert(WAVE_UNIT.into(), unit_name(serde_json::json!(spec.wave_unit())));
    out.insert(FLUX_UNIT.into(), unit_name(serde_json::json!(spec.flux_unit)));
    out
}

/// The mask as 1/0 values, when it masks more than the non-finite flux.
fn explicit_mask(spec: &Spectrum) -> Option<Vec<f64>> {
    let flux = spec.raw_flux();
    let mask = spec.mask();
    let user_masked = flux.iter().zip(mask).any(|(f, &m)| f.is_finite() && !m);
    user_masked.then(|| mask.iter().map(|&m| if m { 1.0 } else { 0.0 }).collect())
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

fn load_json(path: &Path) -> Result<Vec<Spectrum>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut spectra = Vec::with_capacity(records.len());
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let optional = |col: &str| match obj.get(col) {
            None | Some(JsonValue::Null) => Ok(None),
            some => json_array_to_f64(some, i, col).map(Some),
        };
        let row = Row {
            wave: json_array_to_f64(obj.get(WAVE), i, WAVE)?,
            flux: json_array_to_f64(obj.get(FLUX), i, FLUX)?,
            sig: optional(SIG)?,
            co: optional(CO)?,
            mask: optional(MASK)?,
            metadata: obj
                .iter()
                .filter(|(k, _)| !ARRAY_COLUMNS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), json_to_metadata(v)))
                .collect(),
        };
        spectra.push(row.into_spectrum(i)?);
    }
    Ok(spectra)
}

/// `null` entries (how JSON carries NaN) load as NaN.
fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| match v {
            JsonValue::Null => Ok(f64::NAN),
            v => v
                .as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number")),
        })
        .collect()
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

fn save_json(path: &Path, spectra: &[Spectrum]) -> Result<()> {
    let records: Vec<JsonValue> = spectra
        .iter()
        .map(|spec| {
            let mut obj = Map::new();
            obj.insert(WAVE.into(), serde_json::json!(spec.wavelength()));
            obj.insert(FLUX.into(), serde_json::json!(spec.raw_flux()));
            if let Some(sig) = spec.raw_sigma() {
                obj.insert(SIG.into(), serde_json::json!(sig));
            }
            if let Some(co) = spec.continuum() {
                obj.insert(CO.into(), serde_json::json!(co));
            }
            if let Some(mask) = explicit_mask(spec) {
                obj.insert(MASK.into(), serde_json::json!(mask));
            }
            for (key, value) in metadata_of(spec) {
                obj.insert(key, serde_json::json!(value));
            }
            JsonValue::Object(obj)
        })
        .collect();
    let text = serde_json::to_string(&records).context("serializing JSON")?;
    std::fs::write(path, text).context("writing JSON file")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// CSV layout:  header row with column names.
/// `wave`, `flux`, `sig`, `co` and `mask` contain semicolon-separated floats:
///   `"4000.0;4000.5;4001.0"`, `"0.98;1.02;0.97"`
/// Empty `sig` / `co` / `mask` cells mean "not set". All other columns are
/// metadata.
fn load_csv(path: &Path) -> Result<Vec<Spectrum>> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let find = |name: &str| headers.iter().position(|h| h == name);
    let wave_idx = find(WAVE).context("CSV missing 'wave' column")?;
    let flux_idx = find(FLUX).context("CSV missing 'flux' column")?;
    let sig_idx = find(SIG);
    let co_idx = find(CO);
    let mask_idx = find(MASK);
    let array_cols = [Some(wave_idx), Some(flux_idx), sig_idx, co_idx, mask_idx];

    let mut spectra = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let cell = |idx: usize| record.get(idx).unwrap_or("");
        let optional = |idx: Option<usize>, col: &str| match idx.map(cell) {
            None | Some("") => Ok(None),
            Some(s) => parse_semicolon_floats(s, row_no, col).map(Some),
        };

        let row = Row {
            wave: parse_semicolon_floats(cell(wave_idx), row_no, WAVE)?,
            flux: parse_semicolon_floats(cell(flux_idx), row_no, FLUX)?,
            sig: optional(sig_idx, SIG)?,
            co: optional(co_idx, CO)?,
            mask: optional(mask_idx, MASK)?,
            metadata: record
                .iter()
                .enumerate()
                .filter(|(i, _)| !array_cols.contains(&Some(*i)))
                .map(|(i, value)| (headers[i].clone(), guess_metadata_type(value)))
                .collect(),
        };
        spectra.push(row.into_spectrum(row_no)?);
    }
    Ok(spectra)
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

fn guess_metadata_type(s: &str) -> MetadataValue {
    if s.is_empty() {
        return MetadataValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return MetadataValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return MetadataValue::Float(f);
    }
    if s == "true" || s == "false" {
        return MetadataValue::Bool(s == "true");
    }
    MetadataValue::String(s.to_string())
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

/// Load a Parquet file of spectra.
///
/// Expected schema:
/// - `wave`, `flux`: List<Float64> or LargeList<Float64> (Float32 accepted)
/// - `sig`, `co`, `mask`: optional list columns; null rows mean "not set"
/// - Any other columns are treated as metadata (strings, ints, floats, bools)
fn load_parquet(path: &Path) -> Result<Vec<Spectrum>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut spectra = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        let column = |name: &str| schema.index_of(name).ok().map(|i| batch.column(i));
        let wave_col = column(WAVE).context("Parquet file missing 'wave' column")?;
        let flux_col = column(FLUX).context("Parquet file missing 'flux' column")?;
        let sig_col = column(SIG);
        let co_col = column(CO);
        let mask_col = column(MASK);

        let meta_cols: Vec<(&String, &ArrayRef)> = schema
            .fields()
            .iter()
            .zip(batch.columns())
            .filter(|(f, _)| !ARRAY_COLUMNS.contains(&f.name().as_str()))
            .map(|(f, col)| (f.name(), col))
            .collect();

        for row in 0..batch.num_rows() {
            let optional = |col: Option<&ArrayRef>, name: &str| -> Result<Option<Vec<f64>>> {
                match col {
                    Some(c) if !c.is_null(row) => extract_f64_list(c, row)
                        .with_context(|| format!("Row {row}: failed to read '{name}'"))
                        .map(Some),
                    _ => Ok(None),
                }
            };
            let parsed = Row {
                wave: extract_f64_list(wave_col, row)
                    .with_context(|| format!("Row {row}: failed to read 'wave'"))?,
                flux: extract_f64_list(flux_col, row)
                    .with_context(|| format!("Row {row}: failed to read 'flux'"))?,
                sig: optional(sig_col, SIG)?,
                co: optional(co_col, CO)?,
                mask: optional(mask_col, MASK)?,
                metadata: meta_cols
                    .iter()
                    .map(|(name, col)| ((*name).clone(), extract_metadata_value(col, row)))
                    .collect(),
            };
            spectra.push(parsed.into_spectrum(spectra.len())?);
        }
    }
    Ok(spectra)
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &ArrayRef, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => col
            .as_any()
            .downcast_ref::<ListArray>()
            .context("expected ListArray")?
            .value(row),
        DataType::LargeList(_) => col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .context("expected LargeListArray")?
            .value(row),
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

/// Extract a single metadata value from an Arrow column at a given row.
fn extract_metadata_value(col: &ArrayRef, row: usize) -> MetadataValue {
    if col.is_null(row) {
        return MetadataValue::Null;
    }
    let any = col.as_any();
    let value = match col.data_type() {
        DataType::Utf8 => any
            .downcast_ref::<StringArray>()
            .map(|a| MetadataValue::String(a.value(row).to_string())),
        DataType::LargeUtf8 => Some(MetadataValue::String(
            col.as_string::<i64>().value(row).to_string(),
        )),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map(|a| MetadataValue::Integer(a.value(row) as i64)),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map(|a| MetadataValue::Integer(a.value(row))),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .map(|a| MetadataValue::Float(a.value(row) as f64)),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map(|a| MetadataValue::Float(a.value(row))),
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map(|a| MetadataValue::Bool(a.value(row))),
        _ => None,
    };
    value.unwrap_or_else(|| MetadataValue::String(format!("{:?}", col.data_type())))
}

fn list_field(name: &str, nullable: bool) -> Field {
    Field::new(
        name,
        DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
        nullable,
    )
}

fn build_list<'a>(rows: impl Iterator<Item = Option<&'a [f64]>>) -> ArrayRef {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        match row {
            Some(values) => {
                builder.values().append_slice(values);
                builder.append(true);
            }
            None => builder.append(false),
        }
    }
    Arc::new(builder.finish())
}

/// One Arrow column for a metadata key. The column type is the common type
/// of the present values, falling back to strings for mixed keys.
fn metadata_column(values: &[Option<&MetadataValue>]) -> (DataType, ArrayRef) {
    let present: Vec<&MetadataValue> = values.iter().flatten().copied().collect();
    let all = |f: fn(&MetadataValue) -> bool| present.iter().all(|v| f(v));

    if all(|v| matches!(v, MetadataValue::Integer(_))) {
        let arr: Int64Array = values
            .iter()
            .map(|v| match v {
                Some(MetadataValue::Integer(i)) => Some(*i),
                _ => None,
            })
            .collect();
        (DataType::Int64, Arc::new(arr))
    } else if all(|v| matches!(v, MetadataValue::Integer(_) | MetadataValue::Float(_))) {
        let arr: Float64Array = values.iter().map(|v| v.and_then(|m| m.as_f64())).collect();
        (DataType::Float64, Arc::new(arr))
    } else if all(|v| matches!(v, MetadataValue::Bool(_))) {
        let arr: BooleanArray = values
            .iter()
            .map(|v| match v {
                Some(MetadataValue::Bool(b)) => Some(*b),
                _ => None,
            })
            .collect();
        (DataType::Boolean, Arc::new(arr))
    } else {
        let arr: StringArray = values
            .iter()
            .map(|v| match v {
                Some(MetadataValue::String(s)) => Some(s.clone()),
                Some(MetadataValue::Integer(i)) => Some(i.to_string()),
                Some(MetadataValue::Float(f)) => Some(f.to_string()),
                Some(MetadataValue::Bool(b)) => Some(b.to_string()),
                Some(MetadataValue::Null) | None => None,
            })
            .collect();
        (DataType::Utf8, Arc::new(arr))
    }
}

fn save_parquet(path: &Path, spectra: &[Spectrum]) -> Result<()> {
    let mut fields = vec![
        list_field(WAVE, false),
        list_field(FLUX, false),
        list_field(SIG, true),
        list_field(CO, true),
    ];
    let mut columns = vec![
        build_list(spectra.iter().map(|s| Some(s.wavelength()))),
        build_list(spectra.iter().map(|s| Some(s.raw_flux()))),
        build_list(spectra.iter().map(|s| s.raw_sigma())),
        build_list(spectra.iter().map(|s| s.continuum())),
    ];
    let masks: Vec<Option<Vec<f64>>> = spectra.iter().map(explicit_mask).collect();
    if masks.iter().any(Option::is_some) {
        fields.push(list_field(MASK, true));
        columns.push(build_list(masks.iter().map(|m| m.as_deref())));
    }

    let metadata: Vec<BTreeMap<String, MetadataValue>> = spectra.iter().map(metadata_of).collect();
    let keys: BTreeSet<&String> = metadata.iter().flat_map(|m| m.keys()).collect();
    for key in keys {
        let values: Vec<Option<&MetadataValue>> = metadata.iter().map(|m| m.get(key)).collect();
        let (dtype, array) = metadata_column(&values);
        fields.push(Field::new(key.as_str(), dtype, true));
        columns.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    let batch =
        RecordBatch::try_new(schema.clone(), columns).context("Failed to create RecordBatch")?;

    let file = std::fs::File::create(path).context("Failed to create output file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("Failed to create writer")?;
    writer.write(&batch).context("Failed to write batch")?;
    writer.close().context("Failed to close writer")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{FluxUnit, WavelengthUnit};
    use std::io::Write;

    fn sample() -> Vec<Spectrum> {
        let wave: Vec<f64> = (0..50).map(|i| 4000.0 + i as f64 * 0.5).collect();
        let mut flux = vec![1.0; 50];
        flux[7] = f64::NAN;
        let mut meta = SpectrumMeta {
            airvac: AirVac::Air,
            instrument: Some("HIRES".into()),
            ..SpectrumMeta::default()
        };
        meta.extra.insert("zem".into(), MetadataValue::Float(2.5));
        meta.extra.insert("exptime".into(), MetadataValue::Integer(3600));
        let a = Spectrum::new(wave.clone(), flux, Some(vec![0.1; 50]))
            .unwrap()
            .with_units(WavelengthUnit::Angstrom, FluxUnit::FLambda)
            .with_continuum(vec![2.0; 50])
            .unwrap()
            .with_meta(meta);
        let b = Spectrum::new(wave, vec![0.5; 50], None).unwrap();
        vec![a, b]
    }

    fn check_round_trip(loaded: &[Spectrum], original: &[Spectrum]) {
        assert_eq!(loaded.len(), original.len());
        let (a, b) = (&loaded[0], &loaded[1]);
        assert_eq!(a.wavelength(), original[0].wavelength());
        assert!(a.raw_flux()[7].is_nan());
        assert!(!a.mask()[7]);
        assert_eq!(a.npix(), 49);
        assert_eq!(a.raw_sigma(), original[0].raw_sigma());
        assert_eq!(a.continuum(), original[0].continuum());
        assert_eq!(a.flux_unit(), FluxUnit::FLambda);
        assert_eq!(a.meta().airvac, AirVac::Air);
        assert_eq!(a.meta().instrument.as_deref(), Some("HIRES"));
        assert_eq!(a.meta().extra.get("zem"), Some(&MetadataValue::Float(2.5)));
        assert_eq!(a.meta().extra.get("exptime"), Some(&MetadataValue::Integer(3600)));

        assert!(!b.sig_is_set());
        assert!(!b.co_is_set());
        assert_eq!(b.raw_flux(), original[1].raw_flux());
        assert!(b.meta().extra.is_empty());
    }

    #[test]
    fn test_parquet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectra.parquet");
        let original = sample();
        save_file(&path, &original).unwrap();
        check_round_trip(&load_file(&path).unwrap(), &original);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectra.json");
        let original = sample();
        save_file(&path, &original).unwrap();
        check_round_trip(&load_file(&path).unwrap(), &original);
    }

    fn with_edits() -> Spectrum {
        let wave: Vec<f64> = (0..40).map(|i| 5000.0 + i as f64).collect();
        let mut spec = Spectrum::new(wave, vec![1.0; 40], Some(vec![0.1; 40])).unwrap();
        spec.set_continuum_points(vec![(5000.0, 2.0), (5020.0, 2.5), (5039.0, 2.0)])
            .unwrap();
        let mut mask = vec![true; 40];
        mask[10] = false;
        mask[11] = false;
        spec.set_mask(mask).unwrap();
        spec
    }

    #[test]
    fn test_mask_and_contpoints_survive_save() {
        let dir = tempfile::tempdir().unwrap();
        let plain = Spectrum::new(vec![1.0, 2.0, 3.0], vec![1.0; 3], None).unwrap();
        for name in ["edited.parquet", "edited.json"] {
            let path = dir.path().join(name);
            let original = with_edits();
            save_file(&path, &[original.clone(), plain.clone()]).unwrap();
            let mut loaded = load_file(&path).unwrap();

            assert_eq!(loaded[0].mask(), original.mask());
            assert_eq!(loaded[0].npix(), 38);
            assert_eq!(loaded[0].meta().contpoints, original.meta().contpoints);
            assert!(!loaded[0].meta().extra.contains_key(CONTPOINTS));
            assert!(loaded[1].mask().iter().all(|&m| m));

            loaded[0].perturb_continuum(0.1, 7).unwrap();
            loaded[0].reset_continuum().unwrap();
            assert_eq!(loaded[0].continuum(), original.continuum());
        }
    }

    #[test]
    fn test_load_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "wave,flux,sig,co,object").unwrap();
        writeln!(file, "1.0;2.0;3.0,0.5;0.6;0.7,,1;1;1,J0101").unwrap();
        file.flush().unwrap();

        let spectra = load_file(file.path()).unwrap();
        assert_eq!(spectra.len(), 1);
        let spec = &spectra[0];
        assert_eq!(spec.wavelength(), &[1.0, 2.0, 3.0]);
        assert!(!spec.sig_is_set());
        assert_eq!(spec.continuum(), Some(&[1.0, 1.0, 1.0][..]));
        assert_eq!(
            spec.meta().extra.get("object"),
            Some(&MetadataValue::String("J0101".into()))
        );
    }

    #[test]
    fn test_load_rejects_bad_input() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"[{{"wave": [1.0, 2.0], "flux": [1.0]}}]"#).unwrap();
        file.flush().unwrap();
        assert!(load_file(file.path()).is_err());

        assert!(load_file(Path::new("spectra.fits")).is_err());
    }

    #[test]
    fn test_load_linelist() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("mylines.json");
        std::fs::write(
            &json,
            r#"[{"name": "CIV 1548", "wrest": 1548.204, "f": 0.1899},
                {"name": "HI 1215", "wrest": 1215.6701, "f": 0.4164}]"#,
        )
        .unwrap();
        let table = load_linelist(&json).unwrap();
        assert_eq!(table.name, "mylines");
        assert_eq!(table.len(), 2);

        let csv = dir.path().join("lines.csv");
        std::fs::write(&csv, "name,wrest,f\nMgII 2796,2796.3542,0.6155\n").unwrap();
        let table = load_linelist(&csv).unwrap();
        use crate::analysis::linelist::LineList;
        assert_eq!(table.get("MgII 2796").unwrap().oscillator_strength, 0.6155);
    }
}

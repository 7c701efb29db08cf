//! The persisted source-receptor (SR) matrix: a banded 3-D linear
//! operator over (source_layer, source_column, receptor_cell, species).
//!
//! Serialization uses the same hand-rolled length-prefixed
//! little-endian framing as `inmap_core::grid::persist`, so a `Reader`
//! can recover the receptor geometry table without a separate file.

use inmap_core::geom::Poly;
use geo_types::{Coord, LineString, Polygon};
use std::io::{self, Read, Write};

const MAGIC: u32 = 0x494E_5352; // "INSR"
const VERSION: u32 = 1;

fn write_u32(out: &mut impl Write, v: u32) -> io::Result<()> {
    out.write_all(&v.to_le_bytes())
}
fn read_u32(input: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
fn write_u64(out: &mut impl Write, v: u64) -> io::Result<()> {
    out.write_all(&v.to_le_bytes())
}
fn read_u64(input: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
fn write_f64(out: &mut impl Write, v: f64) -> io::Result<()> {
    out.write_all(&v.to_le_bytes())
}
fn read_f64(input: &mut impl Read) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}
fn write_string(out: &mut impl Write, s: &str) -> io::Result<()> {
    write_u32(out, s.len() as u32)?;
    out.write_all(s.as_bytes())
}
fn read_string(input: &mut impl Read) -> io::Result<String> {
    let len = read_u32(input)? as usize;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// FNV-1a over the raw data bytes, stored in the header so a reload can
/// detect truncation or bit rot without a third-party CRC crate.
fn fnv1a(data: &[f64]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for value in data {
        for byte in value.to_le_bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    hash
}

/// Header-only geometry and axis metadata, reconstructable from a
/// matrix file without loading the (potentially large) data array. This
/// is what [`crate::reader::SrReader`] needs to map user emissions onto
/// source columns and receptor cells.
#[derive(Debug, Clone)]
pub struct SrGeometry {
    /// Species this matrix carries a response for, in the fixed order
    /// used by the data array's innermost axis.
    pub species: Vec<String>,
    /// Source layers this matrix covers, e.g. `[0, 1, 2]`.
    pub source_layers: Vec<usize>,
    /// Base-grid column footprints, indexed by `source_column`: these
    /// are the *unrefined* CTM lattice columns, independent of the
    /// working grid's current resolution.
    pub source_columns: Vec<Poly>,
    /// Receptor cell footprints (layer 0, or the configured output
    /// layer set), indexed by `receptor_cell`.
    pub receptors: Vec<Poly>,
    /// Emission units the matrix was built against.
    pub emission_units: String,
}

impl SrGeometry {
    #[must_use]
    pub fn n_source_layers(&self) -> usize {
        self.source_layers.len()
    }
    #[must_use]
    pub fn n_source_columns(&self) -> usize {
        self.source_columns.len()
    }
    #[must_use]
    pub fn n_receptors(&self) -> usize {
        self.receptors.len()
    }
    #[must_use]
    pub fn n_species(&self) -> usize {
        self.species.len()
    }

    /// Index of `source_layer` within [`Self::source_layers`], if this
    /// matrix covers it.
    #[must_use]
    pub fn layer_index(&self, source_layer: usize) -> Option<usize> {
        self.source_layers.iter().position(|&l| l == source_layer)
    }
}

/// The banded SR linear operator: one concentration-response vector
/// (over receptor x species) per (source_layer, source_column) pair.
#[derive(Debug, Clone)]
pub struct SrMatrix {
    pub geometry: SrGeometry,
    /// Row-major `[layer_idx][source_column][receptor][species]`,
    /// flattened. A row not yet populated is left all-zero; [`crate::builder::SrBuilder`] tracks
    /// which rows are actually complete separately from this array.
    data: Vec<f64>,
}

impl SrMatrix {
    #[must_use]
    pub fn empty(geometry: SrGeometry) -> Self {
        let len = geometry.n_source_layers() * geometry.n_source_columns() * geometry.n_receptors() * geometry.n_species();
        SrMatrix { data: vec![0.0; len], geometry }
    }

    fn row_len(&self) -> usize {
        self.geometry.n_receptors() * self.geometry.n_species()
    }

    fn row_offset(&self, layer_idx: usize, source_column: usize) -> usize {
        (layer_idx * self.geometry.n_source_columns() + source_column) * self.row_len()
    }

    /// Write one source's full receptor×species response row.
    ///
    /// # Panics
    /// Panics if `row.len()` does not match `receptors * species`, or
    /// `layer_idx`/`source_column` are out of range.
    pub fn set_row(&mut self, layer_idx: usize, source_column: usize, row: &[f64]) {
        assert_eq!(row.len(), self.row_len(), "SR row length mismatch");
        let offset = self.row_offset(layer_idx, source_column);
        self.data[offset..offset + row.len()].copy_from_slice(row);
    }

    #[must_use]
    pub fn row(&self, layer_idx: usize, source_column: usize) -> &[f64] {
        let offset = self.row_offset(layer_idx, source_column);
        &self.data[offset..offset + self.row_len()]
    }

    /// The response at a single (receptor, species) cell.
    #[must_use]
    pub fn get(&self, layer_idx: usize, source_column: usize, receptor: usize, species: usize) -> f64 {
        self.row(layer_idx, source_column)[receptor * self.geometry.n_species() + species]
    }

    /// Serialize to `out`: magic, version, geometry header, raw data,
    /// checksum.
    ///
    /// # Errors
    /// Returns the underlying I/O error on write failure.
    pub fn write(&self, out: &mut impl Write) -> io::Result<()> {
        write_u32(out, MAGIC)?;
        write_u32(out, VERSION)?;

        write_string(out, &self.geometry.emission_units)?;

        write_u32(out, self.geometry.species.len() as u32)?;
        for s in &self.geometry.species {
            write_string(out, s)?;
        }

        write_u32(out, self.geometry.source_layers.len() as u32)?;
        for &l in &self.geometry.source_layers {
            write_u32(out, l as u32)?;
        }

        write_polygons(out, &self.geometry.source_columns)?;
        write_polygons(out, &self.geometry.receptors)?;

        write_u64(out, self.data.len() as u64)?;
        for v in &self.data {
            write_f64(out, *v)?;
        }
        write_u64(out, fnv1a(&self.data))?;
        Ok(())
    }

    /// Read back a matrix previously written by [`Self::write`].
    ///
    /// # Errors
    /// Returns an I/O error on a truncated/malformed stream, an
    /// unsupported version, or a checksum mismatch.
    pub fn read(input: &mut impl Read) -> io::Result<Self> {
        let magic = read_u32(input)?;
        if magic != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad SR matrix magic"));
        }
        let version = read_u32(input)?;
        if version != VERSION {
            return Err(io::Error::new(io::ErrorKind::InvalidData, format!("unsupported SR matrix version {version}")));
        }

        let emission_units = read_string(input)?;

        let n_species = read_u32(input)?;
        let species: Vec<String> = (0..n_species).map(|_| read_string(input)).collect::<io::Result<_>>()?;

        let n_layers = read_u32(input)?;
        let source_layers: Vec<usize> = (0..n_layers).map(|_| read_u32(input).map(|v| v as usize)).collect::<io::Result<_>>()?;

        let source_columns = read_polygons(input)?;
        let receptors = read_polygons(input)?;

        let data_len = read_u64(input)? as usize;
        let mut data = Vec::with_capacity(data_len);
        for _ in 0..data_len {
            data.push(read_f64(input)?);
        }

        let checksum = read_u64(input)?;
        if checksum != fnv1a(&data) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "SR matrix checksum mismatch"));
        }

        let geometry = SrGeometry { species, source_layers, source_columns, receptors, emission_units };
        let expected_len = geometry.n_source_layers() * geometry.n_source_columns() * geometry.n_receptors() * geometry.n_species();
        if data.len() != expected_len {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "SR matrix data length does not match header axes"));
        }

        Ok(SrMatrix { geometry, data })
    }
}

fn write_polygons(out: &mut impl Write, polys: &[Poly]) -> io::Result<()> {
    write_u32(out, polys.len() as u32)?;
    for poly in polys {
        let points: Vec<(f64, f64)> = poly.exterior().points().map(|p| (p.x(), p.y())).collect();
        write_u32(out, points.len() as u32)?;
        for (x, y) in points {
            write_f64(out, x)?;
            write_f64(out, y)?;
        }
    }
    Ok(())
}

fn read_polygons(input: &mut impl Read) -> io::Result<Vec<Poly>> {
    let n = read_u32(input)?;
    let mut polys = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let n_points = read_u32(input)?;
        let mut coords = Vec::with_capacity(n_points as usize);
        for _ in 0..n_points {
            let x = read_f64(input)?;
            let y = read_f64(input)?;
            coords.push(Coord { x, y });
        }
        polys.push(Polygon::new(LineString(coords), vec![]));
    }
    Ok(polys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use inmap_core::geom::rect;

    fn sample_geometry() -> SrGeometry {
        SrGeometry {
            species: vec!["PrimaryPM25".to_string(), "pSO4".to_string()],
            source_layers: vec![0, 1],
            source_columns: vec![rect(0.0, 0.0, 1000.0, 1000.0), rect(1000.0, 0.0, 2000.0, 1000.0)],
            receptors: vec![rect(0.0, 0.0, 1000.0, 1000.0)],
            emission_units: "ug/s".to_string(),
        }
    }

    #[test]
    fn set_row_then_get_round_trips_in_memory() {
        let mut matrix = SrMatrix::empty(sample_geometry());
        matrix.set_row(0, 1, &[3.0, 4.0]);
        assert_eq!(matrix.get(0, 1, 0, 0), 3.0);
        assert_eq!(matrix.get(0, 1, 0, 1), 4.0);
        assert_eq!(matrix.get(0, 0, 0, 0), 0.0);
    }

    #[test]
    fn write_then_read_round_trips_geometry_and_data() {
        let mut matrix = SrMatrix::empty(sample_geometry());
        matrix.set_row(1, 0, &[1.5, 2.5]);

        let mut buf = Vec::new();
        matrix.write(&mut buf).unwrap();
        let mut cursor = io::Cursor::new(buf);
        let loaded = SrMatrix::read(&mut cursor).unwrap();

        assert_eq!(loaded.geometry.species, matrix.geometry.species);
        assert_eq!(loaded.geometry.source_layers, matrix.geometry.source_layers);
        assert_eq!(loaded.get(1, 0, 0, 0), 1.5);
        assert_eq!(loaded.get(1, 0, 0, 1), 2.5);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let matrix = SrMatrix::empty(sample_geometry());
        let mut buf = Vec::new();
        matrix.write(&mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        let mut cursor = io::Cursor::new(buf);
        assert!(SrMatrix::read(&mut cursor).is_err());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = vec![0u8; 32];
        let mut cursor = io::Cursor::new(buf);
        assert!(SrMatrix::read(&mut cursor).is_err());
    }
}

//! File I/O utilities for structures, directions and trajectories.
//!
//! All durable output of a run is plain text:
//!
//! - labeled XYZ blocks appended to shared structure files and per-path
//!   trajectory files
//! - count-prefixed vector lists (the `mins_on_sphere` format) for the
//!   sphere directions accepted around each structure
//!
//! Byte-level compatibility is not part of the core contract; these formats
//! exist so runs can be inspected and partially resumed with standard tools.

use crate::geometry::symbol_for_charge;
use nalgebra::DVector;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Subdirectory for per-path trajectory files.
pub const TRAJECTORY_DIR: &str = "trajectories";
/// Subdirectory for two-way descent path files.
pub const PATH_DIR: &str = "paths";
/// Subdirectory for per-structure direction dumps.
pub const DIRECTIONS_DIR: &str = "es_directions";

/// Creates the output directory tree for a run. Called once at workflow
/// start; everything later assumes the directories exist.
pub fn provision_directories(base: &Path) -> io::Result<()> {
    fs::create_dir_all(base)?;
    fs::create_dir_all(base.join(TRAJECTORY_DIR))?;
    fs::create_dir_all(base.join(PATH_DIR))?;
    fs::create_dir_all(base.join(DIRECTIONS_DIR))?;
    Ok(())
}

/// Formats one structure as a labeled XYZ block.
///
/// The block is the conventional `n` / comment / atom-lines layout, so files
/// holding several appended blocks open directly in molecular viewers.
///
/// # Panics
///
/// Panics if `coords.len() != charges.len() * 3`.
pub fn format_xyz(charges: &[usize], coords: &DVector<f64>, label: &str) -> String {
    assert_eq!(coords.len(), charges.len() * 3);

    let mut block = format!("{}\n{}\n", charges.len(), label);
    for (i, &charge) in charges.iter().enumerate() {
        block.push_str(&format!(
            "{}  {:>18.12}  {:>18.12}  {:>18.12}\n",
            symbol_for_charge(charge),
            coords[i * 3],
            coords[i * 3 + 1],
            coords[i * 3 + 2]
        ));
    }
    block
}

/// Appends a labeled XYZ block to a writer and flushes, so partial output
/// survives an interrupted run.
pub fn append_xyz<W: Write>(
    writer: &mut W,
    charges: &[usize],
    coords: &DVector<f64>,
    label: &str,
) -> io::Result<()> {
    writer.write_all(format_xyz(charges, coords, label).as_bytes())?;
    writer.flush()
}

/// Writes a count-prefixed vector list: the number of vectors, then for each
/// vector its length followed by its entries.
pub fn write_vector_list(path: &Path, vectors: &[DVector<f64>]) -> io::Result<()> {
    let mut content = format!("{}\n", vectors.len());
    for v in vectors {
        content.push_str(&format!("{}\n", v.len()));
        let entries: Vec<String> = v.iter().map(|x| format!("{:.17}", x)).collect();
        content.push_str(&entries.join(" "));
        content.push('\n');
    }
    fs::write(path, content)
}

/// Reads back a count-prefixed vector list written by [`write_vector_list`].
///
/// Values are whitespace-separated; line layout is not significant.
pub fn read_vector_list(path: &Path) -> io::Result<Vec<DVector<f64>>> {
    let content = fs::read_to_string(path)?;
    let mut tokens = content.split_whitespace();

    let count = next_token(&mut tokens, "vector count")?;
    let mut vectors = Vec::with_capacity(count);
    for _ in 0..count {
        let len: usize = next_token(&mut tokens, "vector length")?;
        let mut v = DVector::zeros(len);
        for i in 0..len {
            v[i] = next_token(&mut tokens, "vector entry")?;
        }
        vectors.push(v);
    }

    Ok(vectors)
}

/// Parses the next whitespace token of a vector list.
fn next_token<'a, T, I>(tokens: &mut I, what: &str) -> io::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    I: Iterator<Item = &'a str>,
{
    tokens
        .next()
        .ok_or_else(|| invalid_data(format!("missing {}", what)))?
        .parse()
        .map_err(|e: T::Err| invalid_data(format!("bad {}: {}", what, e)))
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Writes the per-structure direction dump: the structure as a labeled XYZ
/// block, then the count-prefixed direction list.
pub fn write_direction_dump(
    path: &Path,
    charges: &[usize],
    structure: &DVector<f64>,
    directions: &[DVector<f64>],
) -> io::Result<()> {
    let mut content = format_xyz(charges, structure, "ES");
    content.push_str(&format!("{}\n", directions.len()));
    for d in directions {
        content.push_str(&format!("{}\n", d.len()));
        let entries: Vec<String> = d.iter().map(|x| format!("{:.17}", x)).collect();
        content.push_str(&entries.join(" "));
        content.push('\n');
    }
    fs::write(path, content)
}

/// Reads an XYZ file into nuclear charges and flat coordinates.
///
/// Accepts the standard layout: atom count, comment line, then
/// `Symbol x y z` lines.
pub fn read_xyz(path: &Path) -> io::Result<(Vec<usize>, DVector<f64>)> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut lines = reader.lines();

    let count: usize = lines
        .next()
        .ok_or_else(|| invalid_data("empty XYZ file".to_string()))??
        .trim()
        .parse()
        .map_err(|e| invalid_data(format!("bad atom count: {}", e)))?;
    let _comment = lines.next();

    let mut charges = Vec::with_capacity(count);
    let mut coords = Vec::with_capacity(count * 3);
    for line in lines {
        let line = line?;
        let mut parts = line.split_whitespace();
        let Some(symbol) = parts.next() else { continue };

        let charge = crate::geometry::charge_for_symbol(symbol)
            .or_else(|| symbol.parse().ok())
            .ok_or_else(|| invalid_data(format!("unknown element: {}", symbol)))?;
        charges.push(charge);
        for _ in 0..3 {
            let value: f64 = parts
                .next()
                .ok_or_else(|| invalid_data("truncated coordinate line".to_string()))?
                .parse()
                .map_err(|e| invalid_data(format!("bad coordinate: {}", e)))?;
            coords.push(value);
        }

        if charges.len() == count {
            break;
        }
    }

    if charges.len() != count {
        return Err(invalid_data(format!(
            "expected {} atoms, found {}",
            count,
            charges.len()
        )));
    }

    Ok((charges, DVector::from_vec(coords)))
}

/// A trajectory or structure file that appends labeled XYZ frames.
pub struct StructureWriter {
    file: fs::File,
    charges: Vec<usize>,
}

impl StructureWriter {
    /// Creates (truncating) the file at `path`.
    pub fn create(path: impl Into<PathBuf>, charges: Vec<usize>) -> io::Result<Self> {
        let file = fs::File::create(path.into())?;
        Ok(Self { file, charges })
    }

    /// Appends one labeled frame and flushes.
    pub fn append(&mut self, coords: &DVector<f64>, label: &str) -> io::Result<()> {
        append_xyz(&mut self.file, &self.charges, coords, label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_list_round_trips() {
        let path = std::env::temp_dir().join("openshs_test_vectors.txt");
        let vectors = vec![
            DVector::from_vec(vec![1.0, -2.5, 3.25]),
            DVector::from_vec(vec![0.125, 1e-9]),
        ];

        write_vector_list(&path, &vectors).unwrap();
        let read = read_vector_list(&path).unwrap();

        assert_eq!(read.len(), 2);
        for (a, b) in vectors.iter().zip(&read) {
            assert!((a - b).norm() < 1e-15);
        }

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn truncated_vector_list_is_rejected() {
        let path = std::env::temp_dir().join("openshs_test_truncated.txt");
        fs::write(&path, "2\n3\n1.0 2.0 3.0\n3\n4.0").unwrap();

        assert!(read_vector_list(&path).is_err());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn xyz_block_round_trips_through_reader() {
        let path = std::env::temp_dir().join("openshs_test_block.xyz");
        let charges = vec![8, 1, 1];
        let coords = DVector::from_vec(vec![0.0, 0.0, 0.0, 1.43, 1.11, 0.0, -1.43, 1.11, 0.0]);

        fs::write(&path, format_xyz(&charges, &coords, "water")).unwrap();
        let (read_charges, read_coords) = read_xyz(&path).unwrap();

        assert_eq!(read_charges, charges);
        assert!((read_coords - coords).norm() < 1e-10);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn writer_appends_multiple_frames() {
        let path = std::env::temp_dir().join("openshs_test_frames.xyz");
        let coords = DVector::from_vec(vec![0.0; 6]);
        {
            let mut writer = StructureWriter::create(&path, vec![1, 1]).unwrap();
            writer.append(&coords, "0").unwrap();
            writer.append(&coords, "1").unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("2\n").count(), 2);
        assert!(content.contains("\n1\nH"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn provisioning_creates_the_tree() {
        let base = std::env::temp_dir().join("openshs_test_outdirs");
        provision_directories(&base).unwrap();

        assert!(base.join(TRAJECTORY_DIR).is_dir());
        assert!(base.join(PATH_DIR).is_dir());
        assert!(base.join(DIRECTIONS_DIR).is_dir());

        fs::remove_dir_all(&base).unwrap();
    }
}

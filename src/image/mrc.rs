//! Minimal MRC (mode 2, 32-bit float) reader and writer.
//!
//! Covers exactly what the pipeline needs: whole volumes for references and
//! output maps, and single-slice reads from particle stacks. Data are
//! little-endian; non-float modes are rejected.
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::Vector3;

const HEADER_SIZE: u64 = 1024;
const MODE_FLOAT32: i32 = 2;

/// Parsed fields of an MRC header that the pipeline uses.
#[derive(Clone, Copy, Debug)]
pub struct MrcHeader {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Voxel size (ångström / pixel), from cell size / grid size.
    pub sampling: f32,
    /// Origin (pixels), from the MRC2000 origin record.
    pub origin: Vector3<f32>,
    /// Size of the extended header (bytes), skipped on read.
    pub ext_size: usize,
}

fn read_header<R: Read>(r: &mut R, path: &Path) -> Result<MrcHeader, String> {
    let mut words = [0i32; 10];
    for w in words.iter_mut() {
        *w = r
            .read_i32::<LittleEndian>()
            .map_err(|e| format!("failed to read MRC header of {}: {e}", path.display()))?;
    }
    let [nx, ny, nz, mode, _, _, _, mx, _, _] = words;
    if mode != MODE_FLOAT32 {
        return Err(format!(
            "unsupported MRC mode {mode} in {} (only mode 2 is handled)",
            path.display()
        ));
    }
    if nx <= 0 || ny <= 0 || nz <= 0 {
        return Err(format!("bad MRC dimensions {nx}x{ny}x{nz} in {}", path.display()));
    }
    let mut cella = [0f32; 3];
    for c in cella.iter_mut() {
        *c = r
            .read_f32::<LittleEndian>()
            .map_err(|e| format!("failed to read MRC cell of {}: {e}", path.display()))?;
    }
    // cellb, mapc/mapr/maps, dmin/dmax/dmean, ispg: 10 words to skip.
    let mut skip = [0u8; 40];
    r.read_exact(&mut skip)
        .map_err(|e| format!("truncated MRC header in {}: {e}", path.display()))?;
    let nsymbt = r
        .read_i32::<LittleEndian>()
        .map_err(|e| format!("failed to read MRC nsymbt of {}: {e}", path.display()))?;
    // extra block up to the origin record at byte 196.
    let mut extra = [0u8; 100];
    r.read_exact(&mut extra)
        .map_err(|e| format!("truncated MRC header in {}: {e}", path.display()))?;
    let mut origin = [0f32; 3];
    for o in origin.iter_mut() {
        *o = r
            .read_f32::<LittleEndian>()
            .map_err(|e| format!("failed to read MRC origin of {}: {e}", path.display()))?;
    }

    let sampling = if mx > 0 && cella[0] > 0.0 {
        cella[0] / mx as f32
    } else {
        1.0
    };
    Ok(MrcHeader {
        nx: nx as usize,
        ny: ny as usize,
        nz: nz as usize,
        sampling,
        origin: Vector3::new(origin[0], origin[1], origin[2]),
        ext_size: nsymbt.max(0) as usize,
    })
}

/// Reads just the header of an MRC file.
pub fn probe(path: &Path) -> Result<MrcHeader, String> {
    let file = File::open(path).map_err(|e| format!("failed to open {}: {e}", path.display()))?;
    let mut r = BufReader::new(file);
    read_header(&mut r, path)
}

fn read_floats<R: Read>(r: &mut R, count: usize, path: &Path) -> Result<Vec<f32>, String> {
    let mut out = vec![0f32; count];
    r.read_f32_into::<LittleEndian>(&mut out)
        .map_err(|e| format!("truncated MRC data in {}: {e}", path.display()))?;
    Ok(out)
}

/// Reads a whole MRC volume.
pub fn read_volume(path: &Path) -> Result<(MrcHeader, Vec<f32>), String> {
    let file = File::open(path).map_err(|e| format!("failed to open {}: {e}", path.display()))?;
    let mut r = BufReader::new(file);
    let header = read_header(&mut r, path)?;
    r.seek(SeekFrom::Start(HEADER_SIZE + header.ext_size as u64))
        .map_err(|e| format!("seek failed in {}: {e}", path.display()))?;
    let data = read_floats(&mut r, header.nx * header.ny * header.nz, path)?;
    Ok((header, data))
}

/// Reads one z-slice (one stacked image) from an MRC stack.
pub fn read_slice(path: &Path, index: usize) -> Result<(MrcHeader, Vec<f32>), String> {
    let file = File::open(path).map_err(|e| format!("failed to open {}: {e}", path.display()))?;
    let mut r = BufReader::new(file);
    let header = read_header(&mut r, path)?;
    if index >= header.nz {
        return Err(format!(
            "slice {index} out of range for {} ({} slices)",
            path.display(),
            header.nz
        ));
    }
    let slice_len = header.nx * header.ny;
    let offset = HEADER_SIZE + header.ext_size as u64 + (index * slice_len * 4) as u64;
    r.seek(SeekFrom::Start(offset))
        .map_err(|e| format!("seek failed in {}: {e}", path.display()))?;
    let data = read_floats(&mut r, slice_len, path)?;
    Ok((header, data))
}

/// Writes a mode-2 MRC file.
pub fn write_volume(
    path: &Path,
    nx: usize,
    ny: usize,
    nz: usize,
    sampling: f32,
    origin: Vector3<f32>,
    data: &[f32],
) -> Result<(), String> {
    if data.len() != nx * ny * nz {
        return Err(format!(
            "MRC write size mismatch: {}x{}x{} needs {} values, got {}",
            nx,
            ny,
            nz,
            nx * ny * nz,
            data.len()
        ));
    }
    let file = File::create(path).map_err(|e| format!("failed to create {}: {e}", path.display()))?;
    let mut w = BufWriter::new(file);
    let werr = |e: std::io::Error| format!("failed to write {}: {e}", path.display());

    let dims = [nx as i32, ny as i32, nz as i32];
    for d in dims {
        w.write_i32::<LittleEndian>(d).map_err(werr)?;
    }
    w.write_i32::<LittleEndian>(MODE_FLOAT32).map_err(werr)?;
    for _ in 0..3 {
        w.write_i32::<LittleEndian>(0).map_err(werr)?; // nxstart
    }
    for d in dims {
        w.write_i32::<LittleEndian>(d).map_err(werr)?; // mx, my, mz
    }
    for d in dims {
        w.write_f32::<LittleEndian>(d as f32 * sampling).map_err(werr)?; // cella
    }
    for _ in 0..3 {
        w.write_f32::<LittleEndian>(90.0).map_err(werr)?; // cellb
    }
    for axis in [1i32, 2, 3] {
        w.write_i32::<LittleEndian>(axis).map_err(werr)?; // mapc, mapr, maps
    }
    let (dmin, dmax) = data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let dmean = data.iter().map(|&v| v as f64).sum::<f64>() / data.len().max(1) as f64;
    w.write_f32::<LittleEndian>(dmin).map_err(werr)?;
    w.write_f32::<LittleEndian>(dmax).map_err(werr)?;
    w.write_f32::<LittleEndian>(dmean as f32).map_err(werr)?;
    w.write_i32::<LittleEndian>(1).map_err(werr)?; // ispg
    w.write_i32::<LittleEndian>(0).map_err(werr)?; // nsymbt
    w.write_all(&[0u8; 100]).map_err(werr)?; // extra
    for o in [origin[0], origin[1], origin[2]] {
        w.write_f32::<LittleEndian>(o).map_err(werr)?;
    }
    w.write_all(b"MAP ").map_err(werr)?;
    w.write_all(&[0x44, 0x44, 0x00, 0x00]).map_err(werr)?; // machine stamp, LE
    w.write_f32::<LittleEndian>(0.0).map_err(werr)?; // rms
    w.write_i32::<LittleEndian>(0).map_err(werr)?; // nlabl
    w.write_all(&[0u8; 800]).map_err(werr)?; // labels

    for &v in data {
        w.write_f32::<LittleEndian>(v).map_err(werr)?;
    }
    w.flush().map_err(werr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mrc_test_{}_{name}", std::process::id()))
    }

    #[test]
    fn volume_round_trip() {
        let path = tmp_path("vol.mrc");
        let data: Vec<f32> = (0..4 * 4 * 4).map(|i| i as f32 * 0.5).collect();
        write_volume(&path, 4, 4, 4, 1.5, Vector3::new(2.0, 2.0, 2.0), &data).unwrap();
        let (h, back) = read_volume(&path).unwrap();
        assert_eq!((h.nx, h.ny, h.nz), (4, 4, 4));
        assert!((h.sampling - 1.5).abs() < 1e-6);
        assert_eq!(h.origin, Vector3::new(2.0, 2.0, 2.0));
        assert_eq!(back, data);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn slice_read_from_stack() {
        let path = tmp_path("stack.mrc");
        let mut data = vec![0f32; 3 * 3 * 5];
        for (i, v) in data.iter_mut().enumerate() {
            *v = i as f32;
        }
        write_volume(&path, 3, 3, 5, 1.0, Vector3::zeros(), &data).unwrap();
        let (h, slice) = read_slice(&path, 2).unwrap();
        assert_eq!(h.nz, 5);
        assert_eq!(slice, &data[2 * 9..3 * 9]);
        assert!(read_slice(&path, 5).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = read_volume(Path::new("/nonexistent/missing.mrc")).unwrap_err();
        assert!(err.contains("failed to open"));
    }

    #[test]
    fn wrong_mode_rejected() {
        let path = tmp_path("mode.mrc");
        let data = vec![0f32; 8];
        write_volume(&path, 2, 2, 2, 1.0, Vector3::zeros(), &data).unwrap();
        // Patch the mode word to int8.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[12] = 0;
        std::fs::write(&path, &bytes).unwrap();
        assert!(read_volume(&path).unwrap_err().contains("unsupported MRC mode"));
        std::fs::remove_file(&path).ok();
    }
}

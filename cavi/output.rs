//! Tab-separated result files.
//!
//! Every file is written to a uniquely named temporary file in the target
//! directory and renamed into place once complete, so a reader never sees a
//! partially written table.

use crate::data::GenotypeSource;
use crate::tensor::{FrequencyTensor, IndividualMatrix};
use ndarray::Array3;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Paths of the tables produced by one fit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultPaths {
    pub theta: PathBuf,
    pub freqs: PathBuf,
    pub freq_variances: PathBuf,
}

impl ResultPaths {
    pub fn for_prefix(prefix: &Path) -> Self {
        Self {
            theta: with_suffix(prefix, "_theta"),
            freqs: with_suffix(prefix, "_freqs"),
            freq_variances: with_suffix(prefix, "_freq_variances"),
        }
    }
}

/// `prefix` with `suffix` appended to its final component.
pub fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes the mixture table and both frequency tables for `prefix`.
pub fn write_results<S: GenotypeSource + ?Sized>(
    prefix: &Path,
    data: &S,
    theta: &IndividualMatrix,
    freqs: &FrequencyTensor,
) -> io::Result<ResultPaths> {
    let paths = ResultPaths::for_prefix(prefix);
    write_theta_table(&paths.theta, data, theta)?;
    write_frequency_table(&paths.freqs, data.generations(), &freqs.mean)?;
    write_frequency_table(&paths.freq_variances, data.generations(), &freqs.variance)?;
    log::info!(
        "Wrote {}, {} and {}",
        paths.theta.display(),
        paths.freqs.display(),
        paths.freq_variances.display()
    );
    Ok(paths)
}

/// One row per individual: its generation, its index within that generation,
/// its 1-based column in the genotype file (`NA` when unknown), and its
/// expected mixture proportions.
pub fn write_theta_table<S: GenotypeSource + ?Sized>(
    path: &Path,
    data: &S,
    theta: &IndividualMatrix,
) -> io::Result<()> {
    let npops = theta.step(0).ncols();
    write_atomically(path, |writer| {
        write!(writer, "#GENERATION\tINDIVIDUAL\tSAMPLE")?;
        for k in 1..=npops {
            write!(writer, "\tPOP{k}")?;
        }
        writeln!(writer)?;

        let mut ryu_buffer = ryu::Buffer::new();
        for (t, &generation) in data.generations().iter().enumerate() {
            for (d, row) in theta.step(t).rows().into_iter().enumerate() {
                write!(writer, "{generation}\t{d}\t")?;
                match data.sample_column(t, d) {
                    Some(column) => write!(writer, "{}", column + 1)?,
                    None => write!(writer, "NA")?,
                }
                let total = row.sum();
                for &value in row.iter() {
                    write!(writer, "\t{}", ryu_buffer.format(value / total))?;
                }
                writeln!(writer)?;
            }
        }
        Ok(())
    })
}

/// One row per locus, one `G<generation>_POP<k>` column per time step and
/// population. `values` is indexed `[t, k, l]`.
pub fn write_frequency_table(
    path: &Path,
    generations: &[i64],
    values: &Array3<f64>,
) -> io::Result<()> {
    let (nsteps, npops, nloci) = values.dim();
    if generations.len() != nsteps {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} generations were given for a table with {} time steps.",
                generations.len(),
                nsteps
            ),
        ));
    }
    write_atomically(path, |writer| {
        write!(writer, "#LOCUS")?;
        for generation in generations {
            for k in 1..=npops {
                write!(writer, "\tG{generation}_POP{k}")?;
            }
        }
        writeln!(writer)?;

        let mut ryu_buffer = ryu::Buffer::new();
        for l in 0..nloci {
            write!(writer, "{}", l + 1)?;
            for t in 0..nsteps {
                for k in 0..npops {
                    write!(writer, "\t{}", ryu_buffer.format(values[[t, k, l]]))?;
                }
            }
            writeln!(writer)?;
        }
        Ok(())
    })
}

fn write_atomically<F>(path: &Path, body: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let (temp_path, temp_file) = create_temp_beside(path)?;
    let mut writer = BufWriter::new(temp_file);

    let write_result = (|| -> io::Result<()> {
        body(&mut writer)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(io::Error::other)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })
}

fn create_temp_beside(path: &Path) -> io::Result<(PathBuf, File)> {
    let output_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let output_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Output path '{}' has no file name.", path.display()),
        )
    })?;

    let pid = std::process::id();
    let ts_nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    for attempt in 0..32u32 {
        let candidate = output_dir.join(format!(
            ".{}.{}.{}.tmp",
            output_name.to_string_lossy(),
            pid,
            ts_nanos + attempt as u128
        ));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!(
            "Failed to allocate a unique temporary output file in '{}'.",
            output_dir.display()
        ),
    ))
}

//! # Assembly FASTA input and polished FASTA output
use std::{
    collections::HashMap,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::{error::PolishError, utils::normalize_contig_name};

const FASTA_LINE_WIDTH: usize = 80;

/// Read the draft assembly into a contig-name -> sequence map. Names are
/// normalized to their first whitespace-separated token, matching how they
/// appear in alignment headers.
pub fn read_assembly<P: AsRef<Path> + std::fmt::Debug>(path: P) -> Result<HashMap<String, Vec<u8>>> {
    let reader =
        bio::io::fasta::Reader::from_file(&path).map_err(|_| PolishError::InputUnavailable {
            path: path.as_ref().to_path_buf(),
        })?;

    let mut contigs = HashMap::new();
    for record in reader.records() {
        let record = record.map_err(|e| PolishError::MalformedInput {
            msg: format!("FASTA parse failure in {}: {e}", path.as_ref().display()),
        })?;
        let name = normalize_contig_name(record.id()).to_string();
        debug!("Read reference contig {name} ({} bases)", record.seq().len());
        if record.seq().is_empty() {
            return Err(PolishError::MalformedInput {
                msg: format!("contig '{name}' has an empty sequence"),
            }
            .into());
        }
        contigs.insert(name, record.seq().to_ascii_uppercase());
    }
    if contigs.is_empty() {
        return Err(PolishError::MalformedInput {
            msg: format!("no contigs in {}", path.as_ref().display()),
        }
        .into());
    }
    info!(
        "Parsed {} reference contigs from {}",
        contigs.len(),
        path.as_ref().display()
    );
    Ok(contigs)
}

/// Write polished contigs as FASTA, one `>name` header per contig and
/// sequence lines wrapped at 80 columns.
pub fn write_assembly<P: AsRef<Path>>(path: P, contigs: &[(String, String)]) -> Result<()> {
    let file = File::create(&path)
        .with_context(|| format!("could not open {} for writing", path.as_ref().display()))?;
    let mut writer = BufWriter::new(file);
    for (name, sequence) in contigs {
        write_record(&mut writer, name, sequence)?;
    }
    info!(
        "Wrote {} polished contigs to {}",
        contigs.len(),
        path.as_ref().display()
    );
    Ok(())
}

fn write_record<W: Write>(writer: &mut W, name: &str, sequence: &str) -> Result<()> {
    writeln!(writer, ">{name}")?;
    for line in sequence.as_bytes().chunks(FASTA_LINE_WIDTH) {
        writer.write_all(line)?;
        writeln!(writer)?;
    }
    Ok(())
}

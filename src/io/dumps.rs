//! # Ancillary per-chunk dump files
//!
//! Optional diagnostic outputs: the POA as DOT or TSV, per-node observed
//! repeat counts, and the phased read sets. One file per chunk, named
//! `{base}.{kind}.C{chunk:05}.{contig}-{boundaryStart}-{boundaryEnd}.{ext}`.
use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufWriter, Write},
};

use anyhow::{Context, Result};
use rust_htslib::bam::{self, Read};

use crate::{chunk::Chunk, poa::Poa, reads::ChunkRead};

pub fn chunk_file_name(base: &str, kind: &str, chunk_idx: usize, chunk: &Chunk, ext: &str) -> String {
    format!(
        "{base}.{kind}.C{chunk_idx:05}.{}-{}-{}.{ext}",
        chunk.ref_name, chunk.boundary_start, chunk.boundary_end
    )
}

/// POA as a DOT digraph: the consensus backbone as a node chain, insert
/// branches as boxed side nodes.
pub fn write_poa_dot(path: &str, poa: &Poa) -> Result<()> {
    let file = File::create(path).with_context(|| format!("could not open {path} for writing"))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "digraph poa {{")?;
    writeln!(writer, "  rankdir=LR;")?;
    writeln!(writer, "  n0 [label=\"start\"];")?;
    for (idx, node) in poa.nodes.iter().enumerate().skip(1) {
        writeln!(
            writer,
            "  n{idx} [label=\"{}{} w={:.1} d={:.1}\"];",
            node.base as char,
            node.run_length,
            node.total_observation_weight(),
            node.delete_weight
        )?;
        writeln!(writer, "  n{} -> n{idx};", idx - 1)?;
    }
    for (idx, node) in poa.nodes.iter().enumerate() {
        for (branch, insert) in node.inserts.iter().enumerate() {
            let label = String::from_utf8_lossy(&insert.seq.expand()).into_owned();
            writeln!(
                writer,
                "  i{idx}_{branch} [shape=box, label=\"+{label} w={:.1}\"];",
                insert.weight
            )?;
            writeln!(writer, "  n{idx} -> i{idx}_{branch};")?;
            if idx + 1 < poa.nodes.len() {
                writeln!(writer, "  i{idx}_{branch} -> n{};", idx + 1)?;
            }
        }
    }
    writeln!(writer, "}}")?;
    Ok(())
}

/// POA node table: one row per non-sentinel node with its evidence weights.
pub fn write_poa_tsv(path: &str, poa: &Poa) -> Result<()> {
    let file = File::create(path).with_context(|| format!("could not open {path} for writing"))?;
    let mut writer = BufWriter::new(file);
    writeln!(
        writer,
        "node\tbase\trunLength\tmatchWeight\ttotalWeight\tdeleteWeight\tinserts"
    )?;
    for (idx, node) in poa.nodes.iter().enumerate().skip(1) {
        writeln!(
            writer,
            "{idx}\t{}\t{}\t{:.3}\t{:.3}\t{:.3}\t{}",
            node.base as char,
            node.run_length,
            node.base_weight(node.base),
            node.total_observation_weight(),
            node.delete_weight,
            node.inserts.len()
        )?;
    }
    Ok(())
}

/// Observed run lengths per node, with the strand of each observation.
pub fn write_repeat_counts_tsv(path: &str, poa: &Poa, reads: &[ChunkRead]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("could not open {path} for writing"))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "node\tbase\trunLength\tread\tstrand\tobservedLength")?;
    for (idx, node) in poa.nodes.iter().enumerate().skip(1) {
        for obs in &node.observations {
            if obs.base != node.base {
                continue;
            }
            writeln!(
                writer,
                "{idx}\t{}\t{}\t{}\t{}\t{}",
                node.base as char,
                node.run_length,
                reads[obs.read_idx].id,
                if obs.forward_strand { '+' } else { '-' },
                obs.run_length
            )?;
        }
    }
    Ok(())
}

/// The phased read-id sets, one read per line with its haplotype label.
pub fn write_haplotype_reads(
    path: &str,
    h1_reads: &BTreeSet<String>,
    h2_reads: &BTreeSet<String>,
    unphased: &BTreeSet<String>,
) -> Result<()> {
    let file = File::create(path).with_context(|| format!("could not open {path} for writing"))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "read\thaplotype")?;
    for id in h1_reads {
        writeln!(writer, "{id}\tH1")?;
    }
    for id in h2_reads {
        writeln!(writer, "{id}\tH2")?;
    }
    for id in unphased {
        writeln!(writer, "{id}\tnone")?;
    }
    Ok(())
}

/// Re-fetch the chunk's records and split them into two haplotype BAMs by
/// read id. Unphased reads are written to both.
pub fn write_haplotype_bams(
    base_path: &str,
    bam_path: &str,
    chunk_idx: usize,
    chunk: &Chunk,
    h1_reads: &BTreeSet<String>,
    h2_reads: &BTreeSet<String>,
) -> Result<()> {
    let mut reader = bam::IndexedReader::from_path(bam_path)?;
    let header = bam::Header::from_template(reader.header());
    let mut writers = [1, 2]
        .iter()
        .map(|hap| {
            let path = chunk_file_name(base_path, &format!("hap{hap}"), chunk_idx, chunk, "bam");
            bam::Writer::from_path(&path, &header, bam::Format::Bam)
                .with_context(|| format!("could not open {path} for writing"))
        })
        .collect::<Result<Vec<_>>>()?;

    reader.fetch((
        chunk.ref_name.as_str(),
        chunk.boundary_start as i64,
        chunk.boundary_end as i64,
    ))?;
    let mut record = bam::Record::new();
    while let Some(result) = reader.read(&mut record) {
        result?;
        let id = String::from_utf8_lossy(record.qname()).into_owned();
        let in_h1 = h1_reads.contains(&id);
        let in_h2 = h2_reads.contains(&id);
        if in_h1 || !in_h2 {
            writers[0].write(&record)?;
        }
        if in_h2 || !in_h1 {
            writers[1].write(&record)?;
        }
    }
    Ok(())
}

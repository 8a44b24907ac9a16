//! Union-find entity resolution for DEDUP projects.
//!
//! Connected components over all matched pairs are computed in three
//! streaming passes over the matched-pairs file: one to collect the
//! distinct record indices, one to apply the unions, and one to assign
//! entity ids. Assignment cannot start earlier: the component
//! representative is only stable once every union has been applied.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::engine::{ENTITY_ID_COLUMN, REC_ID_COLUMN};
use crate::error::Result;
use crate::models::{Header, IdAllocator, NumKey};
use crate::util::files::{replace_file, WorkDir};

/// Disjoint-set arena over dense integer positions, with union by weight
/// and path halving.
#[derive(Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
    weight: Vec<u32>,
    count: usize,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            weight: vec![0; n],
            count: n,
        }
    }

    /// Root of the set containing `x`, flattening one level per hop.
    pub fn find(&mut self, x: usize) -> usize {
        let mut i = x;
        while i != self.parent[i] {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    pub fn linked(&mut self, x: usize, y: usize) -> bool {
        self.find(x) == self.find(y)
    }

    pub fn union(&mut self, x: usize, y: usize) {
        let i = self.find(x);
        let j = self.find(y);
        if i == j {
            return;
        }
        if self.weight[i] < self.weight[j] {
            self.parent[i] = j;
        } else {
            self.parent[j] = i;
            if self.weight[i] == self.weight[j] {
                self.weight[i] += 1;
            }
        }
        self.count -= 1;
    }

    /// Number of disjoint sets remaining.
    pub fn count(&self) -> usize {
        self.count
    }
}

fn pair_reader(path: &Path) -> Result<csv::Reader<File>> {
    Ok(csv::ReaderBuilder::new().has_headers(true).from_path(path)?)
}

/// Assign an entity id to every record appearing in the matched-pairs
/// file. The file is rewritten with a leading `ENTITY_ID` column, and a
/// `(REC_ID, ENTITY_ID)` index sorted by record id is written to
/// `entity_index_out` for the extraction pass. Returns the number of
/// entities found.
pub fn resolve_entities(
    matched: &Path,
    left_key_col: &str,
    right_key_col: &str,
    entity_index_out: &Path,
    alloc: &mut IdAllocator,
    work: &WorkDir,
) -> Result<u64> {
    log::info!("Assigning entity id to linked records.");
    if std::fs::metadata(matched).map(|m| m.len() == 0).unwrap_or(true) {
        return Ok(0);
    }

    let label = matched.display().to_string();
    let mut reader = pair_reader(matched)?;
    let header = Header::from_record(&reader.headers()?.clone());
    let left_pos = header.position(left_key_col, &label)?;
    let right_pos = header.position(right_key_col, &label)?;

    // Pass 1: the distinct record indices on either side, in numeric
    // order, each mapped to a dense position.
    let mut positions: BTreeMap<NumKey, String> = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        for pos in [left_pos, right_pos] {
            let value = record.get(pos).unwrap_or("");
            let key = NumKey::parse(REC_ID_COLUMN, value)?;
            positions.entry(key).or_insert_with(|| value.to_string());
        }
    }
    let labels: Vec<&String> = positions.values().collect();
    let index_of: BTreeMap<NumKey, usize> = positions
        .keys()
        .enumerate()
        .map(|(i, k)| (*k, i))
        .collect();

    // Pass 2: union the two sides of every pair.
    log::debug!("Finding chains of connected records that belong to the same entity");
    let mut sets = UnionFind::new(labels.len());
    let mut reader = pair_reader(matched)?;
    for record in reader.records() {
        let record = record?;
        let left = index_of[&NumKey::parse(REC_ID_COLUMN, record.get(left_pos).unwrap_or(""))?];
        let right = index_of[&NumKey::parse(REC_ID_COLUMN, record.get(right_pos).unwrap_or(""))?];
        sets.union(left, right);
    }

    // Pass 3: assign ids lazily per component representative and rewrite
    // the matched file with the entity column in front.
    let staged = work.file("entity_file.csv");
    let file = File::create(&staged)?;
    let mut writer = csv::WriterBuilder::new().from_writer(BufWriter::with_capacity(512 * 1024, file));
    let mut columns = vec![ENTITY_ID_COLUMN.to_string()];
    columns.extend(header.columns().iter().cloned());
    writer.write_record(&columns)?;

    let mut entity_ids: Vec<Option<u64>> = vec![None; labels.len()];
    let mut reader = pair_reader(matched)?;
    for record in reader.records() {
        let record = record?;
        let left = index_of[&NumKey::parse(REC_ID_COLUMN, record.get(left_pos).unwrap_or(""))?];
        let root = sets.find(left);
        let id = *entity_ids[root].get_or_insert_with(|| alloc.next_id());
        let mut out = vec![id.to_string()];
        out.extend(record.iter().map(String::from));
        writer.write_record(&out)?;
    }
    writer.flush()?;
    replace_file(&staged, matched)?;

    // The entity index: every matched record id with its entity id, in
    // ascending record-id order.
    let file = File::create(entity_index_out)?;
    let mut index_writer = csv::WriterBuilder::new().from_writer(BufWriter::new(file));
    index_writer.write_record([REC_ID_COLUMN, ENTITY_ID_COLUMN])?;
    for (pos, label) in labels.iter().enumerate() {
        let root = sets.find(pos);
        let id = entity_ids[root].expect("every matched record belongs to a component");
        index_writer.write_record([label.as_str(), id.to_string().as_str()])?;
    }
    index_writer.flush()?;

    Ok(sets.count() as u64)
}

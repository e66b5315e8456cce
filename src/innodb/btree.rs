//! B+tree traversal.
//!
//! [`TreeWalker`] descends from an index root through node-pointer records
//! to the leaf level and hands out [`FullScan`] iterators that walk the leaf
//! pages left to right through their FIL `next` pointers.
//!
//! Pages are read one at a time and only the current leaf page is held, so
//! a scan can be dropped at any point. Every page visited by a descent or a
//! scan is remembered; meeting a page twice ends the operation with
//! [`IdbError::CyclicTree`].
//!
//! A leaf page with a bad checksum is reported as an `Err` item and skipped:
//! its records are not decoded, but its `next` pointer is still followed so
//! the rest of the index can be recovered.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::innodb::constants::FIL_NULL;
use crate::innodb::directory::PageDirectory;
use crate::innodb::index::IndexHeader;
use crate::innodb::layout::{IndexLayout, SearchKey};
use crate::innodb::lob::DEFAULT_MAX_OVERFLOW_PAGES;
use crate::innodb::page::Page;
use crate::innodb::page_types::PageType;
use crate::innodb::record::{decode_record, walk_records, Record};
use crate::innodb::tablespace::Tablespace;
use crate::IdbError;

/// Scan behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Yield delete-marked records too.
    pub include_deleted: bool,
    /// Check page checksums; when off every page is read unchecked.
    pub verify_checksums: bool,
    /// Cap on pages followed while resolving one off-page value.
    pub max_overflow_pages: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            include_deleted: false,
            verify_checksums: true,
            max_overflow_pages: DEFAULT_MAX_OVERFLOW_PAGES,
        }
    }
}

/// Where a walker or scan is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkState {
    AtRoot,
    Descending { page_no: u64, level: u16 },
    AtLeaf { page_no: u64 },
    Exhausted,
}

/// The last record a scan yielded; a scan can be resumed right after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanPosition {
    pub page_no: u64,
    pub offset: usize,
}

/// Identity of the tree a walker is bound to, taken from its root page.
#[derive(Debug, Clone, Copy)]
struct TreeId {
    page_type: PageType,
    index_id: u64,
}

/// Descends a B+tree from its root.
pub struct TreeWalker<'a> {
    ts: &'a mut Tablespace,
    layout: &'a IndexLayout,
    root: u64,
    opts: ScanOptions,
    state: WalkState,
}

impl<'a> TreeWalker<'a> {
    pub fn new(ts: &'a mut Tablespace, layout: &'a IndexLayout, root: u64, opts: ScanOptions) -> Self {
        TreeWalker {
            ts,
            layout,
            root,
            opts,
            state: WalkState::AtRoot,
        }
    }

    pub fn state(&self) -> WalkState {
        self.state
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    /// Follow the first child pointer of every level down to the leftmost leaf.
    pub fn leftmost_leaf(&mut self) -> Result<u64, IdbError> {
        let (leaf, _) = self.descend(None)?;
        Ok(leaf)
    }

    /// Scan every leaf record in key order.
    pub fn full_scan(mut self) -> FullScan<'a> {
        match self.descend(None) {
            Ok((leaf, tree)) => self.scan(leaf, tree, Start::First),
            Err(e) => FullScan::failed(self, e),
        }
    }

    /// Scan leaf records with a key not below `key`, in key order.
    pub fn scan_from(mut self, key: &SearchKey) -> FullScan<'a> {
        match self.descend(Some(key)) {
            Ok((leaf, tree)) => {
                let start = match self.leaf_position(leaf, key) {
                    Ok(Some(offset)) => Start::At(offset),
                    Ok(None) => Start::PastEnd,
                    Err(e) => return FullScan::failed(self, e),
                };
                self.scan(leaf, tree, start)
            }
            Err(e) => FullScan::failed(self, e),
        }
    }

    /// The first leaf record with a key not below `key`.
    ///
    /// Fails with [`IdbError::NotFound`] if every record sorts below `key`.
    pub fn seek(self, key: &SearchKey) -> Result<Record, IdbError> {
        self.scan_from(key)
            .next()
            .unwrap_or_else(|| Err(IdbError::NotFound("no record at or after the key".to_string())))
    }

    /// Continue a scan after the record at `position`.
    pub fn resume(mut self, position: ScanPosition) -> FullScan<'a> {
        let tree = match self.tree_id() {
            Ok(t) => t,
            Err(e) => return FullScan::failed(self, e),
        };
        self.scan(position.page_no, tree, Start::After(position.offset))
    }

    fn read(&mut self, page_no: u64) -> Result<Arc<Page>, IdbError> {
        if self.opts.verify_checksums {
            self.ts.read_page(page_no)
        } else {
            self.ts.read_page_unchecked(page_no)
        }
    }

    fn tree_id(&mut self) -> Result<TreeId, IdbError> {
        self.ts.check_record_format()?;
        let root = self.read(self.root)?;
        let hdr = index_header(&root)?;
        Ok(TreeId {
            page_type: root.page_type(),
            index_id: hdr.index_id,
        })
    }

    /// Walk from the root to a leaf; towards `key` if given, else leftmost.
    fn descend(&mut self, key: Option<&SearchKey>) -> Result<(u64, TreeId), IdbError> {
        self.ts.check_record_format()?;
        let root = self.read(self.root)?;
        let root_hdr = index_header(&root)?;
        let tree = TreeId {
            page_type: root.page_type(),
            index_id: root_hdr.index_id,
        };
        let mut visited = HashSet::new();
        let mut page = root;
        let mut hdr = root_hdr;

        loop {
            let page_no = page.page_no;
            if !visited.insert(page_no) {
                return Err(IdbError::CyclicTree { page_no });
            }
            if hdr.is_leaf() {
                self.state = WalkState::AtLeaf { page_no };
                return Ok((page_no, tree));
            }
            self.state = WalkState::Descending {
                page_no,
                level: hdr.level,
            };

            let dir = PageDirectory::parse(&page)?;
            let origin = match key {
                Some(k) => {
                    let found = dir.search(&page, self.layout, k)?;
                    found.preceding.or(found.at)
                }
                None => walk_records(&page).records.first().map(|r| r.offset),
            }
            .ok_or_else(|| IdbError::MalformedHeader {
                page_no,
                reason: format!("level {} page has no node pointers", hdr.level),
            })?;
            let child = decode_record(&page, origin, self.layout, false)?
                .child_page_no
                .ok_or_else(|| IdbError::MalformedHeader {
                    page_no,
                    reason: format!("node pointer at offset {} has no child", origin),
                })? as u64;
            debug!(page_no, level = hdr.level, child, "descending");

            let next = self.read(child)?;
            let next_hdr = index_header(&next)?;
            check_membership(&next, &next_hdr, tree)?;
            if next_hdr.level.checked_add(1) != Some(hdr.level) {
                return Err(IdbError::MalformedHeader {
                    page_no: child,
                    reason: format!(
                        "child of a level {} page is at level {}",
                        hdr.level, next_hdr.level
                    ),
                });
            }
            page = next;
            hdr = next_hdr;
        }
    }

    /// First record on leaf `page_no` not below `key`.
    fn leaf_position(&mut self, page_no: u64, key: &SearchKey) -> Result<Option<usize>, IdbError> {
        let page = self.read(page_no)?;
        let dir = PageDirectory::parse(&page)?;
        Ok(dir.search(&page, self.layout, key)?.at)
    }

    fn scan(self, leaf: u64, tree: TreeId, start: Start) -> FullScan<'a> {
        FullScan {
            ts: self.ts,
            layout: self.layout,
            opts: self.opts,
            tree,
            next_page: Some(leaf),
            start,
            pending: VecDeque::new(),
            visited: HashSet::new(),
            last: None,
            state: WalkState::AtLeaf { page_no: leaf },
        }
    }
}

fn index_header(page: &Page) -> Result<IndexHeader, IdbError> {
    if !matches!(page.page_type(), PageType::Index | PageType::Sdi) {
        return Err(IdbError::MalformedHeader {
            page_no: page.page_no,
            reason: format!("expected an index page, found {}", page.page_type()),
        });
    }
    IndexHeader::parse_checked(&page.data, page.page_no)
}

fn check_membership(page: &Page, hdr: &IndexHeader, tree: TreeId) -> Result<(), IdbError> {
    if page.page_type() != tree.page_type || hdr.index_id != tree.index_id {
        return Err(IdbError::MalformedHeader {
            page_no: page.page_no,
            reason: format!(
                "page belongs to index {} ({}), expected index {} ({})",
                hdr.index_id,
                page.page_type(),
                tree.index_id,
                tree.page_type
            ),
        });
    }
    Ok(())
}

/// Where to start on the first leaf page of a scan.
#[derive(Debug, Clone, Copy)]
enum Start {
    First,
    At(usize),
    After(usize),
    PastEnd,
}

/// Lazy, left-to-right iterator over leaf records.
///
/// Decoding problems on a record are yielded as `Err` items and the scan
/// continues; a broken leaf chain (cycle, wrong page type or index, read
/// failure) is yielded once and ends the scan.
pub struct FullScan<'a> {
    ts: &'a mut Tablespace,
    layout: &'a IndexLayout,
    opts: ScanOptions,
    tree: TreeId,
    next_page: Option<u64>,
    start: Start,
    pending: VecDeque<(usize, u64, Result<Record, IdbError>)>,
    visited: HashSet<u64>,
    last: Option<ScanPosition>,
    state: WalkState,
}

impl<'a> FullScan<'a> {
    fn failed(walker: TreeWalker<'a>, error: IdbError) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back((0, walker.root, Err(error)));
        FullScan {
            ts: walker.ts,
            layout: walker.layout,
            opts: walker.opts,
            tree: TreeId {
                page_type: PageType::Index,
                index_id: 0,
            },
            next_page: None,
            start: Start::First,
            pending,
            visited: HashSet::new(),
            last: None,
            state: WalkState::Exhausted,
        }
    }

    pub fn state(&self) -> WalkState {
        self.state
    }

    /// Position of the last record yielded, for [`TreeWalker::resume`].
    pub fn position(&self) -> Option<ScanPosition> {
        self.last
    }

    /// The tablespace, for resolving off-page values between items.
    pub fn tablespace_mut(&mut self) -> &mut Tablespace {
        self.ts
    }

    pub fn options(&self) -> &ScanOptions {
        &self.opts
    }

    /// Read the next leaf page and queue its records.
    fn load(&mut self, page_no: u64) {
        self.next_page = None;
        self.state = WalkState::AtLeaf { page_no };
        if !self.visited.insert(page_no) {
            warn!(page_no, "leaf chain loops");
            self.fail(page_no, IdbError::CyclicTree { page_no });
            return;
        }

        let page = if self.opts.verify_checksums {
            match self.ts.read_page(page_no) {
                Ok(p) => p,
                Err(e @ IdbError::ChecksumMismatch { .. }) => {
                    warn!(page_no, "skipping leaf page with bad checksum");
                    self.pending.push_back((0, page_no, Err(e)));
                    // records are untrusted but the sibling pointer may still be good
                    match self.ts.read_page_unchecked(page_no) {
                        Ok(p) => self.next_page = sibling(&p),
                        Err(e) => self.fail(page_no, e),
                    }
                    return;
                }
                Err(e) => {
                    self.fail(page_no, e);
                    return;
                }
            }
        } else {
            match self.ts.read_page_unchecked(page_no) {
                Ok(p) => p,
                Err(e) => {
                    self.fail(page_no, e);
                    return;
                }
            }
        };

        let hdr = match index_header(&page) {
            Ok(h) => h,
            Err(e) => {
                self.fail(page_no, e);
                return;
            }
        };
        if let Err(e) = check_membership(&page, &hdr, self.tree) {
            self.fail(page_no, e);
            return;
        }
        if !hdr.is_leaf() {
            self.fail(
                page_no,
                IdbError::MalformedHeader {
                    page_no,
                    reason: format!("leaf chain reaches a level {} page", hdr.level),
                },
            );
            return;
        }

        let chain = walk_records(&page);
        let find = |o: usize| chain.records.iter().position(|p| p.offset == o);
        let first = match std::mem::replace(&mut self.start, Start::First) {
            Start::First => Some(0),
            Start::At(o) => find(o),
            Start::After(o) => find(o).map(|i| i + 1),
            Start::PastEnd => Some(chain.records.len()),
        };
        let first = first.unwrap_or_else(|| {
            self.pending.push_back((
                0,
                page_no,
                Err(IdbError::NotFound(format!(
                    "start record is not on page {}",
                    page_no
                ))),
            ));
            chain.records.len()
        });
        for pos in &chain.records[first..] {
            if pos.header.deleted && !self.opts.include_deleted {
                continue;
            }
            let decoded = decode_record(&page, pos.offset, self.layout, true);
            self.pending.push_back((pos.offset, page_no, decoded));
        }
        if let Some(e) = chain.broken {
            self.pending.push_back((0, page_no, Err(e)));
        }
        self.next_page = sibling(&page);
        debug!(page_no, records = self.pending.len(), "leaf page loaded");
    }

    fn fail(&mut self, page_no: u64, error: IdbError) {
        self.pending.push_back((0, page_no, Err(error)));
        self.next_page = None;
    }
}

fn sibling(page: &Page) -> Option<u64> {
    (page.header.next_page != FIL_NULL).then_some(page.header.next_page as u64)
}

impl Iterator for FullScan<'_> {
    type Item = Result<Record, IdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((offset, page_no, item)) = self.pending.pop_front() {
                if item.is_ok() {
                    self.last = Some(ScanPosition { page_no, offset });
                }
                return Some(item);
            }
            match self.next_page {
                Some(page_no) => self.load(page_no),
                None => {
                    self.state = WalkState::Exhausted;
                    return None;
                }
            }
        }
    }
}

/// Root page of one index, found by scanning INDEX pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexRoot {
    pub index_id: u64,
    pub root_page: u64,
    pub level: u16,
    /// INDEX pages seen for this index.
    pub page_count: u64,
}

/// Find the root of every index in the tablespace, ordered by index id.
///
/// The root is the highest-level page of the index without siblings. The
/// clustered index is created first, so it has the lowest id.
pub fn find_index_roots(ts: &mut Tablespace) -> Result<Vec<IndexRoot>, IdbError> {
    let mut roots: BTreeMap<u64, IndexRoot> = BTreeMap::new();
    for page_no in 0..ts.page_count() {
        let page = ts.read_page_unchecked(page_no)?;
        if page.page_type() != PageType::Index {
            continue;
        }
        let Some(hdr) = IndexHeader::parse(&page.data) else {
            continue;
        };
        let lone = page.header.prev_page == FIL_NULL && page.header.next_page == FIL_NULL;
        let entry = roots.entry(hdr.index_id).or_insert(IndexRoot {
            index_id: hdr.index_id,
            root_page: page_no,
            level: hdr.level,
            page_count: 0,
        });
        entry.page_count += 1;
        if lone && (entry.page_count == 1 || hdr.level > entry.level) {
            entry.root_page = page_no;
            entry.level = hdr.level;
        }
    }
    Ok(roots.into_values().collect())
}

/// Root of the clustered index (lowest index id).
pub fn clustered_index_root(ts: &mut Tablespace) -> Result<IndexRoot, IdbError> {
    find_index_roots(ts)?
        .into_iter()
        .next()
        .ok_or_else(|| IdbError::NotFound("no INDEX pages in tablespace".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::builder::{build_btree, BuiltTree, RecordSpec, TablespaceBuilder, TreeShape};
    use crate::innodb::field_decode::{encode_field, FieldValue};
    use crate::innodb::record::FieldData;
    use crate::innodb::schema::{ColumnDef, ColumnType, TableSchema};

    const PS: u32 = 16384;

    fn layout() -> IndexLayout {
        let schema = TableSchema::new(
            vec![
                ColumnDef::new("id", ColumnType::Int { unsigned: true }),
                ColumnDef::new("v", ColumnType::Int { unsigned: true }),
            ],
            vec![0],
        )
        .unwrap();
        IndexLayout::clustered(&schema)
    }

    fn u32_field(layout: &IndexLayout, v: u64) -> FieldData {
        FieldData::Inline(encode_field(&FieldValue::Uint(v), &layout.columns()[0]).unwrap())
    }

    fn row(layout: &IndexLayout, id: u64) -> RecordSpec {
        RecordSpec::leaf(vec![
            u32_field(layout, id),
            FieldData::Inline(vec![0; 6]),
            FieldData::Inline(vec![0; 7]),
            u32_field(layout, id * 10),
        ])
    }

    fn tree(ids: &[u64], per_page: usize) -> (Tablespace, IndexLayout, BuiltTree) {
        let layout = layout();
        let rows: Vec<RecordSpec> = ids.iter().map(|&id| row(&layout, id)).collect();
        let mut b = TablespaceBuilder::new(PS, 3);
        let built = build_btree(&mut b, &layout, &TreeShape::new(50).with_max_records(per_page), &rows).unwrap();
        (Tablespace::from_bytes(b.finish()).unwrap(), layout, built)
    }

    fn id_of(r: &Record) -> u64 {
        match &r.fields[0] {
            FieldData::Inline(b) => u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn key(layout: &IndexLayout, id: u64) -> SearchKey {
        SearchKey::from_values(layout, &[FieldValue::Uint(id)]).unwrap()
    }

    #[test]
    fn test_full_scan_in_key_order() {
        let ids: Vec<u64> = (1..=60).map(|i| i * 2).collect();
        let (mut ts, layout, built) = tree(&ids, 5);
        assert!(built.height >= 3);
        let walker = TreeWalker::new(&mut ts, &layout, built.root as u64, ScanOptions::default());
        let got: Vec<u64> = walker.full_scan().map(|r| id_of(&r.unwrap())).collect();
        assert_eq!(got, ids);
    }

    #[test]
    fn test_leftmost_leaf() {
        let (mut ts, layout, built) = tree(&(1..=30).collect::<Vec<_>>(), 4);
        let mut walker = TreeWalker::new(&mut ts, &layout, built.root as u64, ScanOptions::default());
        assert_eq!(walker.leftmost_leaf().unwrap(), built.leaves[0] as u64);
        assert_eq!(walker.state(), WalkState::AtLeaf { page_no: built.leaves[0] as u64 });
    }

    #[test]
    fn test_seek_matches_linear_scan() {
        let ids: Vec<u64> = (1..=40).map(|i| i * 3).collect();
        let (mut ts, layout, built) = tree(&ids, 4);
        for target in [0u64, 1, 3, 4, 59, 60, 61, 119, 120] {
            let expected = ids.iter().copied().find(|&id| id >= target);
            let walker = TreeWalker::new(&mut ts, &layout, built.root as u64, ScanOptions::default());
            match (walker.seek(&key(&layout, target)), expected) {
                (Ok(r), Some(id)) => assert_eq!(id_of(&r), id, "target {}", target),
                (Err(IdbError::NotFound(_)), None) => {}
                (got, want) => panic!("target {}: got {:?}, want {:?}", target, got, want),
            }
        }
        let walker = TreeWalker::new(&mut ts, &layout, built.root as u64, ScanOptions::default());
        assert!(matches!(walker.seek(&key(&layout, 121)), Err(IdbError::NotFound(_))));
    }

    #[test]
    fn test_scan_from_and_resume() {
        let ids: Vec<u64> = (1..=25).collect();
        let (mut ts, layout, built) = tree(&ids, 4);
        let root = built.root as u64;

        let walker = TreeWalker::new(&mut ts, &layout, root, ScanOptions::default());
        let mut scan = walker.scan_from(&key(&layout, 10));
        let first: Vec<u64> = scan.by_ref().take(5).map(|r| id_of(&r.unwrap())).collect();
        assert_eq!(first, [10, 11, 12, 13, 14]);
        let pos = scan.position().unwrap();
        drop(scan);

        let walker = TreeWalker::new(&mut ts, &layout, root, ScanOptions::default());
        let rest: Vec<u64> = walker.resume(pos).map(|r| id_of(&r.unwrap())).collect();
        assert_eq!(rest, (15..=25).collect::<Vec<_>>());
    }

    #[test]
    fn test_deleted_records_skipped_by_default() {
        let layout = layout();
        let rows: Vec<RecordSpec> = (1..=6)
            .map(|id| if id % 2 == 0 { row(&layout, id).deleted() } else { row(&layout, id) })
            .collect();
        let mut b = TablespaceBuilder::new(PS, 3);
        let built = build_btree(&mut b, &layout, &TreeShape::new(50), &rows).unwrap();
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();

        let walker = TreeWalker::new(&mut ts, &layout, built.root as u64, ScanOptions::default());
        let live: Vec<u64> = walker.full_scan().map(|r| id_of(&r.unwrap())).collect();
        assert_eq!(live, [1, 3, 5]);

        let opts = ScanOptions {
            include_deleted: true,
            ..ScanOptions::default()
        };
        let walker = TreeWalker::new(&mut ts, &layout, built.root as u64, opts);
        assert_eq!(walker.full_scan().count(), 6);
    }

    #[test]
    fn test_corrupt_leaf_is_reported_and_skipped() {
        let layout = layout();
        let rows: Vec<RecordSpec> = (1..=12).map(|id| row(&layout, id)).collect();
        let mut b = TablespaceBuilder::new(PS, 3);
        let built = build_btree(&mut b, &layout, &TreeShape::new(50).with_max_records(4), &rows).unwrap();
        let mut image = b.finish();
        let middle = built.leaves[1] as usize * PS as usize;
        image[middle + 200] ^= 0xFF;
        let mut ts = Tablespace::from_bytes(image).unwrap();

        let walker = TreeWalker::new(&mut ts, &layout, built.root as u64, ScanOptions::default());
        let items: Vec<Result<Record, IdbError>> = walker.full_scan().collect();
        let errors = items.iter().filter(|r| r.is_err()).count();
        assert_eq!(errors, 1);
        assert!(matches!(items[4], Err(IdbError::ChecksumMismatch { .. })));
        let ids: Vec<u64> = items.iter().filter_map(|r| r.as_ref().ok()).map(id_of).collect();
        assert_eq!(ids, [1, 2, 3, 4, 9, 10, 11, 12]);
    }

    #[test]
    fn test_leaf_cycle_detected() {
        let layout = layout();
        let rows: Vec<RecordSpec> = (1..=12).map(|id| row(&layout, id)).collect();
        let mut b = TablespaceBuilder::new(PS, 3);
        let built = build_btree(&mut b, &layout, &TreeShape::new(50).with_max_records(4), &rows).unwrap();
        let last = *built.leaves.last().unwrap();
        let first = built.leaves[0];
        b.edit_page(last, |p| p[12..16].copy_from_slice(&first.to_be_bytes()));
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();

        let walker = TreeWalker::new(&mut ts, &layout, built.root as u64, ScanOptions::default());
        let items: Vec<Result<Record, IdbError>> = walker.full_scan().collect();
        assert_eq!(items.len(), 13);
        assert!(matches!(items[12], Err(IdbError::CyclicTree { .. })));
    }

    #[test]
    fn test_find_index_roots() {
        let (mut ts, _layout, built) = tree(&(1..=30).collect::<Vec<_>>(), 4);
        let roots = find_index_roots(&mut ts).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].index_id, 50);
        assert_eq!(roots[0].root_page, built.root as u64);
        assert_eq!(clustered_index_root(&mut ts).unwrap().root_page, built.root as u64);
    }
}

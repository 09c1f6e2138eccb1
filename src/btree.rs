//! On-disk B-tree of records
//!
//! A classic B-tree of minimum degree `d`: every node but the root holds
//! between `d - 1` and `2d - 1` keys, and all leaves sit at the same depth.
//! Keys are record pointers ordered by a [`RecordComparator`]; the tree
//! never looks at what they point to.
//!
//! Node layout (one allocated record):
//!
//! ```text
//! [count: i32][keys: (2d-1) x u64][children: 2d x u64]
//! ```
//!
//! Key slots at or beyond `count` are null. A leaf has all children null.
//!
//! Insertion splits full nodes on the way down and deletion tops up thin
//! nodes on the way down, so neither ever has to walk back up.

use crate::chunk::Chunk;
use crate::comparator::RecordComparator;
use crate::database::{Database, RECORD_SIZE};
use crate::error::{Error, Record, Result};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

/// Largest supported minimum degree; a node of this degree fills a
/// maximum-size record exactly
pub const MAX_DEGREE: usize = 128;

/// Smallest supported minimum degree
pub const MIN_DEGREE: usize = 2;

/// Depth limit when walking a tree, guards against cyclic corruption
pub const MAX_TREE_DEPTH: usize = 64;

const COUNT: usize = 0;
const KEYS: usize = 4;

/// Guides and receives a traversal started by [`BTree::accept`]
pub trait BTreeVisitor {
    /// Order of `record` relative to what the visitor is looking for
    ///
    /// `Less` means the record sorts before the target range, `Greater`
    /// after it, `Equal` inside it.
    fn compare(&mut self, db: &Database, record: Record) -> Result<Ordering>;

    /// Receive a matching record; return false to stop the traversal
    fn visit(&mut self, db: &Database, record: Record) -> Result<bool>;
}

/// Visits every record in order
#[derive(Debug, Default)]
pub struct CollectAll {
    /// Records seen so far
    pub records: Vec<Record>,
}

impl BTreeVisitor for CollectAll {
    fn compare(&mut self, _db: &Database, _record: Record) -> Result<Ordering> {
        Ok(Ordering::Equal)
    }

    fn visit(&mut self, _db: &Database, record: Record) -> Result<bool> {
        self.records.push(record);
        Ok(true)
    }
}

/// Outcome of searching one node
enum Slot {
    Found(usize),
    Missing(usize),
}

/// View of one node record
#[derive(Clone)]
struct Node {
    record: Record,
    chunk: Arc<Chunk>,
    base: usize,
    children: usize,
}

impl Node {
    #[inline]
    fn raw_count(&self) -> i32 {
        self.chunk.get_i32(self.base + COUNT)
    }

    #[inline]
    fn count(&self) -> usize {
        self.raw_count() as usize
    }

    #[inline]
    fn set_count(&self, count: usize) {
        self.chunk.put_i32(self.base + COUNT, count as i32);
    }

    #[inline]
    fn key(&self, i: usize) -> Record {
        Record(self.chunk.get_u64(self.base + KEYS + i * RECORD_SIZE))
    }

    #[inline]
    fn set_key(&self, i: usize, key: Record) {
        self.chunk.put_u64(self.base + KEYS + i * RECORD_SIZE, key.0);
    }

    #[inline]
    fn child(&self, i: usize) -> Record {
        Record(self.chunk.get_u64(self.base + self.children + i * RECORD_SIZE))
    }

    #[inline]
    fn set_child(&self, i: usize, child: Record) {
        self.chunk.put_u64(self.base + self.children + i * RECORD_SIZE, child.0);
    }

    #[inline]
    fn is_leaf(&self) -> bool {
        self.child(0).is_null()
    }
}

/// Bookkeeping for an invariant check
struct Audit {
    report: String,
    leaf_depth: Option<usize>,
    seen: HashSet<Record>,
}

/// A B-tree whose root pointer lives at a fixed database offset
pub struct BTree<'db, C> {
    db: &'db Database,
    root_pointer: u64,
    degree: usize,
    comparator: C,
}

impl<'db, C: RecordComparator> BTree<'db, C> {
    /// Open the tree whose root pointer is stored at `root_pointer`
    ///
    /// A null root pointer is an empty tree. `degree` must lie within
    /// [`MIN_DEGREE`]`..=`[`MAX_DEGREE`] and must be the same every time
    /// the tree is opened.
    pub fn new(db: &'db Database, root_pointer: u64, degree: usize, comparator: C) -> Result<Self> {
        if !(MIN_DEGREE..=MAX_DEGREE).contains(&degree) {
            return Err(Error::InvalidParameter("B-tree degree must lie within 2..=128"));
        }
        Ok(Self { db, root_pointer, degree, comparator })
    }

    /// The database holding the tree
    pub fn database(&self) -> &'db Database {
        self.db
    }

    /// Minimum degree
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Offset of the root pointer
    pub fn root_pointer(&self) -> u64 {
        self.root_pointer
    }

    /// Current root node, null when the tree is empty
    pub fn root(&self) -> Result<Record> {
        self.db.get_record(self.root_pointer)
    }

    fn set_root(&self, root: Record) -> Result<()> {
        self.db.put_record(self.root_pointer, root)
    }

    #[inline]
    fn max_records(&self) -> usize {
        2 * self.degree - 1
    }

    #[inline]
    fn max_children(&self) -> usize {
        2 * self.degree
    }

    #[inline]
    fn children_offset(&self) -> usize {
        KEYS + self.max_records() * RECORD_SIZE
    }

    /// Size of a node record
    pub fn node_size(&self) -> usize {
        self.children_offset() + self.max_children() * RECORD_SIZE
    }

    /// View a node without validating it
    fn view(&self, record: Record) -> Result<Node> {
        let chunk = self.db.get_chunk(record.0)?;
        let base = (record.0 % crate::chunk::CHUNK_SIZE as u64) as usize;
        if base + self.node_size() > crate::chunk::CHUNK_SIZE {
            return Err(Error::corruption_at(record, "B-tree node crosses a chunk boundary"));
        }
        Ok(Node { record, chunk, base, children: self.children_offset() })
    }

    /// View a node, checking its key count
    fn node(&self, record: Record) -> Result<Node> {
        let node = self.view(record)?;
        let count = node.raw_count();
        if count < 0 || count as usize > self.max_records() {
            return Err(Error::corruption_at(record, format!("B-tree node holds {} keys", count)));
        }
        Ok(node)
    }

    fn alloc_node(&self) -> Result<Node> {
        let record = self.db.malloc(self.node_size())?;
        self.view(record)
    }

    fn search(&self, node: &Node, count: usize, record: Record) -> Result<Slot> {
        let (mut lo, mut hi) = (0, count);
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.comparator.compare(self.db, node.key(mid), record)? {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(Slot::Found(mid)),
            }
        }
        Ok(Slot::Missing(lo))
    }

    /// Insert `record`
    ///
    /// Returns the record now in the tree: `record` itself, or the equal
    /// record that was already present, in which case nothing changes.
    pub fn insert(&self, record: Record) -> Result<Record> {
        assert!(!record.is_null(), "cannot insert the null record into a B-tree");
        self.db.assert_writable();

        let root = self.root()?;
        if root.is_null() {
            let node = self.alloc_node()?;
            node.set_key(0, record);
            node.set_count(1);
            self.set_root(node.record)?;
            return Ok(record);
        }

        let mut node = self.node(root)?;
        if node.count() == self.max_records() {
            // Split the root first: the tree grows by one level
            let new_root = self.alloc_node()?;
            new_root.set_child(0, node.record);
            self.split_child(&new_root, 0, &node)?;
            self.set_root(new_root.record)?;
            node = new_root;
        }

        loop {
            let count = node.count();
            let mut i = match self.search(&node, count, record)? {
                Slot::Found(i) => return Ok(node.key(i)),
                Slot::Missing(i) => i,
            };

            if node.is_leaf() {
                for j in (i..count).rev() {
                    node.set_key(j + 1, node.key(j));
                }
                node.set_key(i, record);
                node.set_count(count + 1);
                return Ok(record);
            }

            let mut child = self.node(node.child(i))?;
            if child.count() == self.max_records() {
                self.split_child(&node, i, &child)?;
                match self.comparator.compare(self.db, node.key(i), record)? {
                    Ordering::Equal => return Ok(node.key(i)),
                    Ordering::Less => {
                        i += 1;
                        child = self.node(node.child(i))?;
                    }
                    Ordering::Greater => {}
                }
            }
            node = child;
        }
    }

    /// Split the full `child`, the `i`th child of `parent`, moving its
    /// median up into `parent`
    fn split_child(&self, parent: &Node, i: usize, child: &Node) -> Result<()> {
        let d = self.degree;
        let sibling = self.alloc_node()?;
        let leaf = child.is_leaf();

        for j in 0..d - 1 {
            sibling.set_key(j, child.key(j + d));
            child.set_key(j + d, Record::NULL);
        }
        if !leaf {
            for j in 0..d {
                sibling.set_child(j, child.child(j + d));
                child.set_child(j + d, Record::NULL);
            }
        }
        sibling.set_count(d - 1);

        let median = child.key(d - 1);
        child.set_key(d - 1, Record::NULL);
        child.set_count(d - 1);

        let count = parent.count();
        for j in (i..count).rev() {
            parent.set_key(j + 1, parent.key(j));
        }
        for j in (i + 1..=count).rev() {
            parent.set_child(j + 1, parent.child(j));
        }
        parent.set_key(i, median);
        parent.set_child(i + 1, sibling.record);
        parent.set_count(count + 1);
        Ok(())
    }

    /// Remove the record equal to `record`
    ///
    /// Returns whether a record was removed. The removed record itself is
    /// not freed.
    pub fn delete(&self, record: Record) -> Result<bool> {
        self.db.assert_writable();

        let root = self.root()?;
        if root.is_null() {
            return Ok(false);
        }

        let root = self.node(root)?;
        let found = self.delete_from(&root, record)?;

        if root.count() == 0 {
            // Root emptied: its only child (or nothing) takes over
            self.set_root(root.child(0))?;
            self.db.free(root.record)?;
        }
        Ok(found)
    }

    fn delete_from(&self, start: &Node, mut record: Record) -> Result<bool> {
        let d = self.degree;
        let mut node = start.clone();

        loop {
            let count = node.count();
            let slot = self.search(&node, count, record)?;

            if node.is_leaf() {
                let Slot::Found(i) = slot else {
                    return Ok(false);
                };
                for j in i + 1..count {
                    node.set_key(j - 1, node.key(j));
                }
                node.set_key(count - 1, Record::NULL);
                node.set_count(count - 1);
                return Ok(true);
            }

            match slot {
                Slot::Found(i) => {
                    let left = self.node(node.child(i))?;
                    if left.count() >= d {
                        // Replace with the predecessor, then delete that
                        let pred = self.last_key(&left)?;
                        node.set_key(i, pred);
                        record = pred;
                        node = left;
                        continue;
                    }
                    let right = self.node(node.child(i + 1))?;
                    if right.count() >= d {
                        let succ = self.first_key(&right)?;
                        node.set_key(i, succ);
                        record = succ;
                        node = right;
                        continue;
                    }
                    // Both thin: pull the key down into a merged node
                    self.merge_children(&node, i, &left, &right)?;
                    node = left;
                }
                Slot::Missing(i) => {
                    let child = self.node(node.child(i))?;
                    node = if child.count() < d { self.fill_child(&node, i, child)? } else { child };
                }
            }
        }
    }

    /// Largest key in the subtree rooted at `node`
    fn last_key(&self, node: &Node) -> Result<Record> {
        let mut node = node.clone();
        while !node.is_leaf() {
            node = self.node(node.child(node.count()))?;
        }
        Ok(node.key(node.count() - 1))
    }

    /// Smallest key in the subtree rooted at `node`
    fn first_key(&self, node: &Node) -> Result<Record> {
        let mut node = node.clone();
        while !node.is_leaf() {
            node = self.node(node.child(0))?;
        }
        Ok(node.key(0))
    }

    /// Give the `i`th child of `parent` at least `d` keys, borrowing from
    /// a sibling or merging with one. Returns the node to descend into.
    fn fill_child(&self, parent: &Node, i: usize, child: Node) -> Result<Node> {
        let d = self.degree;
        let count = parent.count();

        if i > 0 {
            let left = self.node(parent.child(i - 1))?;
            if left.count() >= d {
                self.borrow_from_left(parent, i, &left, &child);
                return Ok(child);
            }
        }
        if i < count {
            let right = self.node(parent.child(i + 1))?;
            if right.count() >= d {
                self.borrow_from_right(parent, i, &child, &right);
                return Ok(child);
            }
            self.merge_children(parent, i, &child, &right)?;
            return Ok(child);
        }

        let left = self.node(parent.child(i - 1))?;
        self.merge_children(parent, i - 1, &left, &child)?;
        Ok(left)
    }

    /// Rotate the last key of `left` through `parent` into `child`
    fn borrow_from_left(&self, parent: &Node, i: usize, left: &Node, child: &Node) {
        let c = child.count();
        let l = left.count();
        let leaf = child.is_leaf();

        for j in (0..c).rev() {
            child.set_key(j + 1, child.key(j));
        }
        if !leaf {
            for j in (0..=c).rev() {
                child.set_child(j + 1, child.child(j));
            }
            child.set_child(0, left.child(l));
            left.set_child(l, Record::NULL);
        }
        child.set_key(0, parent.key(i - 1));
        child.set_count(c + 1);

        parent.set_key(i - 1, left.key(l - 1));
        left.set_key(l - 1, Record::NULL);
        left.set_count(l - 1);
    }

    /// Rotate the first key of `right` through `parent` into `child`
    fn borrow_from_right(&self, parent: &Node, i: usize, child: &Node, right: &Node) {
        let c = child.count();
        let r = right.count();
        let leaf = child.is_leaf();

        child.set_key(c, parent.key(i));
        if !leaf {
            child.set_child(c + 1, right.child(0));
        }
        child.set_count(c + 1);

        parent.set_key(i, right.key(0));
        for j in 1..r {
            right.set_key(j - 1, right.key(j));
        }
        right.set_key(r - 1, Record::NULL);
        if !leaf {
            for j in 1..=r {
                right.set_child(j - 1, right.child(j));
            }
            right.set_child(r, Record::NULL);
        }
        right.set_count(r - 1);
    }

    /// Merge `right` and key `i` of `parent` into `left`, freeing `right`
    fn merge_children(&self, parent: &Node, i: usize, left: &Node, right: &Node) -> Result<()> {
        let l = left.count();
        let r = right.count();
        let leaf = left.is_leaf();

        left.set_key(l, parent.key(i));
        for j in 0..r {
            left.set_key(l + 1 + j, right.key(j));
        }
        if !leaf {
            for j in 0..=r {
                left.set_child(l + 1 + j, right.child(j));
            }
        }
        left.set_count(l + 1 + r);

        let count = parent.count();
        for j in i + 1..count {
            parent.set_key(j - 1, parent.key(j));
        }
        parent.set_key(count - 1, Record::NULL);
        for j in i + 2..=count {
            parent.set_child(j - 1, parent.child(j));
        }
        parent.set_child(count, Record::NULL);
        parent.set_count(count - 1);

        self.db.free(right.record)
    }

    /// Walk the records the visitor selects, in order
    ///
    /// Subtrees entirely before the visitor's range are skipped. The walk
    /// ends at the first record past the range or when `visit` returns
    /// false.
    pub fn accept<V: BTreeVisitor + ?Sized>(&self, visitor: &mut V) -> Result<()> {
        let root = self.root()?;
        self.accept_node(root, visitor, 0)?;
        Ok(())
    }

    /// Returns false once the walk is over, either because `visit` asked to
    /// stop or because a record past the range was seen
    fn accept_node<V: BTreeVisitor + ?Sized>(&self, record: Record, visitor: &mut V, depth: usize) -> Result<bool> {
        if record.is_null() {
            return Ok(true);
        }
        if depth > MAX_TREE_DEPTH {
            return Err(Error::corruption_at(record, "B-tree deeper than the depth limit"));
        }

        let node = self.node(record)?;
        let count = node.count();

        // First key not before the range
        let (mut lo, mut hi) = (0, count);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if visitor.compare(self.db, node.key(mid))? == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        for i in lo..count {
            let key = node.key(i);
            match visitor.compare(self.db, key)? {
                Ordering::Greater => {
                    self.accept_node(node.child(i), visitor, depth + 1)?;
                    return Ok(false);
                }
                Ordering::Equal => {
                    if !self.accept_node(node.child(i), visitor, depth + 1)? {
                        return Ok(false);
                    }
                    if !visitor.visit(self.db, key)? {
                        return Ok(false);
                    }
                }
                Ordering::Less => {}
            }
        }
        self.accept_node(node.child(count), visitor, depth + 1)
    }

    /// All records in order
    pub fn records(&self) -> Result<Vec<Record>> {
        let mut all = CollectAll::default();
        self.accept(&mut all)?;
        Ok(all.records)
    }

    /// Number of records
    pub fn len(&self) -> Result<usize> {
        Ok(self.records()?.len())
    }

    /// Whether the tree holds no records
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.root()?.is_null())
    }

    /// Find the record equal to `probe`
    pub fn find(&self, probe: Record) -> Result<Option<Record>> {
        let mut record = self.root()?;
        let mut depth = 0;
        while !record.is_null() {
            if depth > MAX_TREE_DEPTH {
                return Err(Error::corruption_at(record, "B-tree deeper than the depth limit"));
            }
            let node = self.node(record)?;
            match self.search(&node, node.count(), probe)? {
                Slot::Found(i) => return Ok(Some(node.key(i))),
                Slot::Missing(i) => record = node.child(i),
            }
            depth += 1;
        }
        Ok(None)
    }

    /// Free every node and empty the tree; the records are not freed
    pub fn destroy(&self) -> Result<()> {
        self.db.assert_writable();
        let root = self.root()?;
        self.free_subtree(root, 0)?;
        self.set_root(Record::NULL)
    }

    fn free_subtree(&self, record: Record, depth: usize) -> Result<()> {
        if record.is_null() {
            return Ok(());
        }
        if depth > MAX_TREE_DEPTH {
            return Err(Error::corruption_at(record, "B-tree deeper than the depth limit"));
        }
        let node = self.node(record)?;
        if !node.is_leaf() {
            for i in 0..=node.count() {
                self.free_subtree(node.child(i), depth + 1)?;
            }
        }
        self.db.free(record)
    }

    /// Describe every structural problem found in the tree
    ///
    /// Returns an empty string for a healthy tree. Only failures to read
    /// the database are returned as errors.
    pub fn invariants_error_report(&self) -> Result<String> {
        let root = self.root()?;
        let mut audit = Audit { report: String::new(), leaf_depth: None, seen: HashSet::new() };
        if !root.is_null() {
            self.audit_node(root, 0, None, None, &mut audit)?;
        }
        Ok(audit.report)
    }

    fn audit_node(
        &self,
        record: Record,
        depth: usize,
        lower: Option<Record>,
        upper: Option<Record>,
        audit: &mut Audit,
    ) -> Result<()> {
        // Writing to a String cannot fail
        macro_rules! problem {
            ($($arg:tt)*) => {
                let _ = writeln!(audit.report, $($arg)*);
            };
        }

        if !audit.seen.insert(record) {
            problem!("node {} is reachable more than once", record);
            return Ok(());
        }
        if depth > MAX_TREE_DEPTH {
            problem!("node {} lies deeper than {}", record, MAX_TREE_DEPTH);
            return Ok(());
        }

        let node = self.view(record)?;
        let raw = node.raw_count();
        if raw < 0 || raw as usize > self.max_records() {
            problem!("node {} has key count {} outside 0..={}", record, raw, self.max_records());
            return Ok(());
        }
        let count = raw as usize;

        let minimum = if depth == 0 { 1 } else { self.degree - 1 };
        if count < minimum {
            problem!("node {} holds {} keys, fewer than the minimum {}", record, count, minimum);
        }

        for i in 0..count {
            if node.key(i).is_null() {
                problem!("node {} has a null key in slot {}", record, i);
            }
        }
        for i in count..self.max_records() {
            if !node.key(i).is_null() {
                problem!("node {} has a key in unused slot {}", record, i);
            }
        }

        for i in 1..count {
            let (a, b) = (node.key(i - 1), node.key(i));
            if a.is_null() || b.is_null() {
                continue;
            }
            if self.comparator.compare(self.db, a, b)? != Ordering::Less {
                problem!("node {} keys {} and {} are out of order", record, i - 1, i);
            }
        }

        if count > 0 {
            let (first, last) = (node.key(0), node.key(count - 1));
            if let Some(lower) = lower {
                if !first.is_null() && self.comparator.compare(self.db, lower, first)? != Ordering::Less {
                    problem!("node {} key {} is not above its lower bound {}", record, first, lower);
                }
            }
            if let Some(upper) = upper {
                if !last.is_null() && self.comparator.compare(self.db, last, upper)? != Ordering::Less {
                    problem!("node {} key {} is not below its upper bound {}", record, last, upper);
                }
            }
        }

        if node.is_leaf() {
            for i in 1..self.max_children() {
                if !node.child(i).is_null() {
                    problem!("leaf {} has a child in slot {}", record, i);
                }
            }
            match audit.leaf_depth {
                None => audit.leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    problem!("leaf {} is at depth {} but other leaves are at depth {}", record, depth, expected);
                }
                Some(_) => {}
            }
            return Ok(());
        }

        for i in count + 1..self.max_children() {
            if !node.child(i).is_null() {
                problem!("node {} has a child in unused slot {}", record, i);
            }
        }
        for i in 0..=count {
            let child = node.child(i);
            if child.is_null() {
                problem!("node {} is missing child {}", record, i);
                continue;
            }
            let lo = if i == 0 { lower } else { Some(node.key(i - 1)) };
            let hi = if i == count { upper } else { Some(node.key(i)) };
            self.audit_node(child, depth + 1, lo, hi, audit)?;
        }
        Ok(())
    }
}

impl<C> std::fmt::Debug for BTree<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree").field("root_pointer", &self.root_pointer).field("degree", &self.degree).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::LongComparator;
    use crate::database::DATA_AREA;
    use tempfile::TempDir;

    fn scratch(dir: &TempDir) -> Database {
        Database::builder().exclusive(true).open(dir.path().join("btree.pdom")).unwrap()
    }

    fn long_record(db: &Database, value: i64) -> Record {
        let record = db.malloc(8).unwrap();
        db.put_long(record.0, value).unwrap();
        record
    }

    fn values(db: &Database, tree: &BTree<'_, LongComparator>) -> Vec<i64> {
        tree.records().unwrap().into_iter().map(|r| db.get_long(r.0).unwrap()).collect()
    }

    #[test]
    fn test_degree_bounds() {
        let dir = TempDir::new().unwrap();
        let db = scratch(&dir);
        assert!(matches!(BTree::new(&db, DATA_AREA, 1, LongComparator), Err(Error::InvalidParameter(_))));
        assert!(matches!(BTree::new(&db, DATA_AREA, 129, LongComparator), Err(Error::InvalidParameter(_))));

        let widest = BTree::new(&db, DATA_AREA, MAX_DEGREE, LongComparator).unwrap();
        assert_eq!(widest.node_size(), crate::database::MAX_MALLOC_SIZE);
    }

    #[test]
    fn test_insert_splits_root() {
        let dir = TempDir::new().unwrap();
        let db = scratch(&dir);
        let tree = BTree::new(&db, DATA_AREA, 2, LongComparator).unwrap();

        for v in [5, 1, 9] {
            tree.insert(long_record(&db, v)).unwrap();
        }
        let first_root = tree.root().unwrap();
        tree.insert(long_record(&db, 3)).unwrap();
        assert_ne!(tree.root().unwrap(), first_root);

        assert_eq!(values(&db, &tree), vec![1, 3, 5, 9]);
        assert_eq!(tree.invariants_error_report().unwrap(), "");
    }

    #[test]
    fn test_insert_returns_existing() {
        let dir = TempDir::new().unwrap();
        let db = scratch(&dir);
        let tree = BTree::new(&db, DATA_AREA, 3, LongComparator).unwrap();

        let original = long_record(&db, 42);
        assert_eq!(tree.insert(original).unwrap(), original);
        let duplicate = long_record(&db, 42);
        assert_eq!(tree.insert(duplicate).unwrap(), original);
        assert_eq!(tree.len().unwrap(), 1);
        assert_eq!(tree.find(duplicate).unwrap(), Some(original));
    }

    #[test]
    fn test_delete_to_empty_frees_nodes() {
        let dir = TempDir::new().unwrap();
        let db = scratch(&dir);
        let tree = BTree::new(&db, DATA_AREA, 2, LongComparator).unwrap();

        let records: Vec<Record> = (0..50).map(|v| long_record(&db, v)).collect();
        let before = db.alloc_stats().in_use();
        for &r in &records {
            tree.insert(r).unwrap();
        }
        for &r in records.iter().rev() {
            assert!(tree.delete(r).unwrap());
            assert_eq!(tree.invariants_error_report().unwrap(), "");
        }
        assert!(tree.root().unwrap().is_null());
        assert_eq!(db.alloc_stats().in_use(), before);
        assert!(!tree.delete(records[0]).unwrap());
    }

    #[test]
    fn test_report_flags_unsorted_leaf() {
        let dir = TempDir::new().unwrap();
        let db = scratch(&dir);
        let tree = BTree::new(&db, DATA_AREA, 3, LongComparator).unwrap();
        for v in [1, 2, 3] {
            tree.insert(long_record(&db, v)).unwrap();
        }

        // Swap the first two keys behind the tree's back
        let root = tree.root().unwrap();
        let a = db.get_record(root.offset(KEYS)).unwrap();
        let b = db.get_record(root.offset(KEYS + RECORD_SIZE)).unwrap();
        db.put_record(root.offset(KEYS), b).unwrap();
        db.put_record(root.offset(KEYS + RECORD_SIZE), a).unwrap();

        let report = tree.invariants_error_report().unwrap();
        assert!(report.contains("out of order"), "{}", report);
    }

    #[test]
    fn test_point_query_stops_past_range() {
        /// Once a key past the target is seen the walk may only go left of
        /// it, so comparing a larger key means an ancestor resumed its scan
        struct Exactly {
            target: i64,
            least_greater: Option<i64>,
            resumed: usize,
            seen: Vec<i64>,
        }
        impl BTreeVisitor for Exactly {
            fn compare(&mut self, db: &Database, record: Record) -> Result<Ordering> {
                let value = db.get_long(record.0)?;
                if self.least_greater.is_some_and(|g| value > g) {
                    self.resumed += 1;
                }
                if value > self.target {
                    self.least_greater = Some(value);
                }
                Ok(value.cmp(&self.target))
            }
            fn visit(&mut self, db: &Database, record: Record) -> Result<bool> {
                self.seen.push(db.get_long(record.0)?);
                Ok(true)
            }
        }

        let dir = TempDir::new().unwrap();
        let db = scratch(&dir);
        let tree = BTree::new(&db, DATA_AREA, 2, LongComparator).unwrap();
        for v in 0..1000 {
            tree.insert(long_record(&db, v)).unwrap();
        }

        for target in [0, 333, 500, 998, 999] {
            let mut query = Exactly { target, least_greater: None, resumed: 0, seen: Vec::new() };
            tree.accept(&mut query).unwrap();
            assert_eq!(query.seen, vec![target]);
            assert_eq!(query.resumed, 0, "walk for {} continued past the range", target);
        }
    }
}

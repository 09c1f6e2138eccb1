//! B-tree tests: ordered traversal, deletion, and randomized trials
//! checked against a standard ordered map

use pdomdb::comparator::LongComparator;
use pdomdb::{BTree, BTreeVisitor, Database, Error, Record, Result, StringComparator, DATA_AREA};
use quickcheck_macros::quickcheck;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tempfile::TempDir;

const HURRICANES: [&str; 23] = [
    "Alberto", "Beryl", "Chris", "Debby", "Ernesto", "Florence", "Gordon", "Helene", "Isaac", "Joyce", "Kirk",
    "Leslie", "Michael", "Nadine", "Oscar", "Patty", "Rafael", "Sara", "Tony", "Valerie", "William", "Xavier",
    "Yolanda",
];

fn scratch(dir: &TempDir) -> Result<Database> {
    Database::builder().exclusive(true).open(dir.path().join("btree.pdom"))
}

fn long_record(db: &Database, value: i64) -> Result<Record> {
    let record = db.malloc(8)?;
    db.put_long(record.0, value)?;
    Ok(record)
}

/// Collects strings in `[from, to)`
struct Range<'a> {
    from: &'a str,
    to: &'a str,
    seen: Vec<String>,
}

impl BTreeVisitor for Range<'_> {
    fn compare(&mut self, db: &Database, record: Record) -> Result<Ordering> {
        let s = db.string(record);
        if s.compare(self.from)? == Ordering::Less {
            Ok(Ordering::Less)
        } else if s.compare(self.to)? != Ordering::Less {
            Ok(Ordering::Greater)
        } else {
            Ok(Ordering::Equal)
        }
    }

    fn visit(&mut self, db: &Database, record: Record) -> Result<bool> {
        self.seen.push(db.get_string(record)?);
        Ok(true)
    }
}

#[test]
fn test_hurricane_names_in_order() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = scratch(&dir)?;
    let tree = BTree::new(&db, DATA_AREA, 2, StringComparator)?;

    // Insert in a scrambled but fixed order
    for i in 0..HURRICANES.len() {
        let name = HURRICANES[(i * 7) % HURRICANES.len()];
        tree.insert(db.put_string(name)?)?;
    }
    assert_eq!(tree.invariants_error_report()?, "");

    let all: Vec<String> = tree.records()?.into_iter().map(|r| db.get_string(r)).collect::<Result<_>>()?;
    assert_eq!(all, HURRICANES);

    let mut range = Range { from: "Gordon", to: "Oscar", seen: Vec::new() };
    tree.accept(&mut range)?;
    assert_eq!(range.seen, ["Gordon", "Helene", "Isaac", "Joyce", "Kirk", "Leslie", "Michael", "Nadine"]);

    // Deleting every other name leaves a valid tree with the rest
    for name in HURRICANES.iter().step_by(2) {
        let probe = db.put_string(name)?;
        assert!(tree.delete(probe)?, "{} not found", name);
        db.string(probe).delete()?;
        assert_eq!(tree.invariants_error_report()?, "");
    }
    let rest: Vec<String> = tree.records()?.into_iter().map(|r| db.get_string(r)).collect::<Result<_>>()?;
    let expected: Vec<&str> = HURRICANES.iter().skip(1).step_by(2).copied().collect();
    assert_eq!(rest, expected);
    Ok(())
}

/// Record layout for the scenario: `[index: i32][name: u64]`
const INDEX: usize = 0;
const NAME: usize = 4;

fn name_of(db: &Database, record: Record) -> Result<Record> {
    db.get_record(record.offset(NAME))
}

fn by_name(db: &Database, a: Record, b: Record) -> Result<Ordering> {
    db.string(name_of(db, a)?).compare_to(&db.string(name_of(db, b)?))
}

/// Finds the record whose name equals `target`
struct FindByName<'a> {
    target: &'a str,
    found: Option<Record>,
}

impl BTreeVisitor for FindByName<'_> {
    fn compare(&mut self, db: &Database, record: Record) -> Result<Ordering> {
        db.string(name_of(db, record)?).compare(self.target)
    }

    fn visit(&mut self, _db: &Database, record: Record) -> Result<bool> {
        self.found = Some(record);
        Ok(false)
    }
}

#[test]
fn test_hurricane_records_found_by_name() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = scratch(&dir)?;
    let tree = BTree::new(&db, DATA_AREA, 3, by_name)?;

    // Insert in reverse so insertion index and name order disagree
    for (i, name) in HURRICANES.iter().rev().enumerate() {
        let record = db.malloc(12)?;
        db.put_int(record.offset(INDEX), i as i32)?;
        db.put_record(record.offset(NAME), db.put_string(name)?)?;
        tree.insert(record)?;
    }
    assert_eq!(tree.invariants_error_report()?, "");

    for (i, name) in HURRICANES.iter().rev().enumerate() {
        let mut finder = FindByName { target: name, found: None };
        tree.accept(&mut finder)?;
        let record = finder.found.unwrap_or_else(|| panic!("{} not found", name));
        assert_eq!(db.get_int(record.offset(INDEX))?, i as i32);
        assert_eq!(db.get_string(name_of(&db, record)?)?, *name);
    }

    let mut finder = FindByName { target: "Kirk", found: None };
    tree.accept(&mut finder)?;
    assert!(tree.delete(finder.found.unwrap())?);

    let names: Vec<String> =
        tree.records()?.into_iter().map(|r| db.get_string(name_of(&db, r)?)).collect::<Result<_>>()?;
    let expected: Vec<&str> = HURRICANES.iter().copied().filter(|n| *n != "Kirk").collect();
    assert_eq!(names, expected);
    Ok(())
}

#[test]
fn test_visitor_can_stop_early() -> Result<()> {
    struct FirstN(usize, Vec<i64>);
    impl BTreeVisitor for FirstN {
        fn compare(&mut self, _db: &Database, _record: Record) -> Result<Ordering> {
            Ok(Ordering::Equal)
        }
        fn visit(&mut self, db: &Database, record: Record) -> Result<bool> {
            self.1.push(db.get_long(record.0)?);
            Ok(self.1.len() < self.0)
        }
    }

    let dir = TempDir::new().unwrap();
    let db = scratch(&dir)?;
    let tree = BTree::new(&db, DATA_AREA, 3, LongComparator)?;
    for v in (0..200).rev() {
        tree.insert(long_record(&db, v)?)?;
    }

    let mut first = FirstN(5, Vec::new());
    tree.accept(&mut first)?;
    assert_eq!(first.1, vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_comparator_errors_propagate() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = scratch(&dir)?;
    let failing = |_: &Database, _: Record, _: Record| -> Result<Ordering> { Err(Error::Custom("no order".into())) };
    let tree = BTree::new(&db, DATA_AREA, 2, failing)?;

    tree.insert(long_record(&db, 1)?)?;
    let err = tree.insert(long_record(&db, 2)?).unwrap_err();
    assert!(matches!(err, Error::Custom(ref msg) if msg == "no order"));
    Ok(())
}

#[test]
fn test_destroy_frees_all_nodes() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = scratch(&dir)?;
    let tree = BTree::new(&db, DATA_AREA, 4, LongComparator)?;

    let records: Vec<Record> = (0..300).map(|v| long_record(&db, v)).collect::<Result<_>>()?;
    let before = db.alloc_stats().in_use();
    for &r in &records {
        tree.insert(r)?;
    }
    assert!(db.alloc_stats().in_use() > before);

    tree.destroy()?;
    assert!(tree.is_empty()?);
    assert_eq!(db.alloc_stats().in_use(), before);
    Ok(())
}

#[test]
fn test_tree_survives_reopen() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reopen.pdom");
    {
        let db = Database::builder().exclusive(true).open(&path)?;
        let tree = BTree::new(&db, DATA_AREA, 5, LongComparator)?;
        for v in 0..1000 {
            tree.insert(long_record(&db, v * 3)?)?;
        }
        db.close()?;
    }

    let db = Database::builder().exclusive(true).open(&path)?;
    let tree = BTree::new(&db, DATA_AREA, 5, LongComparator)?;
    assert_eq!(tree.len()?, 1000);
    assert_eq!(tree.invariants_error_report()?, "");
    let probe = long_record(&db, 999)?;
    let found = tree.find(probe)?.expect("999 was inserted");
    assert_eq!(db.get_long(found.0)?, 999);
    Ok(())
}

/// One randomized trial against an ordered map
///
/// In strong mode the tree is audited after every operation, otherwise only
/// at the end.
fn random_trial(seed: u64, degree: usize, operations: usize, strong: bool) -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = scratch(&dir)?;
    let tree = BTree::new(&db, DATA_AREA, degree, LongComparator)?;
    let mut model: BTreeMap<i64, Record> = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(seed);

    for step in 0..operations {
        let value = rng.gen_range(0..400);
        if rng.gen_bool(0.6) {
            let record = long_record(&db, value)?;
            let stored = tree.insert(record)?;
            match model.get(&value) {
                Some(&existing) => {
                    assert_eq!(stored, existing, "seed {} step {}", seed, step);
                    db.free(record)?;
                }
                None => {
                    assert_eq!(stored, record, "seed {} step {}", seed, step);
                    model.insert(value, record);
                }
            }
        } else {
            let probe = long_record(&db, value)?;
            let removed = tree.delete(probe)?;
            assert_eq!(removed, model.remove(&value).is_some(), "seed {} step {}", seed, step);
            db.free(probe)?;
        }

        if strong {
            let report = tree.invariants_error_report()?;
            assert!(report.is_empty(), "seed {} degree {} step {}:\n{}", seed, degree, step, report);
        }
    }

    let report = tree.invariants_error_report()?;
    assert!(report.is_empty(), "seed {} degree {}:\n{}", seed, degree, report);
    assert_eq!(tree.records()?, model.values().copied().collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_random_trials_weak() -> Result<()> {
    for degree in 2..=12 {
        for seed in 0..4 {
            random_trial(seed * 100 + degree as u64, degree, 2000, false)?;
        }
    }
    Ok(())
}

#[test]
fn test_random_trials_strong() -> Result<()> {
    for degree in 2..=12 {
        random_trial(7 + degree as u64, degree, 400, true)?;
    }
    Ok(())
}

#[test]
fn test_large_tree() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = scratch(&dir)?;
    let tree = BTree::new(&db, DATA_AREA, 8, LongComparator)?;
    let mut rng = StdRng::seed_from_u64(0x5eed);

    const COUNT: i64 = 100_000;
    let mut values: Vec<i64> = (0..COUNT).collect();
    for i in (1..values.len()).rev() {
        values.swap(i, rng.gen_range(0..=i));
    }
    for &v in &values {
        tree.insert(long_record(&db, v)?)?;
    }
    assert_eq!(tree.invariants_error_report()?, "");

    let stored: Vec<i64> = tree.records()?.into_iter().map(|r| db.get_long(r.0)).collect::<Result<_>>()?;
    assert_eq!(stored.len(), COUNT as usize);
    assert!(stored.windows(2).all(|w| w[0] < w[1]));

    // Remove the odd half
    for &v in values.iter().filter(|v| *v % 2 == 1) {
        let probe = long_record(&db, v)?;
        assert!(tree.delete(probe)?);
        db.free(probe)?;
    }
    assert_eq!(tree.invariants_error_report()?, "");
    assert_eq!(tree.len()?, COUNT as usize / 2);
    Ok(())
}

#[test]
fn test_degree_out_of_range() {
    let dir = TempDir::new().unwrap();
    let db = scratch(&dir).unwrap();
    assert!(matches!(BTree::new(&db, DATA_AREA, 0, LongComparator), Err(Error::InvalidParameter(_))));
    assert!(matches!(BTree::new(&db, DATA_AREA, 1000, LongComparator), Err(Error::InvalidParameter(_))));
}

#[quickcheck]
fn prop_tree_matches_ordered_set(inserts: Vec<u8>, deletes: Vec<u8>) -> bool {
    let dir = TempDir::new().unwrap();
    let db = scratch(&dir).unwrap();
    let tree = BTree::new(&db, DATA_AREA, 2, LongComparator).unwrap();
    let mut model = std::collections::BTreeSet::new();

    for v in inserts {
        tree.insert(long_record(&db, v as i64).unwrap()).unwrap();
        model.insert(v as i64);
    }
    for v in deletes {
        let probe = long_record(&db, v as i64).unwrap();
        if tree.delete(probe).unwrap() != model.remove(&(v as i64)) {
            return false;
        }
    }

    let stored: Vec<i64> = tree.records().unwrap().into_iter().map(|r| db.get_long(r.0).unwrap()).collect();
    tree.invariants_error_report().unwrap().is_empty() && stored == model.into_iter().collect::<Vec<_>>()
}

use super::*;
use sprout_core::types::{ArchSpec, CompilerSpec, DepTypes, DependencyEdge, Version};
use std::sync::Arc;
use tempfile::TempDir;

fn node(name: &str, version: &str, deps: Vec<Arc<Spec>>) -> Arc<Spec> {
    Spec::concrete(
        name,
        Version::parse(version).unwrap(),
        BTreeMap::new(),
        CompilerSpec::concrete("gcc", Version::parse("12").unwrap(), None),
        ArchSpec::new("linux", "test", "x86_64"),
        deps.into_iter()
            .map(|d| DependencyEdge::new(d, DepTypes::default()))
            .collect(),
    )
    .unwrap()
}

struct Fixture {
    _temp: TempDir,
    root: Utf8PathBuf,
    db: InstallDatabase,
}

fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let db = InstallDatabase::open(root.join("db")).unwrap();
    Fixture { _temp: temp, root, db }
}

fn record(fx: &Fixture, spec: &Spec, explicit: bool) -> InstallRecord {
    let prefix = fx.root.join(format!("{}-{}", spec.name, spec.hash().unwrap().short()));
    fs::create_dir_all(&prefix).unwrap();
    InstallRecord::new(spec, prefix, explicit).unwrap()
}

#[test]
fn test_add_and_lookup() {
    let fx = fixture();
    let zlib = node("zlib", "1.3", vec![]);
    fx.db.add(record(&fx, &zlib, true)).unwrap();

    let hash = zlib.hash().unwrap();
    let found = fx.db.get(&hash).unwrap();
    assert_eq!(found.name, "zlib");
    assert_eq!(found.version, "1.3");
    assert!(found.explicit);
    assert!(fx.db.get_verified(&hash).is_some());
    assert_eq!(fx.db.find_by_name("zlib").len(), 1);
    assert_eq!(fx.db.find_by_hash_prefix(&hash.short()).len(), 1);
    assert!(fx.db.find_by_name("libpng").is_empty());
}

#[test]
fn test_verified_lookup_requires_prefix() {
    let fx = fixture();
    let zlib = node("zlib", "1.3", vec![]);
    let rec = record(&fx, &zlib, false);
    let prefix = rec.prefix.clone();
    fx.db.add(rec).unwrap();

    fs::remove_dir_all(&prefix).unwrap();
    let hash = zlib.hash().unwrap();
    assert!(fx.db.get(&hash).is_some());
    assert!(fx.db.get_verified(&hash).is_none());
}

#[test]
fn test_reference_counts() {
    let fx = fixture();
    let zlib = node("zlib", "1.3", vec![]);
    let png = node("libpng", "1.6", vec![zlib.clone()]);
    let tiff = node("libtiff", "4.5", vec![zlib.clone()]);
    let zhash = zlib.hash().unwrap();

    fx.db.add(record(&fx, &zlib, false)).unwrap();
    fx.db.add(record(&fx, &png, true)).unwrap();
    fx.db.add(record(&fx, &tiff, true)).unwrap();
    assert_eq!(fx.db.get(&zhash).unwrap().ref_count, 2);
    assert_eq!(fx.db.dependents(&zhash).len(), 2);

    // re-adding is not a new reference
    fx.db.add(record(&fx, &png, true)).unwrap();
    assert_eq!(fx.db.get(&zhash).unwrap().ref_count, 2);

    let removed = fx.db.remove(&png.hash().unwrap()).unwrap().unwrap();
    assert_eq!(removed.name, "libpng");
    assert_eq!(fx.db.get(&zhash).unwrap().ref_count, 1);
    assert!(fx.db.remove(&png.hash().unwrap()).unwrap().is_none());
}

#[test]
fn test_mark_explicit() {
    let fx = fixture();
    let zlib = node("zlib", "1.3", vec![]);
    fx.db.add(record(&fx, &zlib, false)).unwrap();
    fx.db.mark_explicit(&zlib.hash().unwrap()).unwrap();
    assert!(fx.db.get(&zlib.hash().unwrap()).unwrap().explicit);
}

#[test]
fn test_persistence_across_handles() {
    let fx = fixture();
    let zlib = node("zlib", "1.3", vec![]);
    fx.db.add(record(&fx, &zlib, true)).unwrap();

    let other = InstallDatabase::open(fx.root.join("db")).unwrap();
    assert_eq!(other.len(), 1);
    assert_eq!(other.get(&zlib.hash().unwrap()).unwrap(), fx.db.get(&zlib.hash().unwrap()).unwrap());
}

#[test]
fn test_writers_do_not_clobber_each_other() {
    let fx = fixture();
    let other = InstallDatabase::open(fx.root.join("db")).unwrap();
    let zlib = node("zlib", "1.3", vec![]);
    let bzip = node("bzip2", "1.0.8", vec![]);

    fx.db.add(record(&fx, &zlib, true)).unwrap();
    // `other` has a stale cache but writes through the on-disk index
    other.add(record(&fx, &bzip, true)).unwrap();

    fx.db.refresh().unwrap();
    assert_eq!(fx.db.len(), 2);
    assert_eq!(other.len(), 2);
}

#[test]
fn test_corrupt_index_is_reported() {
    let fx = fixture();
    fs::write(fx.db.index_path(), "{ not json").unwrap();
    assert!(matches!(fx.db.refresh().unwrap_err(), SproutError::Database { .. }));
}

#[test]
fn test_all_sorted_by_name() {
    let fx = fixture();
    for name in ["zlib", "bzip2", "cmake"] {
        let spec = node(name, "1.0", vec![]);
        fx.db.add(record(&fx, &spec, true)).unwrap();
    }
    let names: Vec<String> = fx.db.all().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["bzip2", "cmake", "zlib"]);
    assert!(!fx.db.is_empty());
}

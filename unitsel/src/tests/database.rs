use std::fs::File;
use std::io::{BufWriter, Write};

use tempfile::tempdir;

use crate::cost::JoinCost;
use crate::database::*;
use crate::index::StopPolicy;
use crate::tests::{test_database, SCHEMA_DEF, UNITS_CSV};

fn assert_same(a: &UnitDatabase, b: &UnitDatabase) {
    assert_eq!(a.schema(), b.schema());
    assert_eq!(a.units(), b.units());
    assert_eq!(a.vectors().len(), b.vectors().len());
    for (x, y) in a.vectors().iter().zip(b.vectors()) {
        assert!(x.bit_eq(y));
    }
    let (ja, jb) = (a.join_features(), b.join_features());
    assert_eq!(ja.dim(), jb.dim());
    assert_eq!(ja.num_units(), jb.num_units());
    for u in 0..ja.num_units() as u32 {
        let bits = |x: &[f32]| x.iter().map(|f| f.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(ja.left(u)), bits(jb.left(u)));
        assert_eq!(bits(ja.right(u)), bits(jb.right(u)));
    }
    assert_eq!(a.index(), b.index());
}

/// メモリ上で書き出して読み直したデータベースが同一であることのテスト
#[test]
fn test_write_read() {
    let db = test_database();
    let mut buf = vec![];
    db.write(&mut buf).unwrap();
    assert!(buf.starts_with(DATABASE_MAGIC));

    let read = UnitDatabase::read(buf.as_slice()).unwrap();
    assert_same(&db, &read);

    let q = &db.vectors()[7];
    assert_eq!(
        read.index().retrieve(q, StopPolicy::FullDepth).units,
        db.index().retrieve(q, StopPolicy::FullDepth).units
    );
}

/// ファイルに書き出してメモリマップで読み込むテスト
#[test]
fn test_from_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("voice.db");
    let db = test_database();
    {
        let mut wtr = BufWriter::new(File::create(&path).unwrap());
        db.write(&mut wtr).unwrap();
        wtr.flush().unwrap();
    }
    let read = UnitDatabase::from_path(&path).unwrap();
    assert_same(&db, &read);

    let join = crate::cost::JoinCostFeatures::new(read.join_features(), read.units(), 1.0);
    assert_eq!(join.cost(1, 2), 0.0);
    assert_eq!(join.cost(11, 12), f64::INFINITY);
}

/// 壊れたファイルの読み込みが失敗することのテスト
#[test]
fn test_corrupted() {
    let db = test_database();
    let mut buf = vec![];
    db.write(&mut buf).unwrap();

    let truncated = &buf[..buf.len() / 2];
    assert!(UnitDatabase::read(truncated).is_err());

    let dir = tempdir().unwrap();
    let path = dir.path().join("short.db");
    File::create(&path)
        .unwrap()
        .write_all(&DATABASE_MAGIC[..4])
        .unwrap();
    assert!(UnitDatabase::from_path(&path).is_err());
    assert!(UnitDatabase::from_path(dir.path().join("missing.db")).is_err());
}

/// 接続記述子なしのデータベースのテスト
#[test]
fn test_without_join() {
    let db = UnitDatabaseBuilder::from_readers_without_join(
        SCHEMA_DEF.as_bytes(),
        UNITS_CSV.as_bytes(),
        &["phone"],
    )
    .unwrap();
    assert_eq!(db.join_features().dim(), 0);

    let mut buf = vec![];
    db.write(&mut buf).unwrap();
    let read = UnitDatabase::read(buf.as_slice()).unwrap();
    assert_same(&db, &read);

    let join = crate::cost::JoinCostFeatures::new(read.join_features(), read.units(), 0.5);
    assert_eq!(join.cost(2, 1), 0.5);
}

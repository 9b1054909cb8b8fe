use crate::errors::UnitSelError;
use crate::features::*;
use crate::tests::{test_database, SCHEMA_DEF};

/// 書き出して読み直したスキーマが同じ値表を持つことのテスト
#[test]
fn test_schema_round_trip() {
    let schema = FeatureSchema::from_reader(SCHEMA_DEF.as_bytes()).unwrap();
    let text = schema.to_text();
    let reparsed = FeatureSchema::from_reader(text.as_bytes()).unwrap();

    assert_eq!(schema.len(), reparsed.len());
    for i in 0..schema.len() {
        let (a, b) = (schema.feature(i), reparsed.feature(i));
        assert_eq!(a.name(), b.name());
        assert_eq!(a.kind(), b.kind());
        assert_eq!(a.values(), b.values());
        assert_eq!(a.weight_fn(), b.weight_fn());
        assert_eq!(a.similarity_matrix(), b.similarity_matrix());
        assert!((a.weight() - b.weight()).abs() < 1e-6);
    }
}

/// テスト用スキーマの内容のテスト
#[test]
fn test_schema_layout() {
    let schema = FeatureSchema::from_reader(SCHEMA_DEF.as_bytes()).unwrap();
    assert_eq!(schema.len(), 6);
    assert_eq!(schema.feature(3).kind(), FeatureKind::Enum16);
    assert_eq!(schema.feature(5).weight_fn(), WeightFunction::Step(100.0));
    assert_eq!(schema.value_index(0, "k"), Some(5));
    assert_eq!(schema.value_index(0, "x"), None);
    assert_eq!(schema.feature(1).similarity(1, 2), Some(0.5));

    // 3 + 1 + 1 + 1 + 1 + 0.5
    let total: f32 = schema.defs().iter().map(|d| d.weight()).sum();
    assert!((total - 1.0).abs() < 1e-6);
    assert!((schema.feature(0).weight() - 3.0 / 7.5).abs() < 1e-6);
}

/// 同じ値の組を二度エンコードするとビット単位で同じベクトルになることのテスト
#[test]
fn test_encoding_determinism() {
    let schema = FeatureSchema::from_reader(SCHEMA_DEF.as_bytes()).unwrap();
    let raw = ["a", "yes", "s", "kasa", "130.5", "NaN"];
    let v1 = schema.encode(&raw, 7).unwrap();
    let v2 = schema.encode(&raw, 7).unwrap();
    assert!(v1.bit_eq(&v2));
    assert_eq!(v1.len(), 6);
    assert_eq!(v1.origin(), 7);
}

/// 実行時ターゲットの未知の値が未定義の値に写像されることのテスト
#[test]
fn test_unseen_target_value() {
    let schema = FeatureSchema::from_reader(SCHEMA_DEF.as_bytes()).unwrap();
    let raw = ["o", "yes", "s", "sora", "x", "100"];

    let err = schema.encode(&raw, 0).unwrap_err();
    match err {
        UnitSelError::UnknownValue(e) => {
            assert_eq!(e.feature(), "phone");
            assert_eq!(e.value(), "o");
        }
        e => panic!("unexpected error: {e}"),
    }

    let v = schema.encode_lenient(&raw, 0).unwrap();
    assert_eq!(v.enum_value(0), UNDEFINED_VALUE);
    assert_eq!(v.enum_value(3), UNDEFINED_VALUE);
    assert!(v.continuous(4).is_nan());
    assert_eq!(v.continuous(5), 100.0);
    assert_eq!(schema.decode(&v, "stressed").unwrap(), Decoded::Label("yes"));
}

/// インベントリのベクトルが全てスキーマに適合することのテスト
#[test]
fn test_inventory_vectors() {
    let db = test_database();
    let schema = db.schema();
    assert_eq!(db.vectors().len(), 13);
    for (i, v) in db.vectors().iter().enumerate() {
        assert!(schema.conforms(v));
        assert_eq!(v.origin() as usize, i);
    }
    assert_eq!(
        schema.decode(&db.vectors()[3], "phone").unwrap(),
        Decoded::Label("s")
    );
    assert_eq!(
        schema.decode(&db.vectors()[6], "f0").unwrap(),
        Decoded::Continuous(140.0)
    );
}

//! Property tests for the type algebra: print/parse round-trips,
//! congruence, and fingerprint stability.

use proptest::prelude::*;

use sentra::types::{parse_type, Attribute, Field};
use sentra::Type;

fn arb_ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}".prop_map(|s| s)
}

fn arb_attribute() -> impl Strategy<Value = Attribute> {
    (arb_ident(), proptest::option::of(".{0,12}")).prop_map(|(key, value)| Attribute {
        key,
        value,
    })
}

fn arb_type() -> impl Strategy<Value = Type> {
    let scalar = prop_oneof![
        Just(Type::null()),
        Just(Type::bool_()),
        Just(Type::int64()),
        Just(Type::uint64()),
        Just(Type::double()),
        Just(Type::duration()),
        Just(Type::time()),
        Just(Type::string()),
        Just(Type::blob()),
        Just(Type::ip()),
        Just(Type::subnet()),
        Just(Type::pattern()),
    ];
    let leaf = (scalar, proptest::collection::vec(arb_attribute(), 0..3))
        .prop_map(|(ty, attrs)| ty.with_attributes(attrs));
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(Type::list),
            (inner.clone(), inner.clone()).prop_map(|(k, v)| Type::map(k, v)),
            proptest::collection::vec((arb_ident(), inner.clone()), 1..4).prop_map(|fields| {
                // Deduplicate field names; records require uniqueness.
                let mut seen = std::collections::HashSet::new();
                let fields: Vec<Field> = fields
                    .into_iter()
                    .filter(|(name, _)| seen.insert(name.clone()))
                    .map(|(name, ty)| Field::new(name, ty))
                    .collect();
                Type::record(fields).expect("unique names")
            }),
            proptest::collection::vec(arb_ident(), 1..5).prop_map(|variants| {
                let mut seen = std::collections::HashSet::new();
                let variants: Vec<String> = variants
                    .into_iter()
                    .filter(|v| seen.insert(v.clone()))
                    .collect();
                Type::enumeration(variants).expect("unique variants")
            }),
            (arb_ident(), inner).prop_map(|(name, ty)| Type::named(name, ty)),
        ]
    })
}

proptest! {
    #[test]
    fn prop_print_parse_roundtrip(ty in arb_type()) {
        let printed = ty.to_string();
        let parsed = parse_type(&printed)
            .unwrap_or_else(|e| panic!("failed to parse `{printed}`: {e}"));
        prop_assert_eq!(parsed, ty);
    }

    #[test]
    fn prop_fingerprint_equality(a in arb_type(), b in arb_type()) {
        // Equal types share a fingerprint; differing fingerprints imply
        // differing types.
        prop_assert_eq!(a.fingerprint(), a.clone().fingerprint());
        if a == b {
            prop_assert_eq!(a.fingerprint(), b.fingerprint());
        }
        if a.fingerprint() != b.fingerprint() {
            prop_assert_ne!(a, b);
        }
    }

    #[test]
    fn prop_attributes_change_equality_not_congruence(ty in arb_type()) {
        let attributed = ty.clone().with_attribute(Attribute::flag("skip"));
        prop_assert!(ty.congruent(&attributed));
        prop_assert_ne!(ty, attributed);
    }

    #[test]
    fn prop_naming_changes_equality_not_congruence(ty in arb_type()) {
        let named = Type::named("wrapper.name", ty.clone());
        prop_assert!(ty.congruent(&named));
        prop_assert_ne!(ty, named);
    }

    #[test]
    fn prop_congruence_is_reflexive_and_symmetric(a in arb_type(), b in arb_type()) {
        prop_assert!(a.congruent(&a));
        prop_assert_eq!(a.congruent(&b), b.congruent(&a));
    }
}

#[test]
fn test_escape_heavy_attribute_roundtrip() {
    let ty = Type::string().with_attribute(Attribute::new(
        "default",
        "line one\nline\ttwo \"quoted\" back\\slash",
    ));
    let parsed = parse_type(&ty.to_string()).unwrap();
    assert_eq!(parsed, ty);
}

#[test]
fn test_deeply_nested_record_roundtrip() {
    let mut ty = Type::record(vec![Field::new("leaf", Type::ip())]).unwrap();
    for depth in 0..6 {
        ty = Type::record(vec![Field::new(format!("level{depth}"), ty)]).unwrap();
    }
    let parsed = parse_type(&ty.to_string()).unwrap();
    assert_eq!(parsed, ty);
}

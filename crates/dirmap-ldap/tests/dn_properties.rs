//! Property tests for distinguished-name composition.

use dirmap_ldap::{DistinguishedName, RelativeDistinguishedName};
use proptest::prelude::*;

fn attribute() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-zA-Z][a-zA-Z0-9-]{0,8}").unwrap()
}

fn rdn() -> impl Strategy<Value = RelativeDistinguishedName> {
    (attribute(), "\\PC{1,12}")
        .prop_map(|(attribute, value)| RelativeDistinguishedName::new(attribute, value))
}

/// DNs built only through composition, never from text.
fn composed_dn() -> impl Strategy<Value = DistinguishedName> {
    proptest::collection::vec(rdn(), 0..=5).prop_map(|rdns| {
        rdns.into_iter()
            .rev()
            .fold(DistinguishedName::empty(), DistinguishedName::with_prefix)
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    /// Rendering then parsing a composed DN gives the same DN.
    #[test]
    fn property_render_parse_round_trip(dn in composed_dn()) {
        let reparsed = DistinguishedName::parse(dn.to_string()).unwrap();
        prop_assert_eq!(&reparsed, &dn);
        prop_assert_eq!(reparsed.as_str(), dn.as_str());
    }

    /// Concatenation and decomposition results also round-trip.
    #[test]
    fn property_derived_dns_round_trip(child in composed_dn(), base in composed_dn()) {
        let joined = DistinguishedName::concat(&child, &base);
        prop_assert_eq!(DistinguishedName::parse(joined.as_str()).unwrap(), joined.clone());

        if let Ok(rest) = joined.without_first_rdn() {
            prop_assert_eq!(DistinguishedName::parse(rest.as_str()).unwrap(), rest);
            let first = DistinguishedName::from(joined.first_rdn().unwrap().clone());
            prop_assert_eq!(DistinguishedName::parse(first.as_str()).unwrap(), first);
        }
    }

    /// The leading component followed by the remainder rebuilds the DN.
    #[test]
    fn property_first_rdn_decomposition(dn in composed_dn().prop_filter("non-empty", |dn| !dn.is_empty())) {
        let first = DistinguishedName::from(dn.first_rdn().unwrap().clone());
        let rest = dn.without_first_rdn().unwrap();
        prop_assert_eq!(DistinguishedName::concat(&first, &rest), dn);
    }

    /// Concatenating onto the empty DN is the identity on both sides.
    #[test]
    fn property_empty_dn_is_identity(dn in composed_dn()) {
        let empty = DistinguishedName::empty();
        prop_assert_eq!(DistinguishedName::concat(&empty, &dn), dn.clone());
        prop_assert_eq!(DistinguishedName::concat(&dn, &empty), dn);
    }
}

#[test]
fn empty_dn_has_no_first_rdn() {
    let empty = DistinguishedName::empty();
    assert!(empty.first_rdn().is_err());
    assert!(empty.without_first_rdn().is_err());
}

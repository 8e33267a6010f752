use canopy_types::{HostName, OrgName, Tag};
use proptest::prelude::*;

proptest! {
    #[test]
    fn lowercase_alnum_always_parses(s in "[a-z0-9]{1,63}") {
        prop_assert!(OrgName::parse(&s).is_ok());
        prop_assert!(HostName::parse(&s).is_ok());
    }

    #[test]
    fn parsed_name_round_trips(s in "[a-z0-9]{1,63}") {
        let name = OrgName::parse(&s).unwrap();
        prop_assert_eq!(name.as_str(), s.as_str());
    }

    #[test]
    fn non_alnum_never_parses(s in "[a-z0-9]{0,10}[^a-z0-9][a-z0-9]{0,10}") {
        prop_assert!(HostName::parse(&s).is_err());
    }
}

#[test]
fn tag_reserved_prefix() {
    assert!(Tag::parse("organist").is_err());
    assert!(Tag::parse("vpn").is_ok());
}

use sigchain_core::model::{AddressMatch, FilterMode, FunctionKind, FunctionMatch};
use sigchain_core::types::{RawAddressPair, NO_NEXT_ADDRESS};

#[test]
fn raw_pair_decodes_sentinel() {
    let matched = RawAddressPair::new(0x1000, 0x2000);
    assert_eq!(matched.next(), Some(0x2000));

    let unmatched = RawAddressPair::new(0x1000, NO_NEXT_ADDRESS);
    assert_eq!(unmatched.next(), None);
}

#[test]
fn address_match_from_raw_starts_without_id() {
    let m = AddressMatch::from_raw(RawAddressPair::new(0x1000, 0));
    assert_eq!(m.address, 0x1000);
    assert_eq!(m.address_in_next, None);
    assert_eq!(m.id, None);

    let t = AddressMatch::terminal(0x4000);
    assert_eq!(t.address, 0x4000);
    assert_eq!(t.address_in_next, None);
}

#[test]
fn function_match_round_trips_through_json() {
    let mut function = FunctionMatch::new(RawAddressPair::new(0x1000, 0x2000));
    function.kind = FunctionKind::Library;
    function.basic_blocks.insert(0x1000);
    function.basic_blocks.insert(0x1020);

    let json = serde_json::to_string(&function).unwrap();
    let deserialized: FunctionMatch = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized, function);
}

#[test]
fn kind_and_filter_defaults() {
    assert_eq!(FunctionKind::default(), FunctionKind::Normal);
    assert_eq!(FilterMode::default(), FilterMode::None);

    // Enum encodings are part of the collaborator-facing surface.
    assert_eq!(serde_json::to_string(&FunctionKind::Thunk).unwrap(), "\"thunk\"");
    assert_eq!(serde_json::to_string(&FilterMode::Blacklist).unwrap(), "\"blacklist\"");
}

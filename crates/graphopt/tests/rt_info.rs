use std::sync::Arc;

use graphopt::rt_info::{
    self, RtEntry, RtInfo, RtValue, DISABLE_CONSTANT_FOLDING, FUSED_NAMES,
};

#[derive(Debug, PartialEq)]
struct QuantizationHint {
    bits: u8,
}

#[test]
fn open_keys_round_trip_through_typed_accessors() {
    let mut info = RtInfo::new();
    assert!(info.is_empty());
    info.insert("layout", RtValue::String("NCHW".into()));
    info.insert("priority", RtValue::Int(3));
    info.insert("hint", RtValue::Opaque(Arc::new(QuantizationHint { bits: 4 })));

    assert_eq!(info.len(), 3);
    assert_eq!(info.get("layout").and_then(RtValue::as_str), Some("NCHW"));
    assert_eq!(info.get("priority").and_then(RtValue::as_int), Some(3));
    assert_eq!(info.get("priority").and_then(RtValue::as_bool), None);
    assert_eq!(
        info.get("hint").and_then(|value| value.downcast_ref::<QuantizationHint>()),
        Some(&QuantizationHint { bits: 4 })
    );
    let keys: Vec<&str> = info.iter().map(|(key, _)| key).collect();
    assert_eq!(keys, vec!["hint", "layout", "priority"]);

    assert!(info.remove("layout").is_some());
    assert!(!info.contains("layout"));
}

#[test]
fn folding_marker_is_a_non_copyable_flag() {
    let mut info = RtInfo::new();
    assert!(!rt_info::constant_folding_is_disabled(&info));

    rt_info::disable_constant_folding(&mut info);
    assert!(rt_info::constant_folding_is_disabled(&info));
    let entry = info.entry(DISABLE_CONSTANT_FOLDING).unwrap();
    assert!(!entry.copyable);
    assert_eq!(entry.value.as_bool(), Some(true));

    rt_info::enable_constant_folding(&mut info);
    assert!(!rt_info::constant_folding_is_disabled(&info));
}

#[test]
fn merge_copyable_filters_entries() {
    let mut source = RtInfo::new();
    source.insert("keep", RtValue::Bool(true));
    source.insert_entry(
        "local",
        RtEntry {
            value: RtValue::Float(0.5),
            copyable: false,
        },
    );
    rt_info::disable_constant_folding(&mut source);
    rt_info::add_fused_names(&mut source, ["a"]);

    let mut target = RtInfo::new();
    target.insert("keep", RtValue::Bool(false));
    target.merge_copyable(&source);

    assert_eq!(target.get("keep").and_then(RtValue::as_bool), Some(true));
    assert!(!target.contains("local"));
    assert!(!target.contains(DISABLE_CONSTANT_FOLDING));
    // Fused names are merged explicitly, never overwritten wholesale.
    assert!(!target.contains(FUSED_NAMES));
}

#[test]
fn fused_names_stay_sorted_and_unique() {
    let mut info = RtInfo::new();
    assert!(rt_info::fused_names(&info).is_empty());
    rt_info::add_fused_names(&mut info, ["relu_3", "add_1"]);
    rt_info::add_fused_names(&mut info, vec![String::from("add_1"), String::from("mul_2")]);
    assert_eq!(rt_info::fused_names(&info), vec!["add_1", "mul_2", "relu_3"]);
}

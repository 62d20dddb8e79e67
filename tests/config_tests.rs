use bplib::rbtree::MAX_TREE_SIZE;
use bplib::{Attributes, Error, RetransmitOrder, WrapResponse};
use test_case::test_case;

#[test]
fn test_defaults_from_empty_json() {
    assert_eq!(Attributes::from_json("{}").unwrap(), Attributes::default());
}

#[test]
fn test_json_round_trip() {
    let attr = Attributes {
        timeout: 60,
        cid_reuse: true,
        retransmit_order: RetransmitOrder::SmallestCid,
        wrap_response: WrapResponse::Block,
        ..Default::default()
    };
    let json = attr.to_json().unwrap();
    assert!(json.contains("\"smallest_cid\""));
    assert!(json.contains("\"block\""));
    assert_eq!(Attributes::from_json(&json).unwrap(), attr);
}

#[test_case(r#"{ "max_gaps_per_dacs": 0 }"# ; "empty custody tree")]
#[test_case(r#"{ "max_fills_per_dacs": 0 }"# ; "empty records")]
#[test_case(r#"{ "active_table_size": 0 }"# ; "empty active table")]
#[test_case(r#"{ "max_gaps_per_dacs": 1048577 }"# ; "custody tree one past the limit")]
#[test_case(r#"{ "max_gaps_per_dacs": 2147483648 }"# ; "custody tree of half the id space")]
#[test_case(r#"{ "max_gaps_per_dacs": 4294967295 }"# ; "custody tree too large")]
fn test_rejects_bad_sizes(json: &str) {
    assert!(matches!(
        Attributes::from_json(json),
        Err(Error::ParamError(_))
    ));
}

#[test]
fn test_largest_custody_tree() {
    let json = format!(r#"{{ "max_gaps_per_dacs": {} }}"#, MAX_TREE_SIZE);
    let attr = Attributes::from_json(&json).unwrap();
    assert_eq!(attr.max_gaps_per_dacs, MAX_TREE_SIZE);
    assert_eq!(MAX_TREE_SIZE, 1048576);
}

#[test_case(r#"{ "wrap_response": "panic" }"# ; "unknown wrap response")]
#[test_case(r#"{ "timeout": -1 }"# ; "negative timeout")]
#[test_case("timeout = 10" ; "not json")]
fn test_rejects_malformed(json: &str) {
    assert!(matches!(
        Attributes::from_json(json),
        Err(Error::ConfigError(_))
    ));
}

use assert_matches::assert_matches;

use super::*;
use crate::protocol::{FieldType, Member, MsgCat};

const DICTIONARY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/data/FIX44.xml"
));

#[test]
fn load_dictionary() {
    let protocol = load_str(DICTIONARY).unwrap();

    assert_eq!(protocol.version(), "4.4");
    assert_eq!(protocol.begin_string(), b"FIX.4.4");

    let msg_type = protocol.field("MsgType").unwrap();
    assert_eq!(msg_type.tag(), 35);
    assert_eq!(msg_type.field_type(), FieldType::String);
    assert_eq!(msg_type.values().unwrap().name_of(b"A"), Some("LOGON"));
    assert_eq!(
        msg_type.values().unwrap().token_of("HEARTBEAT"),
        Some(b"0".as_slice())
    );

    let sending_time = protocol.field_by_tag(52).unwrap();
    assert_eq!(sending_time.name(), "SendingTime");
    assert_eq!(sending_time.field_type(), FieldType::UtcTimestamp);

    let logon = protocol.message("Logon").unwrap();
    assert_eq!(logon.msg_type(), b"A");
    assert_eq!(logon.category(), MsgCat::Admin);
    assert_eq!(logon.members().len(), 5);
    assert!(protocol.message_by_type(b"A").is_some());

    let order = protocol.message("NewOrderSingle").unwrap();
    assert_eq!(order.category(), MsgCat::App);
    let flat: Vec<&str> = protocol
        .flatten(order.members())
        .filter_map(|m| m.field().map(|f| f.name()))
        .collect();
    // The Instrument component is flattened into its fields.
    assert_eq!(
        flat,
        [
            "ClOrdID",
            "Symbol",
            "SecurityID",
            "Side",
            "TransactTime",
            "OrderQty",
            "OrdType",
            "Price",
            "TimeInForce",
        ]
    );

    let market_data = protocol.message("MarketDataRequest").unwrap();
    let groups: Vec<&Member> = protocol
        .flatten(market_data.members())
        .filter(|m| matches!(m, Member::Group { .. }))
        .collect();
    assert_eq!(groups.len(), 2);
}

#[test]
fn loading_twice_yields_equal_protocols() {
    let first = load_str(DICTIONARY).unwrap();
    let second = load_str(DICTIONARY).unwrap();
    assert_eq!(first, second);
}

#[test]
fn unknown_field_type_fails_at_load() {
    let xml = r#"
        <fix major="4" minor="4">
          <header>
            <field name="BeginString" required="Y"/>
            <field name="BodyLength" required="Y"/>
            <field name="MsgType" required="Y"/>
          </header>
          <trailer>
            <field name="CheckSum" required="Y"/>
          </trailer>
          <messages/>
          <fields>
            <field number="8" name="BeginString" type="STRING"/>
            <field number="9" name="BodyLength" type="LENGTH"/>
            <field number="35" name="MsgType" type="STRING"/>
            <field number="10" name="CheckSum" type="STRING"/>
            <field number="99" name="Odd" type="TENSOR"/>
          </fields>
        </fix>"#;
    let error = load_str(xml).unwrap_err();
    assert!(error.to_string().contains("Odd"), "{error:#}");
}

#[test]
fn member_referencing_unknown_field_fails() {
    let xml = r#"
        <fix major="4" minor="4">
          <header>
            <field name="BeginString" required="Y"/>
            <field name="BodyLength" required="Y"/>
            <field name="MsgType" required="Y"/>
          </header>
          <trailer>
            <field name="CheckSum" required="Y"/>
          </trailer>
          <messages>
            <message name="Strange" msgtype="z" msgcat="app">
              <field name="Missing" required="Y"/>
            </message>
          </messages>
          <fields>
            <field number="8" name="BeginString" type="STRING"/>
            <field number="9" name="BodyLength" type="LENGTH"/>
            <field number="35" name="MsgType" type="STRING"/>
            <field number="10" name="CheckSum" type="STRING"/>
          </fields>
        </fix>"#;
    assert_matches!(load_str(xml), Err(_));
}

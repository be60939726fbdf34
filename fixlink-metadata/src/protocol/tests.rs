use assert_matches::assert_matches;

use super::*;

fn field(name: &str, tag: TagNum, field_type: FieldType) -> FieldDef {
    FieldDef::new(name, tag, field_type, None)
}

fn base_builder() -> ProtocolBuilder {
    let mut builder = ProtocolBuilder::new("4.4", b"FIX.4.4".to_vec());
    builder
        .field(field("BeginString", 8, FieldType::String))
        .unwrap()
        .field(field("BodyLength", 9, FieldType::Length))
        .unwrap()
        .field(field("MsgType", 35, FieldType::String))
        .unwrap()
        .field(field("CheckSum", 10, FieldType::String))
        .unwrap();
    let header = ["BeginString", "BodyLength", "MsgType"]
        .into_iter()
        .map(|name| Member::Field {
            field: builder.field_ref(name).unwrap().clone(),
            required: true,
        })
        .collect();
    let trailer = vec![Member::Field {
        field: builder.field_ref("CheckSum").unwrap().clone(),
        required: true,
    }];
    builder.header(header).trailer(trailer);
    builder
}

#[test]
fn parse_field_type() {
    assert_eq!("INT".parse::<FieldType>(), Ok(FieldType::Int));
    assert_eq!("UTCTIMESTAMP".parse::<FieldType>(), Ok(FieldType::UtcTimestamp));
    assert_eq!(
        "MULTIPLEVALUESTRING".parse::<FieldType>(),
        Ok(FieldType::MultipleValueString)
    );
    assert_matches!(
        "DATA".parse::<FieldType>(),
        Err(MetadataError::UnknownFieldType(_))
    );
}

#[test]
fn enum_values_are_a_bijection() {
    let values: FieldValues = [("A", "LOGON"), ("5", "LOGOUT")].into_iter().collect();
    assert_eq!(values.name_of(b"A"), Some("LOGON"));
    assert_eq!(values.token_of("LOGOUT"), Some(b"5".as_slice()));
    assert_eq!(values.name_of(b"0"), None);
    assert_eq!(values.token_of("HEARTBEAT"), None);
}

#[test]
fn duplicate_tag_rejected() {
    let mut builder = base_builder();
    assert_matches!(
        builder.field(field("Other", 35, FieldType::Int)),
        Err(MetadataError::DuplicateTag { tag: 35, .. })
    );
}

#[test]
fn duplicate_msg_type_rejected() {
    let mut builder = base_builder();
    builder
        .message(MessageDef::new("Logon", b"A".to_vec(), MsgCat::Admin, vec![]))
        .message(MessageDef::new("Other", b"A".to_vec(), MsgCat::App, vec![]));
    assert_matches!(
        builder.build(),
        Err(MetadataError::DuplicateMsgType { .. })
    );
}

#[test]
fn header_must_start_with_standard_triple() {
    let mut builder = base_builder();
    let msg_type = builder.field_ref("MsgType").unwrap().clone();
    builder.header(vec![Member::Field {
        field: msg_type,
        required: true,
    }]);
    assert_matches!(builder.build(), Err(MetadataError::MalformedHeader));
}

#[test]
fn trailer_must_end_with_checksum() {
    let mut builder = base_builder();
    builder.field(field("Signature", 89, FieldType::String)).unwrap();
    let signature = builder.field_ref("Signature").unwrap().clone();
    builder.trailer(vec![Member::Field {
        field: signature,
        required: false,
    }]);
    assert_matches!(builder.build(), Err(MetadataError::MalformedTrailer));
}

#[test]
fn unknown_component_reference_rejected() {
    let mut builder = base_builder();
    builder.message(MessageDef::new(
        "Order",
        b"D".to_vec(),
        MsgCat::App,
        vec![Member::Component {
            name: "Instrument".to_owned(),
            required: true,
        }],
    ));
    assert_matches!(
        builder.build(),
        Err(MetadataError::UnknownComponent { .. })
    );
}

#[test]
fn flatten_resolves_components_and_keeps_groups_whole() {
    let mut builder = base_builder();
    builder
        .field(field("Symbol", 55, FieldType::String))
        .unwrap()
        .field(field("SecurityID", 48, FieldType::String))
        .unwrap()
        .field(field("NoRelatedSym", 146, FieldType::NumInGroup))
        .unwrap();
    let symbol = builder.field_ref("Symbol").unwrap().clone();
    let security_id = builder.field_ref("SecurityID").unwrap().clone();
    let count = builder.field_ref("NoRelatedSym").unwrap().clone();
    builder.component(ComponentDef::new(
        "Instrument",
        vec![
            Member::Field {
                field: symbol,
                required: true,
            },
            Member::Field {
                field: security_id,
                required: false,
            },
        ],
    ));
    builder.message(MessageDef::new(
        "MarketDataRequest",
        b"V".to_vec(),
        MsgCat::App,
        vec![Member::Group {
            count,
            required: true,
            members: vec![Member::Component {
                name: "Instrument".to_owned(),
                required: true,
            }],
        }],
    ));
    let protocol = builder.build().unwrap();

    let message = protocol.message("MarketDataRequest").unwrap();
    let flat: Vec<&Member> = protocol.flatten(message.members()).collect();
    // The group is yielded whole; its component reference stays nested.
    assert_eq!(flat.len(), 1);
    let Member::Group { count, members, .. } = flat[0] else {
        panic!("expected group, got {flat:?}");
    };
    assert_eq!(count.name(), "NoRelatedSym");
    let nested: Vec<&str> = protocol
        .flatten(members)
        .filter_map(|m| m.field().map(|f| f.name()))
        .collect();
    assert_eq!(nested, ["Symbol", "SecurityID"]);
}

use assert_matches::assert_matches;
use chrono::{NaiveDate, TimeZone, Utc};
use fixlink_codec::{
    DecodeError, DecodeOptions, EncodeError, EncodeOptions, FieldMap, FieldValue, decode_message,
    encode_message,
};
use fixlink_metadata::{Protocol, xml};

const DICTIONARY: &str = include_str!("../../fixlink-metadata/tests/data/FIX44.xml");

fn protocol() -> Protocol {
    xml::load_str(DICTIONARY).unwrap()
}

fn pipe_options() -> DecodeOptions {
    DecodeOptions {
        separator: b'|',
        ..DecodeOptions::default()
    }
}

#[test]
fn decode_logon() {
    let protocol = protocol();
    let buf =
        b"8=FIX.4.4|9=58|35=A|49=A|56=AB|34=1|52=20100219-14:33:32.258|98=0|108=30|10=197|";

    let (decoded, message) = decode_message(&protocol, buf, &pipe_options()).unwrap();

    assert_eq!(message.name(), "Logon");
    assert_eq!(decoded["MsgType"], FieldValue::Str("LOGON".to_owned()));
    assert_eq!(decoded["SenderCompID"], FieldValue::Str("A".to_owned()));
    assert_eq!(decoded["TargetCompID"], FieldValue::Str("AB".to_owned()));
    assert_eq!(decoded["MsgSeqNum"], FieldValue::Int(1));
    assert_eq!(decoded["EncryptMethod"], FieldValue::Str("NONE".to_owned()));
    assert_eq!(decoded["HeartBtInt"], FieldValue::Int(30));
    assert_eq!(
        decoded["SendingTime"],
        FieldValue::DateTime(
            NaiveDate::from_ymd_opt(2010, 2, 19)
                .unwrap()
                .and_hms_milli_opt(14, 33, 32, 258)
                .unwrap()
                .and_utc()
        )
    );
}

fn logon_fields() -> FieldMap {
    let mut data = FieldMap::new();
    data.insert("MsgType".to_owned(), FieldValue::Str("LOGON".to_owned()));
    data.insert("MsgSeqNum".to_owned(), FieldValue::Int(42));
    data.insert(
        "SenderCompID".to_owned(),
        FieldValue::Str("SENDER".to_owned()),
    );
    data.insert(
        "TargetCompID".to_owned(),
        FieldValue::Str("TARGET".to_owned()),
    );
    data.insert(
        "SendingTime".to_owned(),
        FieldValue::DateTime(Utc.with_ymd_and_hms(2020, 1, 1, 12, 30, 0).unwrap()),
    );
    data.insert(
        "EncryptMethod".to_owned(),
        FieldValue::Str("NONE".to_owned()),
    );
    data.insert("HeartBtInt".to_owned(), FieldValue::Int(30));
    data
}

#[test]
fn logon_round_trip() {
    let protocol = protocol();
    let data = logon_fields();
    let message = protocol.message("Logon").unwrap().clone();

    let buf = encode_message(&protocol, &data, &message, &EncodeOptions::default()).unwrap();
    let (mut decoded, decoded_message) =
        decode_message(&protocol, &buf, &DecodeOptions::default()).unwrap();

    assert_eq!(decoded_message.name(), "Logon");
    // The regenerated integrity fields come back typed; the rest must
    // round-trip exactly.
    assert_eq!(
        decoded.shift_remove("BeginString"),
        Some(FieldValue::Str("FIX.4.4".to_owned()))
    );
    assert!(matches!(
        decoded.shift_remove("BodyLength"),
        Some(FieldValue::Int(_))
    ));
    assert!(decoded.shift_remove("CheckSum").is_some());
    assert_eq!(decoded, data);
}

#[test]
fn checksum_is_byte_sum_mod_256() {
    let protocol = protocol();
    let data = logon_fields();
    let message = protocol.message("Logon").unwrap().clone();

    let buf = encode_message(&protocol, &data, &message, &EncodeOptions::default()).unwrap();

    let sum: u32 = buf[..buf.len() - 7].iter().map(|&b| b as u32).sum();
    let expected = format!("{:03}", sum % 256);
    let received = &buf[buf.len() - 4..buf.len() - 1];
    assert_eq!(received, expected.as_bytes());
}

#[test]
fn round_trip_with_pipe_separator() {
    let protocol = protocol();
    let data = logon_fields();
    let message = protocol.message("Logon").unwrap().clone();
    let options = EncodeOptions {
        separator: b'|',
        ..EncodeOptions::default()
    };

    let buf = encode_message(&protocol, &data, &message, &options).unwrap();
    // The checksum is computed as if the separator were SOH, so the frame
    // re-framed with SOH carries the same checksum.
    let soh: Vec<u8> = buf
        .iter()
        .map(|&b| if b == b'|' { 0x01 } else { b })
        .collect();
    assert!(decode_message(&protocol, &soh, &DecodeOptions::default()).is_ok());
    assert!(decode_message(&protocol, &buf, &pipe_options()).is_ok());
}

#[test]
fn group_round_trip() {
    let protocol = protocol();
    let message = protocol.message("MarketDataRequest").unwrap().clone();

    let mut data = FieldMap::new();
    data.insert(
        "MsgType".to_owned(),
        FieldValue::Str("MARKET_DATA_REQUEST".to_owned()),
    );
    data.insert("MsgSeqNum".to_owned(), FieldValue::Int(7));
    data.insert("SenderCompID".to_owned(), FieldValue::Str("S".to_owned()));
    data.insert("TargetCompID".to_owned(), FieldValue::Str("T".to_owned()));
    data.insert(
        "SendingTime".to_owned(),
        FieldValue::DateTime(Utc.with_ymd_and_hms(2020, 6, 1, 9, 0, 0).unwrap()),
    );
    data.insert("MDReqID".to_owned(), FieldValue::Str("req-1".to_owned()));
    data.insert(
        "SubscriptionRequestType".to_owned(),
        FieldValue::Str("SNAPSHOT".to_owned()),
    );
    data.insert("MarketDepth".to_owned(), FieldValue::Int(0));
    let entry_types: Vec<FieldMap> = vec![
        [("MDEntryType".to_owned(), FieldValue::Str("BID".to_owned()))]
            .into_iter()
            .collect(),
        [("MDEntryType".to_owned(), FieldValue::Str("OFFER".to_owned()))]
            .into_iter()
            .collect(),
    ];
    data.insert("NoMDEntryTypes".to_owned(), FieldValue::Group(entry_types));
    let related: Vec<FieldMap> = vec![
        [
            ("Symbol".to_owned(), FieldValue::Str("EURUSD".to_owned())),
            ("SecurityID".to_owned(), FieldValue::Str("978".to_owned())),
        ]
        .into_iter()
        .collect(),
        [("Symbol".to_owned(), FieldValue::Str("GBPUSD".to_owned()))]
            .into_iter()
            .collect(),
    ];
    data.insert("NoRelatedSym".to_owned(), FieldValue::Group(related.clone()));

    let buf = encode_message(&protocol, &data, &message, &EncodeOptions::default()).unwrap();
    let (decoded, _) = decode_message(&protocol, &buf, &DecodeOptions::default()).unwrap();

    assert_eq!(decoded["NoRelatedSym"], FieldValue::Group(related));
    let entries = decoded["NoMDEntryTypes"].as_group().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(
        entries[0]["MDEntryType"],
        FieldValue::Str("BID".to_owned())
    );
}

#[test]
fn missing_required_field_fails_encoding() {
    let protocol = protocol();
    let message = protocol.message("Logon").unwrap().clone();
    let mut data = logon_fields();
    data.shift_remove("HeartBtInt");

    assert_matches!(
        encode_message(&protocol, &data, &message, &EncodeOptions::default()),
        Err(EncodeError::RequiredMemberMissing(name)) if name == "HeartBtInt"
    );
}

#[test]
fn missing_required_field_fails_strict_decoding() {
    let protocol = protocol();
    let buf = b"8=FIX.4.4|9=51|35=A|49=A|56=AB|34=1|52=20100219-14:33:32.258|98=0|10=039|";
    // HeartBtInt<108> is required on Logon.
    let result = decode_message(&protocol, buf, &{
        DecodeOptions {
            separator: b'|',
            validate: false,
            ..DecodeOptions::default()
        }
    });
    assert_matches!(
        result,
        Err(DecodeError::RequiredMemberMissing(name)) if name == "HeartBtInt"
    );
}

#[test]
fn tampered_body_length_is_detected() {
    let protocol = protocol();
    let data = logon_fields();
    let message = protocol.message("Logon").unwrap().clone();

    let mut buf = encode_message(&protocol, &data, &message, &EncodeOptions::default()).unwrap();
    // Patch the BodyLength digits without re-running integrity.
    let nine = buf.windows(2).position(|w| w == b"9=").unwrap();
    buf[nine + 2] ^= 0x01;

    assert_matches!(
        decode_message(&protocol, &buf, &DecodeOptions::default()),
        Err(DecodeError::FieldValueMismatch { field, .. }) if field == "BodyLength"
    );
}

#[test]
fn wrong_begin_string_is_detected() {
    let protocol = protocol();
    let buf =
        b"8=FIX.4.2|9=58|35=A|49=A|56=AB|34=1|52=20100219-14:33:32.258|98=0|108=30|10=195|";
    assert_matches!(
        decode_message(&protocol, buf, &pipe_options()),
        Err(DecodeError::FieldValueMismatch { field, .. }) if field == "BeginString"
    );
}

#[test]
fn unknown_msg_type_is_rejected() {
    let protocol = protocol();
    let buf = b"8=FIX.4.4|9=12|35=zz|34=1|10=000|";
    let options = DecodeOptions {
        separator: b'|',
        strict: false,
        validate: false,
        ..DecodeOptions::default()
    };
    assert_matches!(
        decode_message(&protocol, buf, &options),
        Err(DecodeError::UnknownMsgType(msg_type)) if msg_type == "zz"
    );
}

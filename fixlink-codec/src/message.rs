//! Message-level codec: whole FIX messages to ordered field maps and back.
//!
//! Encoding walks header, body and trailer member lists (components
//! flattened transparently, groups recursed), then recomputes the
//! integrity fields. Decoding runs three passes over the `tag=value`
//! pairs: the fixed header triple in order, remaining header members in
//! any order, body members in any order, and the trailer with CheckSum
//! pinned last.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use fixlink_metadata::{FieldDef, Member, MessageDef, Protocol, TagNum};
use tracing::trace;

use crate::{
    DecodeError, EncodeError, FieldMap, FieldValue, SOH,
    field::{decode_value, encode_value},
};

/// Byte length of the trailing `10=NNN<SEP>` checksum field.
const CHECKSUM_FIELD_LEN: usize = 7;

#[derive(Clone, Copy, Debug)]
pub struct EncodeOptions {
    pub separator: u8,
    /// Recompute BeginString, BodyLength and CheckSum after assembly.
    pub regenerate_integrity: bool,
    /// Substitute the separator with SOH before summing the checksum when
    /// a non-SOH separator is used.
    pub convert_sep_for_checksum: bool,
}

impl Default for EncodeOptions {
    fn default() -> EncodeOptions {
        EncodeOptions {
            separator: SOH,
            regenerate_integrity: true,
            convert_sep_for_checksum: true,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DecodeOptions {
    pub separator: u8,
    /// Enforce required members and reject unknown tags.
    pub strict: bool,
    /// Verify BeginString, BodyLength and CheckSum against the wire.
    pub validate: bool,
    pub convert_sep_for_checksum: bool,
}

impl Default for DecodeOptions {
    fn default() -> DecodeOptions {
        DecodeOptions {
            separator: SOH,
            strict: true,
            validate: true,
            convert_sep_for_checksum: true,
        }
    }
}

/// Compute the checksum of a complete frame: the byte sum of everything
/// before the checksum field, modulo 256, as three ASCII digits.
pub fn calc_checksum(frame: &[u8], separator: u8, convert_sep_for_checksum: bool) -> [u8; 3] {
    let payload = &frame[..frame.len().saturating_sub(CHECKSUM_FIELD_LEN)];
    format_checksum(sum_bytes(payload, separator, convert_sep_for_checksum))
}

fn sum_bytes(payload: &[u8], separator: u8, convert_sep_for_checksum: bool) -> u8 {
    let substitute = separator != SOH && convert_sep_for_checksum;
    payload
        .iter()
        .map(|&byte| {
            if substitute && byte == separator {
                SOH as u32
            } else {
                byte as u32
            }
        })
        .sum::<u32>() as u8
}

fn format_checksum(sum: u8) -> [u8; 3] {
    [b'0' + sum / 100, b'0' + sum / 10 % 10, b'0' + sum % 10]
}

type EncodedPair = (Vec<u8>, Vec<u8>);

fn encode_members(
    protocol: &Protocol,
    data: &FieldMap,
    members: &[Member],
    pairs: &mut Vec<EncodedPair>,
    regenerate_integrity: bool,
) -> Result<(), EncodeError> {
    for member in protocol.flatten(members) {
        match member {
            Member::Field { field, required } => match data.get(field.name()) {
                Some(value) => {
                    pairs.push((field.tag_bytes(), encode_value(protocol, field, value)?));
                }
                None if regenerate_integrity
                    && matches!(field.name(), "BeginString" | "BodyLength" | "CheckSum") =>
                {
                    // Placeholder, recomputed after assembly.
                    let placeholder = match field.name() {
                        "BeginString" => protocol.begin_string().to_vec(),
                        "BodyLength" => b"0".to_vec(),
                        _ => b"000".to_vec(),
                    };
                    pairs.push((field.tag_bytes(), placeholder));
                }
                None if *required => {
                    return Err(EncodeError::RequiredMemberMissing(field.name().to_owned()));
                }
                None => {}
            },
            Member::Group {
                count,
                required,
                members,
            } => match data.get(count.name()) {
                Some(FieldValue::Group(occurrences)) => {
                    pairs.push((
                        count.tag_bytes(),
                        itoa::Buffer::new()
                            .format(occurrences.len())
                            .as_bytes()
                            .to_vec(),
                    ));
                    for occurrence in occurrences {
                        encode_members(protocol, occurrence, members, pairs, false)?;
                    }
                }
                Some(_) => {
                    return Err(EncodeError::UnexpectedValueType {
                        field: count.name().to_owned(),
                        expected: "group",
                    });
                }
                None if *required => {
                    return Err(EncodeError::RequiredMemberMissing(count.name().to_owned()));
                }
                None => {}
            },
            // Components are resolved by the flattening iterator.
            Member::Component { .. } => unreachable!(),
        }
    }
    Ok(())
}

fn render_pair(buf: &mut Vec<u8>, (tag, value): &EncodedPair, separator: u8) {
    buf.extend_from_slice(tag);
    buf.push(b'=');
    buf.extend_from_slice(value);
    buf.push(separator);
}

fn regenerate_integrity(
    protocol: &Protocol,
    pairs: &mut [EncodedPair],
    options: &EncodeOptions,
) -> Vec<u8> {
    let sep = options.separator;

    let mut body = Vec::new();
    for pair in &pairs[2..pairs.len() - 1] {
        render_pair(&mut body, pair, sep);
    }

    pairs[0].1 = protocol.begin_string().to_vec();
    pairs[1].1 = itoa::Buffer::new().format(body.len()).as_bytes().to_vec();

    let mut buf = Vec::new();
    render_pair(&mut buf, &pairs[0], sep);
    render_pair(&mut buf, &pairs[1], sep);
    buf.extend_from_slice(&body);

    let checksum = format_checksum(sum_bytes(&buf, sep, options.convert_sep_for_checksum));
    let last = pairs.last_mut().expect("trailer present");
    last.1 = checksum.to_vec();
    render_pair(&mut buf, last, sep);

    buf
}

/// Encode a populated field map against a message definition into a
/// framed byte buffer.
pub fn encode_message(
    protocol: &Protocol,
    data: &FieldMap,
    message: &MessageDef,
    options: &EncodeOptions,
) -> Result<Vec<u8>, EncodeError> {
    let mut pairs = Vec::new();
    encode_members(
        protocol,
        data,
        protocol.header(),
        &mut pairs,
        options.regenerate_integrity,
    )?;
    encode_members(protocol, data, message.members(), &mut pairs, false)?;
    encode_members(
        protocol,
        data,
        protocol.trailer(),
        &mut pairs,
        options.regenerate_integrity,
    )?;

    if options.regenerate_integrity {
        Ok(regenerate_integrity(protocol, &mut pairs, options))
    } else {
        let mut buf = Vec::new();
        for pair in &pairs {
            render_pair(&mut buf, pair, options.separator);
        }
        Ok(buf)
    }
}

#[derive(Clone, Copy, Debug)]
struct WirePair<'a> {
    tag: TagNum,
    value: &'a [u8],
    /// The full `tag=value` slice, for body-length arithmetic.
    raw: &'a [u8],
}

fn split_pairs(buf: &[u8], separator: u8) -> Result<Vec<WirePair<'_>>, DecodeError> {
    let mut pairs = Vec::new();
    let mut fields = buf.split(|&byte| byte == separator);
    // The frame ends with a separator, so the final element is empty.
    let trailing = fields.next_back();
    if !trailing.is_none_or(<[u8]>::is_empty) {
        return Err(DecodeError::MalformedPair);
    }
    for raw in fields {
        let eq = memchr::memchr(b'=', raw).ok_or(DecodeError::MalformedPair)?;
        let tag = std::str::from_utf8(&raw[..eq])
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or(DecodeError::MalformedPair)?;
        pairs.push(WirePair {
            tag,
            value: &raw[eq + 1..],
            raw,
        });
    }
    Ok(pairs)
}

fn find_next_member<'a>(
    field: &FieldDef,
    members: &mut impl Iterator<Item = &'a Member>,
    strict: bool,
) -> Result<Option<&'a Member>, DecodeError> {
    for member in members {
        if member.field().is_some_and(|f| f.tag() == field.tag()) {
            return Ok(Some(member));
        }
        if strict && member.required() {
            let name = member.field().map(|f| f.name()).unwrap_or_default();
            return Err(DecodeError::RequiredMemberMissing(name.to_owned()));
        }
    }
    Ok(None)
}

fn decode_in_order<'a>(
    protocol: &Protocol,
    pairs: &[WirePair<'_>],
    mut index: usize,
    members: &mut impl Iterator<Item = &'a Member>,
    decoded: &mut FieldMap,
    strict: bool,
) -> Result<usize, DecodeError> {
    while index < pairs.len() {
        let pair = pairs[index];
        let Some(field) = protocol.field_by_tag(pair.tag) else {
            if strict {
                return Err(DecodeError::UnknownTag(pair.tag));
            }
            break;
        };
        let Some(member) = find_next_member(field, members, strict)? else {
            break;
        };
        index += 1;
        index = decode_member(protocol, pairs, index, member, field, pair.value, decoded, strict)?;
    }

    if strict && let Some(member) = members.find(|member| member.required()) {
        let name = member.field().map(|f| f.name()).unwrap_or_default();
        return Err(DecodeError::RequiredMemberMissing(name.to_owned()));
    }
    Ok(index)
}

fn decode_any_order(
    protocol: &Protocol,
    pairs: &[WirePair<'_>],
    mut index: usize,
    members: &[&Member],
    decoded: &mut FieldMap,
    strict: bool,
) -> Result<usize, DecodeError> {
    let by_tag: HashMap<TagNum, &Member> = members
        .iter()
        .filter_map(|member| member.field().map(|f| (f.tag(), *member)))
        .collect();
    let mut seen: HashSet<TagNum> = HashSet::new();

    while index < pairs.len() {
        let pair = pairs[index];
        let Some(field) = protocol.field_by_tag(pair.tag) else {
            if strict {
                return Err(DecodeError::UnknownTag(pair.tag));
            }
            break;
        };
        let Some(member) = by_tag.get(&pair.tag).copied() else {
            break;
        };
        seen.insert(pair.tag);
        index += 1;
        index = decode_member(protocol, pairs, index, member, field, pair.value, decoded, strict)?;
    }

    if strict {
        for member in members {
            if member.required()
                && let Some(field) = member.field()
                && !seen.contains(&field.tag())
            {
                return Err(DecodeError::RequiredMemberMissing(field.name().to_owned()));
            }
        }
    }
    Ok(index)
}

#[allow(clippy::too_many_arguments)]
fn decode_member(
    protocol: &Protocol,
    pairs: &[WirePair<'_>],
    index: usize,
    member: &Member,
    field: &Arc<FieldDef>,
    value: &[u8],
    decoded: &mut FieldMap,
    strict: bool,
) -> Result<usize, DecodeError> {
    if let Member::Group { members, .. } = member {
        let count: usize = std::str::from_utf8(value)
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or_else(|| DecodeError::BadValue {
                field: field.name().to_owned(),
                value: String::from_utf8_lossy(value).into_owned(),
            })?;
        let (occurrences, index) = decode_group(protocol, pairs, index, members, count, strict)?;
        decoded.insert(field.name().to_owned(), FieldValue::Group(occurrences));
        Ok(index)
    } else {
        if let Some(value) = decode_value(protocol, field, value)? {
            decoded.insert(field.name().to_owned(), value);
        }
        Ok(index)
    }
}

fn decode_group(
    protocol: &Protocol,
    pairs: &[WirePair<'_>],
    mut index: usize,
    members: &[Member],
    count: usize,
    strict: bool,
) -> Result<(Vec<FieldMap>, usize), DecodeError> {
    let mut occurrences = Vec::with_capacity(count);
    for _ in 0..count {
        let mut occurrence = FieldMap::new();
        index = decode_in_order(
            protocol,
            pairs,
            index,
            &mut protocol.flatten(members),
            &mut occurrence,
            strict,
        )?;
        occurrences.push(occurrence);
    }
    Ok((occurrences, index))
}

fn encoded_field_value(
    protocol: &Protocol,
    decoded: &FieldMap,
    field: &FieldDef,
) -> Result<Vec<u8>, DecodeError> {
    let value = decoded
        .get(field.name())
        .ok_or_else(|| DecodeError::RequiredMemberMissing(field.name().to_owned()))?;
    encode_value(protocol, field, value).map_err(|_| DecodeError::BadValue {
        field: field.name().to_owned(),
        value: format!("{value:?}"),
    })
}

fn mismatch(field: &FieldDef, expected: &[u8], received: &[u8]) -> DecodeError {
    DecodeError::FieldValueMismatch {
        field: field.name().to_owned(),
        expected: String::from_utf8_lossy(expected).into_owned(),
        received: String::from_utf8_lossy(received).into_owned(),
    }
}

fn validate_integrity(
    protocol: &Protocol,
    buf: &[u8],
    pairs: &[WirePair<'_>],
    decoded: &FieldMap,
    options: &DecodeOptions,
) -> Result<(), DecodeError> {
    let field = |name: &str| {
        protocol
            .field(name)
            .ok_or_else(|| DecodeError::RequiredMemberMissing(name.to_owned()))
    };

    let begin_string = field("BeginString")?;
    let received = encoded_field_value(protocol, decoded, begin_string)?;
    if received != protocol.begin_string() {
        return Err(mismatch(begin_string, protocol.begin_string(), &received));
    }

    let body_length = field("BodyLength")?;
    let received = encoded_field_value(protocol, decoded, body_length)?;
    let header_len: usize = pairs[..2].iter().map(|pair| pair.raw.len() + 1).sum();
    let trailer_len = pairs.last().map(|pair| pair.raw.len() + 1).unwrap_or(0);
    let computed = buf.len() - header_len - trailer_len;
    let expected = itoa::Buffer::new().format(computed).as_bytes().to_vec();
    if received != expected {
        return Err(mismatch(body_length, &expected, &received));
    }

    let check_sum = field("CheckSum")?;
    let received = encoded_field_value(protocol, decoded, check_sum)?;
    let expected = calc_checksum(buf, options.separator, options.convert_sep_for_checksum);
    if received != expected {
        return Err(mismatch(check_sum, &expected, &received));
    }

    Ok(())
}

/// Decode a framed message into an ordered field map plus the message
/// definition identified by its MsgType.
pub fn decode_message(
    protocol: &Protocol,
    buf: &[u8],
    options: &DecodeOptions,
) -> Result<(FieldMap, Arc<MessageDef>), DecodeError> {
    let pairs = split_pairs(buf, options.separator)?;
    if pairs.len() < 3 {
        return Err(DecodeError::MalformedPair);
    }
    let mut decoded = FieldMap::new();

    let header: Vec<&Member> = protocol.flatten(protocol.header()).collect();
    let mut index = decode_in_order(
        protocol,
        &pairs,
        0,
        &mut header[..3].iter().copied(),
        &mut decoded,
        options.strict,
    )?;
    index = decode_any_order(
        protocol,
        &pairs,
        index,
        &header[3..],
        &mut decoded,
        options.strict,
    )?;

    let msg_type_field = protocol
        .field("MsgType")
        .ok_or_else(|| DecodeError::RequiredMemberMissing("MsgType".to_owned()))?;
    let msg_type = encoded_field_value(protocol, &decoded, msg_type_field)?;
    let message = protocol
        .message_by_type(&msg_type)
        .ok_or_else(|| {
            DecodeError::UnknownMsgType(String::from_utf8_lossy(&msg_type).into_owned())
        })?
        .clone();
    trace!(message = message.name(), "decoding body");

    let body: Vec<&Member> = protocol.flatten(message.members()).collect();
    index = decode_any_order(protocol, &pairs, index, &body, &mut decoded, options.strict)?;

    let trailer: Vec<&Member> = protocol.flatten(protocol.trailer()).collect();
    let (rest, last) = trailer.split_at(trailer.len() - 1);
    index = decode_any_order(protocol, &pairs, index, rest, &mut decoded, options.strict)?;
    decode_in_order(
        protocol,
        &pairs,
        index,
        &mut last.iter().copied(),
        &mut decoded,
        options.strict,
    )?;

    if options.validate {
        validate_integrity(protocol, buf, &pairs, &decoded, options)?;
    }

    Ok((decoded, message))
}

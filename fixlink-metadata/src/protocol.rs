use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use indexmap::IndexMap;
use thiserror::Error;

#[cfg(test)]
mod tests;

/// FIX tag number, e.g. `35` for MsgType.
pub type TagNum = u16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("unknown field type `{0}`")]
    UnknownFieldType(String),
    #[error("unknown message category `{0}`")]
    UnknownMsgCat(String),
    #[error("duplicate tag {tag} shared by `{first}` and `{second}`")]
    DuplicateTag {
        tag: TagNum,
        first: String,
        second: String,
    },
    #[error("duplicate field name `{0}`")]
    DuplicateField(String),
    #[error("duplicate MsgType `{msg_type}` shared by `{first}` and `{second}`")]
    DuplicateMsgType {
        msg_type: String,
        first: String,
        second: String,
    },
    #[error("member of `{owner}` references unknown component `{component}`")]
    UnknownComponent { owner: String, component: String },
    #[error("header must start with BeginString, BodyLength and MsgType")]
    MalformedHeader,
    #[error("the last trailer member must be CheckSum")]
    MalformedTrailer,
}

/// Semantic type of a field as declared by the dictionary.
///
/// The set is closed here: an unrecognized type token fails at load time
/// with [`MetadataError::UnknownFieldType`], so codecs can dispatch
/// exhaustively.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum FieldType {
    Int,
    SeqNum,
    NumInGroup,
    Length,
    Float,
    Qty,
    Price,
    PriceOffset,
    Amt,
    Char,
    String,
    Currency,
    Exchange,
    Boolean,
    MultipleValueString,
    UtcTimestamp,
    UtcTimeOnly,
    LocalMktDate,
    UtcDate,
    MonthYear,
}

impl TryFrom<&str> for FieldType {
    type Error = MetadataError;

    fn try_from(input: &str) -> Result<Self, Self::Error> {
        match input {
            "INT" => Ok(FieldType::Int),
            "SEQNUM" => Ok(FieldType::SeqNum),
            "NUMINGROUP" => Ok(FieldType::NumInGroup),
            "LENGTH" => Ok(FieldType::Length),
            "FLOAT" => Ok(FieldType::Float),
            "QTY" => Ok(FieldType::Qty),
            "PRICE" => Ok(FieldType::Price),
            "PRICEOFFSET" => Ok(FieldType::PriceOffset),
            "AMT" => Ok(FieldType::Amt),
            "CHAR" => Ok(FieldType::Char),
            "STRING" => Ok(FieldType::String),
            "CURRENCY" => Ok(FieldType::Currency),
            "EXCHANGE" => Ok(FieldType::Exchange),
            "BOOLEAN" => Ok(FieldType::Boolean),
            "MULTIPLEVALUESTRING" => Ok(FieldType::MultipleValueString),
            "UTCTIMESTAMP" => Ok(FieldType::UtcTimestamp),
            "UTCTIMEONLY" => Ok(FieldType::UtcTimeOnly),
            "LOCALMKTDATE" => Ok(FieldType::LocalMktDate),
            "UTCDATE" | "UTCDATEONLY" => Ok(FieldType::UtcDate),
            "MONTHYEAR" => Ok(FieldType::MonthYear),
            other => Err(MetadataError::UnknownFieldType(other.to_owned())),
        }
    }
}

impl FromStr for FieldType {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TryFrom::try_from(s)
    }
}

/// Enumeration of a field: a bijection between the wire token and its
/// logical name, e.g. `b"A"` ↔ `"LOGON"` for MsgType.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FieldValues {
    by_token: IndexMap<Vec<u8>, String>,
    by_name: IndexMap<String, Vec<u8>>,
}

impl FieldValues {
    pub fn new() -> FieldValues {
        FieldValues::default()
    }

    pub fn insert(&mut self, token: impl Into<Vec<u8>>, name: impl Into<String>) {
        let token = token.into();
        let name = name.into();
        self.by_name.insert(name.clone(), token.clone());
        self.by_token.insert(token, name);
    }

    pub fn name_of(&self, token: &[u8]) -> Option<&str> {
        self.by_token.get(token).map(String::as_str)
    }

    pub fn token_of(&self, name: &str) -> Option<&[u8]> {
        self.by_name.get(name).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &str)> {
        self.by_token.iter().map(|(t, n)| (t.as_slice(), n.as_str()))
    }
}

impl<T: Into<Vec<u8>>, N: Into<String>> FromIterator<(T, N)> for FieldValues {
    fn from_iter<I: IntoIterator<Item = (T, N)>>(iter: I) -> FieldValues {
        let mut values = FieldValues::new();
        for (token, name) in iter {
            values.insert(token, name);
        }
        values
    }
}

/// A single field definition: unique name, unique tag, semantic type and
/// an optional enumeration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldDef {
    name: String,
    tag: TagNum,
    field_type: FieldType,
    values: Option<FieldValues>,
}

impl FieldDef {
    pub fn new(
        name: impl Into<String>,
        tag: TagNum,
        field_type: FieldType,
        values: Option<FieldValues>,
    ) -> FieldDef {
        FieldDef {
            name: name.into(),
            tag,
            field_type,
            values: values.filter(|v| !v.is_empty()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> TagNum {
        self.tag
    }

    /// The tag rendered as the decimal ASCII bytes that appear on the wire.
    pub fn tag_bytes(&self) -> Vec<u8> {
        self.tag.to_string().into_bytes()
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn values(&self) -> Option<&FieldValues> {
        self.values.as_ref()
    }
}

/// One entry of a message, component or group layout.
///
/// Component members hold the component *name*; the definition lives in
/// the protocol's component table. This keeps the recursive
/// fields ↔ components ↔ groups shape representable without reference
/// cycles and allows forward references while the table is being built.
#[derive(Clone, Debug, PartialEq)]
pub enum Member {
    Field {
        field: Arc<FieldDef>,
        required: bool,
    },
    Group {
        /// The NUMINGROUP field carrying the occurrence count.
        count: Arc<FieldDef>,
        required: bool,
        members: Vec<Member>,
    },
    Component {
        name: String,
        required: bool,
    },
}

impl Member {
    pub fn required(&self) -> bool {
        match self {
            Member::Field { required, .. }
            | Member::Group { required, .. }
            | Member::Component { required, .. } => *required,
        }
    }

    /// The field carrying this member on the wire (the count field for
    /// groups); `None` for component references.
    pub fn field(&self) -> Option<&Arc<FieldDef>> {
        match self {
            Member::Field { field, .. } => Some(field),
            Member::Group { count, .. } => Some(count),
            Member::Component { .. } => None,
        }
    }
}

/// A named, reusable member list flattened into its containing message.
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentDef {
    name: String,
    members: Vec<Member>,
}

impl ComponentDef {
    pub fn new(name: impl Into<String>, members: Vec<Member>) -> ComponentDef {
        ComponentDef {
            name: name.into(),
            members,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }
}

/// Message category: session-layer (`admin`) or business (`app`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MsgCat {
    Admin,
    App,
}

impl FromStr for MsgCat {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(MsgCat::Admin),
            "app" => Ok(MsgCat::App),
            other => Err(MetadataError::UnknownMsgCat(other.to_owned())),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MessageDef {
    name: String,
    msg_type: Vec<u8>,
    category: MsgCat,
    members: Vec<Member>,
}

impl MessageDef {
    pub fn new(
        name: impl Into<String>,
        msg_type: impl Into<Vec<u8>>,
        category: MsgCat,
        members: Vec<Member>,
    ) -> MessageDef {
        MessageDef {
            name: name.into(),
            msg_type: msg_type.into(),
            category,
            members,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The MsgType wire token, e.g. `b"A"` for Logon.
    pub fn msg_type(&self) -> &[u8] {
        &self.msg_type
    }

    pub fn category(&self) -> MsgCat {
        self.category
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }
}

/// Decoding behavior flags carried by the protocol.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProtocolOptions {
    /// Timestamps carry milliseconds (`YYYYMMDD-HH:MM:SS.sss`).
    pub millisecond_time: bool,
    /// Decode FLOAT-family fields as arbitrary precision decimals instead
    /// of binary floats.
    pub decimal_float: bool,
    /// Decode enumerated BOOLEAN fields to their logical names.
    pub bool_enum: bool,
}

impl Default for ProtocolOptions {
    fn default() -> ProtocolOptions {
        ProtocolOptions {
            millisecond_time: true,
            decimal_float: false,
            bool_enum: false,
        }
    }
}

/// Immutable description of one FIX protocol version.
#[derive(Debug, PartialEq)]
pub struct Protocol {
    version: String,
    begin_string: Vec<u8>,
    fields_by_name: IndexMap<String, Arc<FieldDef>>,
    fields_by_tag: HashMap<TagNum, Arc<FieldDef>>,
    components: IndexMap<String, ComponentDef>,
    messages_by_name: IndexMap<String, Arc<MessageDef>>,
    messages_by_type: HashMap<Vec<u8>, Arc<MessageDef>>,
    header: Vec<Member>,
    trailer: Vec<Member>,
    options: ProtocolOptions,
}

impl Protocol {
    pub fn version(&self) -> &str {
        &self.version
    }

    /// BeginString wire bytes, e.g. `b"FIX.4.4"`.
    pub fn begin_string(&self) -> &[u8] {
        &self.begin_string
    }

    pub fn field(&self, name: &str) -> Option<&Arc<FieldDef>> {
        self.fields_by_name.get(name)
    }

    pub fn field_by_tag(&self, tag: TagNum) -> Option<&Arc<FieldDef>> {
        self.fields_by_tag.get(&tag)
    }

    pub fn component(&self, name: &str) -> Option<&ComponentDef> {
        self.components.get(name)
    }

    pub fn message(&self, name: &str) -> Option<&Arc<MessageDef>> {
        self.messages_by_name.get(name)
    }

    pub fn message_by_type(&self, msg_type: &[u8]) -> Option<&Arc<MessageDef>> {
        self.messages_by_type.get(msg_type)
    }

    pub fn messages(&self) -> impl Iterator<Item = &Arc<MessageDef>> {
        self.messages_by_name.values()
    }

    pub fn header(&self) -> &[Member] {
        &self.header
    }

    pub fn trailer(&self) -> &[Member] {
        &self.trailer
    }

    pub fn millisecond_time(&self) -> bool {
        self.options.millisecond_time
    }

    pub fn decimal_float(&self) -> bool {
        self.options.decimal_float
    }

    pub fn bool_enum(&self) -> bool {
        self.options.bool_enum
    }

    /// Flatten a member list, resolving component references transparently
    /// while preserving wire order. Groups are yielded whole, their child
    /// lists stay nested.
    pub fn flatten<'a>(&'a self, members: &'a [Member]) -> MemberIter<'a> {
        MemberIter {
            components: &self.components,
            stack: vec![members.iter()],
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} fields, {} messages)",
            String::from_utf8_lossy(&self.begin_string),
            self.fields_by_name.len(),
            self.messages_by_name.len(),
        )
    }
}

/// Iterator produced by [`Protocol::flatten`].
#[derive(Debug)]
pub struct MemberIter<'a> {
    components: &'a IndexMap<String, ComponentDef>,
    stack: Vec<std::slice::Iter<'a, Member>>,
}

impl<'a> Iterator for MemberIter<'a> {
    type Item = &'a Member;

    fn next(&mut self) -> Option<&'a Member> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                None => {
                    self.stack.pop();
                }
                Some(Member::Component { name, .. }) => {
                    // Unresolvable names are rejected at build time.
                    if let Some(component) = self.components.get(name) {
                        self.stack.push(component.members.iter());
                    }
                }
                Some(member) => return Some(member),
            }
        }
    }
}

/// Two-phase construction of a [`Protocol`]: register fields, components
/// and messages in any order, then `build` verifies the cross references
/// and structural invariants.
#[derive(Debug)]
pub struct ProtocolBuilder {
    version: String,
    begin_string: Vec<u8>,
    options: ProtocolOptions,
    fields_by_name: IndexMap<String, Arc<FieldDef>>,
    fields_by_tag: HashMap<TagNum, Arc<FieldDef>>,
    components: IndexMap<String, ComponentDef>,
    messages: Vec<MessageDef>,
    header: Vec<Member>,
    trailer: Vec<Member>,
}

impl ProtocolBuilder {
    pub fn new(version: impl Into<String>, begin_string: impl Into<Vec<u8>>) -> ProtocolBuilder {
        ProtocolBuilder {
            version: version.into(),
            begin_string: begin_string.into(),
            options: ProtocolOptions::default(),
            fields_by_name: IndexMap::new(),
            fields_by_tag: HashMap::new(),
            components: IndexMap::new(),
            messages: Vec::new(),
            header: Vec::new(),
            trailer: Vec::new(),
        }
    }

    pub fn options(&mut self, options: ProtocolOptions) -> &mut Self {
        self.options = options;
        self
    }

    pub fn field(&mut self, field: FieldDef) -> Result<&mut Self, MetadataError> {
        if let Some(existing) = self.fields_by_tag.get(&field.tag()) {
            return Err(MetadataError::DuplicateTag {
                tag: field.tag(),
                first: existing.name().to_owned(),
                second: field.name().to_owned(),
            });
        }
        if self.fields_by_name.contains_key(field.name()) {
            return Err(MetadataError::DuplicateField(field.name().to_owned()));
        }
        let field = Arc::new(field);
        self.fields_by_tag.insert(field.tag(), field.clone());
        self.fields_by_name.insert(field.name().to_owned(), field);
        Ok(self)
    }

    /// Look up an already registered field, for building member lists.
    pub fn field_ref(&self, name: &str) -> Option<&Arc<FieldDef>> {
        self.fields_by_name.get(name)
    }

    pub fn component(&mut self, component: ComponentDef) -> &mut Self {
        self.components
            .insert(component.name().to_owned(), component);
        self
    }

    pub fn message(&mut self, message: MessageDef) -> &mut Self {
        self.messages.push(message);
        self
    }

    pub fn header(&mut self, members: Vec<Member>) -> &mut Self {
        self.header = members;
        self
    }

    pub fn trailer(&mut self, members: Vec<Member>) -> &mut Self {
        self.trailer = members;
        self
    }

    pub fn build(self) -> Result<Protocol, MetadataError> {
        let ProtocolBuilder {
            version,
            begin_string,
            options,
            fields_by_name,
            fields_by_tag,
            components,
            messages,
            header,
            trailer,
        } = self;

        for component in components.values() {
            check_references(&components, component.name(), component.members())?;
        }
        check_references(&components, "header", &header)?;
        check_references(&components, "trailer", &trailer)?;

        let mut messages_by_name = IndexMap::new();
        let mut messages_by_type: HashMap<Vec<u8>, Arc<MessageDef>> = HashMap::new();
        for message in messages {
            check_references(&components, message.name(), message.members())?;
            if let Some(existing) = messages_by_type.get(message.msg_type()) {
                return Err(MetadataError::DuplicateMsgType {
                    msg_type: String::from_utf8_lossy(message.msg_type()).into_owned(),
                    first: existing.name().to_owned(),
                    second: message.name().to_owned(),
                });
            }
            let message = Arc::new(message);
            messages_by_type.insert(message.msg_type().to_owned(), message.clone());
            messages_by_name.insert(message.name().to_owned(), message);
        }

        let protocol = Protocol {
            version,
            begin_string,
            fields_by_name,
            fields_by_tag,
            components,
            messages_by_name,
            messages_by_type,
            header,
            trailer,
            options,
        };

        let header_names: Vec<&str> = protocol
            .flatten(&protocol.header)
            .take(3)
            .filter_map(|m| m.field().map(|f| f.name()))
            .collect();
        if header_names != ["BeginString", "BodyLength", "MsgType"] {
            return Err(MetadataError::MalformedHeader);
        }
        match protocol.flatten(&protocol.trailer).last() {
            Some(member) if member.field().is_some_and(|f| f.name() == "CheckSum") => {}
            _ => return Err(MetadataError::MalformedTrailer),
        }

        Ok(protocol)
    }
}

fn check_references(
    components: &IndexMap<String, ComponentDef>,
    owner: &str,
    members: &[Member],
) -> Result<(), MetadataError> {
    for member in members {
        match member {
            Member::Field { .. } => {}
            Member::Group { members, .. } => check_references(components, owner, members)?,
            Member::Component { name, .. } => {
                // Nested references are covered when the referenced
                // component is checked as an owner itself.
                if !components.contains_key(name) {
                    return Err(MetadataError::UnknownComponent {
                        owner: owner.to_owned(),
                        component: name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

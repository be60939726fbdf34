//! QuickFIX dictionary loader.
//!
//! Reads the standard QuickFIX XML layout (`<fix major=".." minor="..">`
//! with `header`, `trailer`, `messages`, `components` and `fields`
//! sections) and produces an immutable [`Protocol`].

use std::{fs, path::Path};

use anyhow::{Context as ErrorContext, Result, anyhow, bail};
use xmltree::{Element, XMLNode};

use crate::protocol::{
    ComponentDef, FieldDef, FieldValues, Member, MessageDef, Protocol, ProtocolBuilder,
    ProtocolOptions,
};

#[cfg(test)]
mod tests;

trait XmlHelper {
    fn get_attribute(&self, attribute: &str) -> Result<&str>;
    fn get_child_element(&self, child: &str) -> Result<&Element>;
    fn child_elements(&self) -> impl Iterator<Item = &Element>;
}

impl XmlHelper for Element {
    fn get_attribute(&self, attribute: &str) -> Result<&str> {
        self.attributes
            .get(attribute)
            .map(String::as_ref)
            .ok_or_else(|| anyhow!("no `{}` attribute in `{}` element", attribute, self.name))
    }

    fn get_child_element(&self, child: &str) -> Result<&Element> {
        self.get_child(child)
            .ok_or_else(|| anyhow!("no `{}` child in `{}` element", child, self.name))
    }

    fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(XMLNode::as_element)
    }
}

fn parse_yes_no(input: &str) -> Result<bool> {
    match input {
        "Y" | "YES" | "y" | "yes" => Ok(true),
        "N" | "NO" | "n" | "no" => Ok(false),
        unexpected => Err(anyhow!(
            "parse yes/no failed, unexpected value `{}`",
            unexpected
        )),
    }
}

fn parse_field(element: &Element) -> Result<FieldDef> {
    let name = element.get_attribute("name")?;
    if !name.is_ascii() {
        bail!("Non ASCII characters in field name: {}", name);
    }
    let number = element
        .get_attribute("number")?
        .parse()
        .with_context(|| format!("Failed to parse tag number of `{name}`"))?;
    let field_type = element
        .get_attribute("type")?
        .parse()
        .with_context(|| format!("Failed to parse type of `{name}`"))?;

    let mut values = FieldValues::new();
    for child in element.child_elements() {
        if child.name != "value" {
            bail!("Expected `value` node, found `{}`", child.name);
        }
        let token = child.get_attribute("enum")?;
        let description = child.get_attribute("description")?;
        if !token.is_ascii() || !description.is_ascii() {
            bail!("Non ASCII characters in enum value of `{}`", name);
        }
        values.insert(token.as_bytes().to_vec(), description);
    }

    Ok(FieldDef::new(
        name,
        number,
        field_type,
        (!values.is_empty()).then_some(values),
    ))
}

fn parse_members(builder: &ProtocolBuilder, element: &Element) -> Result<Vec<Member>> {
    let mut members = Vec::new();
    for child in element.child_elements() {
        let name = child.get_attribute("name")?;
        let required = parse_yes_no(child.get_attribute("required")?)?;
        match child.name.as_str() {
            "field" => {
                let field = builder
                    .field_ref(name)
                    .ok_or_else(|| anyhow!("member references unknown field `{}`", name))?
                    .clone();
                members.push(Member::Field { field, required });
            }
            "group" => {
                let count = builder
                    .field_ref(name)
                    .ok_or_else(|| anyhow!("group references unknown count field `{}`", name))?
                    .clone();
                members.push(Member::Group {
                    count,
                    required,
                    members: parse_members(builder, child)?,
                });
            }
            "component" => {
                members.push(Member::Component {
                    name: name.to_owned(),
                    required,
                });
            }
            unexpected => bail!("Unexpected member kind `{}`", unexpected),
        }
    }
    Ok(members)
}

/// Load a protocol from QuickFIX dictionary XML.
pub fn load_str(xml: &str) -> Result<Protocol> {
    load_str_with(xml, ProtocolOptions::default())
}

pub fn load_str_with(xml: &str, options: ProtocolOptions) -> Result<Protocol> {
    let root = Element::parse(xml.as_bytes()).context("Failed to parse FIX description")?;
    if root.name != "fix" {
        bail!("Expected `fix` root element, found `{}`", root.name);
    }

    let major = root.get_attribute("major")?;
    let minor = root.get_attribute("minor")?;
    let version = format!("{major}.{minor}");
    let begin_string = format!("FIX.{major}.{minor}").into_bytes();

    let mut builder = ProtocolBuilder::new(version, begin_string);
    builder.options(options);

    for element in root.get_child_element("fields")?.child_elements() {
        if element.name != "field" {
            bail!("Expected `field` node, found `{}`", element.name);
        }
        let field = parse_field(element)?;
        let name = field.name().to_owned();
        builder
            .field(field)
            .with_context(|| format!("Failed to register field `{name}`"))?;
    }

    if let Some(components) = root.get_child("components") {
        for element in components.child_elements() {
            if element.name != "component" {
                bail!("Expected `component` node, found `{}`", element.name);
            }
            let name = element.get_attribute("name")?.to_owned();
            let members = parse_members(&builder, element)
                .with_context(|| format!("Failed to process component `{name}`"))?;
            builder.component(ComponentDef::new(name, members));
        }
    }

    let header = parse_members(&builder, root.get_child_element("header")?)
        .context("Failed to process header")?;
    let trailer = parse_members(&builder, root.get_child_element("trailer")?)
        .context("Failed to process trailer")?;
    builder.header(header).trailer(trailer);

    for element in root.get_child_element("messages")?.child_elements() {
        if element.name != "message" {
            bail!("Expected `message` node, found `{}`", element.name);
        }
        let name = element.get_attribute("name")?.to_owned();
        let msg_type = element.get_attribute("msgtype")?.as_bytes().to_vec();
        let category = element
            .get_attribute("msgcat")?
            .parse()
            .with_context(|| format!("Failed to parse category of `{name}`"))?;
        let members = parse_members(&builder, element)
            .with_context(|| format!("Failed to process message `{name}`"))?;
        builder.message(MessageDef::new(name, msg_type, category, members));
    }

    builder.build().context("Invalid protocol description")
}

/// Load a protocol from a QuickFIX dictionary file.
pub fn load_file(path: impl AsRef<Path>) -> Result<Protocol> {
    load_file_with(path, ProtocolOptions::default())
}

pub fn load_file_with(path: impl AsRef<Path>, options: ProtocolOptions) -> Result<Protocol> {
    let path = path.as_ref();
    let xml = fs::read_to_string(path)
        .with_context(|| format!("Failed to read dictionary from {}", path.display()))?;
    load_str_with(&xml, options)
}

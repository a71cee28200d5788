use anyhow::Result;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, trace};

use crate::collect::global_variables::{DEFAULT_CATEGORY, UNNAMED_FEATURE};
use crate::error::KmzError;
use crate::geometric::feature::{Categories, Feature, KmlGeometry};

/// Element of the raw XML tree, keyed by local name (namespace prefix dropped)
#[derive(Debug, Default, Clone)]
pub struct XmlElement {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn new(name: String) -> Self {
        XmlElement {
            name,
            ..Default::default()
        }
    }

    /// First direct child with the given local name
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// First descendant (document order, self excluded) with the given local name
    pub fn descendant(&self, name: &str) -> Option<&XmlElement> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.descendant(name) {
                return Some(found);
            }
        }
        None
    }

    /// Every descendant with the given local name, in document order
    pub fn descendants<'a>(&'a self, name: &str, out: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            }
            child.descendants(name, out);
        }
    }
}

/// Parse a KML document into an element tree.
/// Text is kept verbatim, whitespace included.
pub fn parse_tree(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader.read_event().map_err(|source| KmzError::Xml {
            position: reader.buffer_position(),
            source,
        })?;

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push(XmlElement::new(name));
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                attach(&mut stack, &mut root, XmlElement::new(name));
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    KmzError::UnbalancedXml("closing tag without opening tag".to_string())
                })?;
                attach(&mut stack, &mut root, element);
            }
            Event::Text(e) => {
                if let Some(current) = stack.last_mut() {
                    let text = e.unescape().map_err(|source| KmzError::Xml {
                        position: reader.buffer_position(),
                        source,
                    })?;
                    current.text.push_str(&text);
                }
            }
            Event::CData(e) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::Eof => break,
            _ => (),
        }
    }

    if let Some(open) = stack.last() {
        return Err(KmzError::UnbalancedXml(format!("<{}> is never closed", open.name)).into());
    }
    root.ok_or_else(|| KmzError::UnbalancedXml("document has no root element".to_string()).into())
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        // Only the first top-level element is the document
        None if root.is_none() => *root = Some(element),
        None => (),
    }
}

/// Placemark payload
#[derive(Debug, Clone, PartialEq)]
pub struct Placemark {
    pub name: Option<String>,
    pub description: Option<String>,
    pub geometry: Option<KmlGeometry>,
}

/// KML element classified by what it means for feature grouping
#[derive(Debug, Clone, PartialEq)]
pub enum KmlNode {
    /// Opens a new category named after its <name>
    Folder {
        name: Option<String>,
        children: Vec<KmlNode>,
    },
    Placemark(Placemark),
    /// Any other element; walked through without changing the category
    Container(Vec<KmlNode>),
}

impl From<&XmlElement> for KmlNode {
    fn from(element: &XmlElement) -> Self {
        match element.name.as_str() {
            "Folder" => KmlNode::Folder {
                name: element.child("name").map(|n| n.text.trim().to_string()),
                children: element.children.iter().map(KmlNode::from).collect(),
            },
            "Placemark" => KmlNode::Placemark(Placemark {
                name: element.child("name").map(|n| n.text.trim().to_string()),
                description: element.child("description").map(|d| d.text.clone()),
                geometry: placemark_geometry(element),
            }),
            _ => KmlNode::Container(element.children.iter().map(KmlNode::from).collect()),
        }
    }
}

/// A Point anywhere below the placemark wins over a Polygon
fn placemark_geometry(placemark: &XmlElement) -> Option<KmlGeometry> {
    if let Some(point) = placemark.descendant("Point") {
        let coords = point
            .child("coordinates")
            .map(|c| parse_coordinates(&c.text))
            .unwrap_or_default();
        return KmlGeometry::point_from(&coords);
    }

    let polygon = placemark.descendant("Polygon")?;
    let exterior = polygon
        .child("outerBoundaryIs")
        .and_then(|outer| outer.descendant("coordinates"))
        .or_else(|| polygon.descendant("coordinates"))
        .map(|c| parse_coordinates(&c.text))
        .unwrap_or_default();

    let mut inner_boundaries = Vec::new();
    polygon.descendants("innerBoundaryIs", &mut inner_boundaries);
    let interiors: Vec<Vec<(f64, f64)>> = inner_boundaries
        .iter()
        .filter_map(|inner| inner.descendant("coordinates"))
        .map(|c| parse_coordinates(&c.text))
        .collect();

    KmlGeometry::polygon_from(&exterior, &interiors)
}

/// Parse KML coordinate text (`lon,lat[,alt]` tuples separated by whitespace).
/// Tokens that do not hold two numbers are skipped.
pub fn parse_coordinates(text: &str) -> Vec<(f64, f64)> {
    text.split_whitespace()
        .filter_map(|token| {
            let parsed = parse_pt(token);
            if parsed.is_none() {
                trace!("Skipping malformed coordinate {:?}", token);
            }
            parsed
        })
        .collect()
}

fn parse_pt(input: &str) -> Option<(f64, f64)> {
    let coords: Vec<&str> = input.split(',').collect();
    // The altitude component is optional and ignored
    if coords.len() < 2 {
        return None;
    }
    match (coords[0].parse::<f64>(), coords[1].parse::<f64>()) {
        (Ok(lon), Ok(lat)) => Some((lon, lat)),
        _ => None,
    }
}

/// Append every placemark below `node` to `categories`, under the enclosing folder name
pub fn walk(node: &KmlNode, folder: &str, categories: &mut Categories) {
    match node {
        KmlNode::Folder { name, children } => {
            let current = name
                .as_deref()
                .filter(|n| !n.is_empty())
                .unwrap_or(folder);
            debug!("Entering folder {:?}", current);
            for child in children {
                walk(child, current, categories);
            }
        }
        KmlNode::Placemark(placemark) => {
            if let Some(geometry) = &placemark.geometry {
                categories.push(
                    folder,
                    Feature {
                        name: placemark
                            .name
                            .clone()
                            .unwrap_or_else(|| UNNAMED_FEATURE.to_string()),
                        description: placemark.description.clone().unwrap_or_default(),
                        geometry: geometry.clone(),
                    },
                );
            }
        }
        KmlNode::Container(children) => {
            for child in children {
                walk(child, folder, categories);
            }
        }
    }
}

/// Parse a KML document and group its features by folder
pub fn extract_features(xml: &str) -> Result<Categories> {
    let tree = parse_tree(xml)?;
    let root = KmlNode::from(&tree);

    let mut categories = Categories::new();
    walk(&root, DEFAULT_CATEGORY, &mut categories);

    Ok(categories)
}

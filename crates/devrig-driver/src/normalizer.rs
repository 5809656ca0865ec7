//! Hierarchy normalization
//!
//! Converts backend UI snapshots into the canonical tree and renders the
//! canonical tree back to XML. Two source flavors are recognized:
//!
//! - **XCUI**: Appium/WebDriverAgent page sources (`AppiumAUT` root or
//!   `XCUIElementType*` tags) with x/y/width/height geometry.
//! - **UiAutomator**: `<hierarchy>` documents from `uiautomator dump`, Appium
//!   Android page sources (class names as tags) and devrig's own canonical
//!   output. Attribute rules for this flavor are written so that canonical input
//!   maps to itself, which makes normalization idempotent.

use devrig_core::prelude::*;
use devrig_core::{canonical, Bounds, TreeNode, ViewHierarchy};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;

/// Class of Android toasts, which are exempt from bounds filtering
pub const TOAST_CLASS_NAME: &str = "android.widget.Toast";

/// Tags that wrap a hierarchy rather than describe an element
const CONTAINER_TAGS: [&str; 2] = ["hierarchy", "AppiumAUT"];

// ─────────────────────────────────────────────────────────────────
// Raw XML tree
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct RawNode {
    tag: String,
    attributes: BTreeMap<String, String>,
    children: Vec<RawNode>,
}

impl RawNode {
    fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// First of `keys` carrying a non-empty value
    fn first_non_empty(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.get(k))
            .find(|v| !v.is_empty())
    }

    fn any_tag(&self, pred: &dyn Fn(&str) -> bool) -> bool {
        pred(&self.tag) || self.children.iter().any(|c| c.any_tag(pred))
    }
}

fn raw_from_start(e: &BytesStart<'_>) -> Result<RawNode> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attributes = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| {
            Error::malformed_hierarchy(format!("bad attribute on <{}>: {}", tag, err))
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| {
                Error::malformed_hierarchy(format!("bad value for {} on <{}>: {}", key, tag, err))
            })?
            .into_owned();
        attributes.insert(key, value);
    }
    Ok(RawNode {
        tag,
        attributes,
        children: Vec::new(),
    })
}

fn attach(stack: &mut [RawNode], root: &mut Option<RawNode>, node: RawNode) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        Ok(())
    } else if root.is_none() {
        *root = Some(node);
        Ok(())
    } else {
        Err(Error::malformed_hierarchy("document has more than one root"))
    }
}

fn parse_raw(xml: &str) -> Result<RawNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<RawNode> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(raw_from_start(&e)?),
            Ok(Event::Empty(e)) => {
                let node = raw_from_start(&e)?;
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| Error::malformed_hierarchy("unexpected closing tag"))?;
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::malformed_hierarchy(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(Error::malformed_hierarchy(format!(
            "element <{}> is never closed",
            open.tag
        )));
    }

    root.ok_or_else(|| Error::malformed_hierarchy("document has no root element"))
}

// ─────────────────────────────────────────────────────────────────
// Flavors
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Xcui,
    UiAutomator,
}

fn detect_flavor(root: &RawNode) -> Flavor {
    if root.tag == "AppiumAUT" || root.any_tag(&|t| t.starts_with("XCUIElementType")) {
        Flavor::Xcui
    } else {
        Flavor::UiAutomator
    }
}

/// Attributes copied verbatim when present on a UiAutomator node
const DIRECT_COPY: [&str; 16] = [
    canonical::TEXT,
    canonical::HINT_TEXT,
    canonical::RESOURCE_ID,
    canonical::PACKAGE,
    canonical::INDEX,
    canonical::CHECKABLE,
    canonical::CHECKED,
    canonical::CLICKABLE,
    canonical::ENABLED,
    canonical::FOCUSABLE,
    canonical::FOCUSED,
    canonical::SCROLLABLE,
    canonical::LONG_CLICKABLE,
    canonical::PASSWORD,
    canonical::SELECTED,
    canonical::TITLE,
];

/// Canonical key and the backend keys it is read from, in priority order
const RENAMES: [(&str, &[&str]); 2] = [
    (
        canonical::ACCESSIBILITY_TEXT,
        &[canonical::ACCESSIBILITY_TEXT, "content-desc"],
    ),
    (
        canonical::VISIBLE_TO_USER,
        &[canonical::VISIBLE_TO_USER, "displayed", "visible"],
    ),
];

fn canonical_bounds(raw: &RawNode) -> Option<String> {
    if let Some(literal) = raw.get(canonical::BOUNDS) {
        return Some(match Bounds::parse(literal) {
            Some(b) => b.to_string(),
            None => literal.to_string(),
        });
    }
    rect_bounds(raw).map(|b| b.to_string())
}

fn rect_bounds(raw: &RawNode) -> Option<Bounds> {
    let n = |k: &str| raw.get(k).and_then(|v| v.trim().parse::<f64>().ok());
    Some(Bounds::from_rect(
        n("x")? as i32,
        n("y")? as i32,
        n("width")? as i32,
        n("height")? as i32,
    ))
}

fn uiautomator_attributes(raw: &RawNode) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();

    for key in DIRECT_COPY {
        if let Some(v) = raw.get(key) {
            out.insert(key.to_string(), v.to_string());
        }
    }

    for (target, sources) in RENAMES {
        if let Some(v) = sources.iter().find_map(|k| raw.get(k)) {
            out.insert(target.to_string(), v.to_string());
        }
    }
    out.entry(canonical::VISIBLE_TO_USER.to_string())
        .or_insert_with(|| "false".to_string());

    let class = raw
        .get(canonical::CLASS)
        .map(str::to_string)
        .or_else(|| (raw.tag != "node").then(|| raw.tag.clone()));
    let is_toast = class.as_deref() == Some(TOAST_CLASS_NAME);
    if let Some(class) = class {
        out.insert(canonical::CLASS.to_string(), class);
    }

    if let Some(bounds) = canonical_bounds(raw) {
        out.insert(canonical::BOUNDS.to_string(), bounds);
    }

    let ignore = is_toast || raw.get(canonical::IGNORE_BOUNDS_FILTERING) == Some("true");
    out.insert(
        canonical::IGNORE_BOUNDS_FILTERING.to_string(),
        ignore.to_string(),
    );

    out
}

fn xcui_attributes(raw: &RawNode) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut set = |k: &str, v: &str| {
        out.insert(k.to_string(), v.to_string());
    };

    set(canonical::CLASS, &raw.tag);
    set(
        canonical::TEXT,
        raw.first_non_empty(&["value", "label", "name"]).unwrap_or(""),
    );
    set(canonical::ACCESSIBILITY_TEXT, raw.get("label").unwrap_or(""));
    set(
        canonical::RESOURCE_ID,
        raw.first_non_empty(&["name", "label"]).unwrap_or(""),
    );

    let visible = raw
        .get("visible")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    set(canonical::VISIBLE_TO_USER, if visible { "true" } else { "false" });

    let enabled = raw.get("enabled").unwrap_or("false");
    set(canonical::ENABLED, enabled);
    set(canonical::CLICKABLE, enabled);
    set(canonical::FOCUSABLE, raw.get("accessible").unwrap_or("false"));

    for key in [
        canonical::CHECKABLE,
        canonical::CHECKED,
        canonical::FOCUSED,
        canonical::SCROLLABLE,
        canonical::LONG_CLICKABLE,
        canonical::PASSWORD,
        canonical::SELECTED,
        canonical::IGNORE_BOUNDS_FILTERING,
    ] {
        set(key, "false");
    }
    set(canonical::HINT_TEXT, "");
    set(canonical::PACKAGE, "");

    if let Some(bounds) = rect_bounds(raw) {
        set(canonical::BOUNDS, &bounds.to_string());
    }

    out
}

fn convert(raw: &RawNode, flavor: Flavor) -> TreeNode {
    let attributes = match flavor {
        Flavor::Xcui => xcui_attributes(raw),
        Flavor::UiAutomator => uiautomator_attributes(raw),
    };
    let children = raw.children.iter().map(|c| convert(c, flavor)).collect();
    TreeNode::new(attributes, children)
}

// ─────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────

/// Parse a backend snapshot into the canonical hierarchy
pub fn normalize(xml: &str) -> Result<ViewHierarchy> {
    let raw = parse_raw(xml)?;
    let flavor = detect_flavor(&raw);

    let rotation = raw
        .get("rotation")
        .and_then(|r| r.trim().parse::<u32>().ok())
        .unwrap_or(0);

    let children = if CONTAINER_TAGS.contains(&raw.tag.as_str()) {
        raw.children.iter().map(|c| convert(c, flavor)).collect()
    } else {
        vec![convert(&raw, flavor)]
    };

    trace!(
        "Normalized {:?} hierarchy with {} top-level nodes",
        flavor,
        children.len()
    );

    Ok(ViewHierarchy {
        rotation,
        root: TreeNode::new(BTreeMap::new(), children),
    })
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &TreeNode) -> Result<()> {
    let mut elem = BytesStart::new("node");
    for (k, v) in &node.attributes {
        elem.push_attribute((k.as_str(), v.as_str()));
    }
    if node.children.is_empty() {
        writer
            .write_event(Event::Empty(elem))
            .map_err(|e| Error::protocol(format!("failed to write hierarchy: {}", e)))?;
        return Ok(());
    }
    writer
        .write_event(Event::Start(elem))
        .map_err(|e| Error::protocol(format!("failed to write hierarchy: {}", e)))?;
    for child in &node.children {
        write_node(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("node")))
        .map_err(|e| Error::protocol(format!("failed to write hierarchy: {}", e)))?;
    Ok(())
}

/// Render a canonical hierarchy as `<hierarchy rotation="..">` XML
pub fn to_xml(hierarchy: &ViewHierarchy) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    let rotation = hierarchy.rotation.to_string();
    let mut root = BytesStart::new("hierarchy");
    root.push_attribute(("rotation", rotation.as_str()));
    writer
        .write_event(Event::Start(root))
        .map_err(|e| Error::protocol(format!("failed to write hierarchy: {}", e)))?;

    for child in &hierarchy.root.children {
        write_node(&mut writer, child)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("hierarchy")))
        .map_err(|e| Error::protocol(format!("failed to write hierarchy: {}", e)))?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| Error::protocol(format!("hierarchy is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UIAUTOMATOR_DUMP: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="1">
  <node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="com.example" content-desc="" clickable="false" enabled="true" bounds="[0,0][1080,2400]">
    <node index="0" text="Sign in" resource-id="com.example:id/login" class="android.widget.Button" package="com.example" content-desc="Sign in button" clickable="true" enabled="true" focused="false" displayed="true" bounds="[100,200][980,320]" />
    <node index="1" text="Saved" class="android.widget.Toast" bounds="[0,3000][10,3010]" />
  </node>
</hierarchy>"#;

    const XCUI_SOURCE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<AppiumAUT>
  <XCUIElementTypeApplication type="XCUIElementTypeApplication" name="Settings" label="Settings" enabled="true" visible="true" accessible="false" x="0" y="0" width="390" height="844">
    <XCUIElementTypeButton type="XCUIElementTypeButton" name="General" label="General" enabled="true" visible="TRUE" accessible="true" x="10" y="20" width="100" height="50"/>
    <XCUIElementTypeStaticText value="On" label="Wi-Fi" enabled="false" visible="false" x="0" y="100" width="50" height="20"/>
  </XCUIElementTypeApplication>
</AppiumAUT>"#;

    #[test]
    fn test_uiautomator_dump_keeps_shape() {
        let h = normalize(UIAUTOMATOR_DUMP).unwrap();
        assert_eq!(h.rotation, 1);
        assert_eq!(h.root.children.len(), 1);
        assert_eq!(h.root.children[0].children.len(), 2);
    }

    #[test]
    fn test_uiautomator_attribute_mapping() {
        let h = normalize(UIAUTOMATOR_DUMP).unwrap();
        let button = &h.root.children[0].children[0];
        assert_eq!(button.attr("accessibilityText"), Some("Sign in button"));
        assert_eq!(button.attr("visible-to-user"), Some("true"));
        assert_eq!(button.attr("ignoreBoundsFiltering"), Some("false"));
        assert_eq!(button.attr("content-desc"), None);
        assert_eq!(button.clickable, Some(true));
        assert_eq!(button.focused, Some(false));
    }

    #[test]
    fn test_toast_ignores_bounds_filtering() {
        let h = normalize(UIAUTOMATOR_DUMP).unwrap();
        let toast = &h.root.children[0].children[1];
        assert_eq!(toast.attr("ignoreBoundsFiltering"), Some("true"));
    }

    #[test]
    fn test_displayed_maps_to_visible_to_user() {
        let h = normalize(r#"<hierarchy><node displayed="true"/></hierarchy>"#).unwrap();
        assert_eq!(h.root.children[0].attr("visible-to-user"), Some("true"));
    }

    #[test]
    fn test_visible_is_fallback_for_displayed() {
        let h = normalize(r#"<hierarchy><node visible="true"/></hierarchy>"#).unwrap();
        assert_eq!(h.root.children[0].attr("visible-to-user"), Some("true"));

        let h = normalize(r#"<hierarchy><node/></hierarchy>"#).unwrap();
        assert_eq!(h.root.children[0].attr("visible-to-user"), Some("false"));
    }

    #[test]
    fn test_appium_android_uses_tag_as_class() {
        let xml = r#"<hierarchy rotation="0"><android.widget.TextView text="Hi" displayed="true" bounds="[0,0][10,10]"/></hierarchy>"#;
        let h = normalize(xml).unwrap();
        assert_eq!(h.root.children[0].attr("class"), Some("android.widget.TextView"));
    }

    #[test]
    fn test_xcui_mapping() {
        let h = normalize(XCUI_SOURCE).unwrap();
        let app = &h.root.children[0];
        assert_eq!(app.attr("class"), Some("XCUIElementTypeApplication"));

        let button = &app.children[0];
        assert_eq!(button.attr("text"), Some("General"));
        assert_eq!(button.attr("accessibilityText"), Some("General"));
        assert_eq!(button.attr("resource-id"), Some("General"));
        assert_eq!(button.attr("bounds"), Some("[10,20][110,70]"));
        assert_eq!(button.attr("visible-to-user"), Some("true"));
        assert_eq!(button.attr("focusable"), Some("true"));
        assert_eq!(button.clickable, Some(true));

        let text = &app.children[1];
        assert_eq!(text.attr("text"), Some("On"));
        assert_eq!(text.attr("resource-id"), Some("Wi-Fi"));
        assert_eq!(text.clickable, Some(false));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        for source in [UIAUTOMATOR_DUMP, XCUI_SOURCE] {
            let once = normalize(source).unwrap();
            let twice = normalize(&to_xml(&once).unwrap()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_output_only_uses_canonical_keys() {
        for source in [UIAUTOMATOR_DUMP, XCUI_SOURCE] {
            let h = normalize(source).unwrap();
            for node in h.root.iter() {
                for key in node.attributes.keys() {
                    assert!(canonical::is_canonical(key), "unexpected key {}", key);
                }
            }
        }
    }

    #[test]
    fn test_to_xml_has_rotation_root() {
        let h = normalize(UIAUTOMATOR_DUMP).unwrap();
        let xml = to_xml(&h).unwrap();
        assert!(xml.starts_with(r#"<hierarchy rotation="1">"#));
        assert!(xml.contains(r#"accessibilityText="Sign in button""#));
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            normalize("<hierarchy><node></hierarchy>"),
            Err(Error::MalformedHierarchy { .. })
        ));
        assert!(matches!(
            normalize(""),
            Err(Error::MalformedHierarchy { .. })
        ));
        assert!(matches!(
            normalize("<hierarchy>"),
            Err(Error::MalformedHierarchy { .. })
        ));
    }
}

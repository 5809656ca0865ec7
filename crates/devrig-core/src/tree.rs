//! # Canonical UI Tree
//!
//! Backend-independent view hierarchy produced by the hierarchy normalizer in
//! `devrig-driver`. Every backend snapshot (UiAutomator dumps, XCUITest page
//! sources, hub page sources) ends up as a [`TreeNode`] whose attribute keys are
//! drawn from [`canonical`].
//!
//! ## Key Types
//!
//! - [`TreeNode`] - One element with ordered children and canonical attributes
//! - [`ViewHierarchy`] - Root node plus the screen rotation it was captured at
//! - [`Bounds`] - Parsed `[x1,y1][x2,y2]` rectangle

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// Canonical attribute keys
pub mod canonical {
    pub const TEXT: &str = "text";
    pub const HINT_TEXT: &str = "hintText";
    pub const ACCESSIBILITY_TEXT: &str = "accessibilityText";
    pub const RESOURCE_ID: &str = "resource-id";
    pub const CLASS: &str = "class";
    pub const PACKAGE: &str = "package";
    pub const BOUNDS: &str = "bounds";
    pub const VISIBLE_TO_USER: &str = "visible-to-user";
    pub const IGNORE_BOUNDS_FILTERING: &str = "ignoreBoundsFiltering";
    pub const INDEX: &str = "index";
    pub const CHECKABLE: &str = "checkable";
    pub const CHECKED: &str = "checked";
    pub const CLICKABLE: &str = "clickable";
    pub const ENABLED: &str = "enabled";
    pub const FOCUSABLE: &str = "focusable";
    pub const FOCUSED: &str = "focused";
    pub const SCROLLABLE: &str = "scrollable";
    pub const LONG_CLICKABLE: &str = "long-clickable";
    pub const PASSWORD: &str = "password";
    pub const SELECTED: &str = "selected";
    pub const TITLE: &str = "title";
    pub const VALUE: &str = "value";

    /// The complete vocabulary; no other key ever appears on a canonical node
    pub const ALL: [&str; 22] = [
        TEXT,
        HINT_TEXT,
        ACCESSIBILITY_TEXT,
        RESOURCE_ID,
        CLASS,
        PACKAGE,
        BOUNDS,
        VISIBLE_TO_USER,
        IGNORE_BOUNDS_FILTERING,
        INDEX,
        CHECKABLE,
        CHECKED,
        CLICKABLE,
        ENABLED,
        FOCUSABLE,
        FOCUSED,
        SCROLLABLE,
        LONG_CLICKABLE,
        PASSWORD,
        SELECTED,
        TITLE,
        VALUE,
    ];

    pub fn is_canonical(key: &str) -> bool {
        ALL.contains(&key)
    }
}

/// Resource-id prefix of the system soft keyboard
pub const KEYBOARD_RESOURCE_PREFIX: &str = "com.google.android.inputmethod.latin:id/";

// ─────────────────────────────────────────────────────────────────
// Bounds
// ─────────────────────────────────────────────────────────────────

static BOUNDS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]$").expect("bounds regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Bounds {
    pub fn from_rect(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x1: x,
            y1: y,
            x2: x + width,
            y2: y + height,
        }
    }

    /// Parse the canonical `[x1,y1][x2,y2]` form (whitespace tolerated)
    pub fn parse(s: &str) -> Option<Self> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let caps = BOUNDS_PATTERN.captures(&compact)?;
        let n = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<i32>().ok());
        Some(Self {
            x1: n(1)?,
            y1: n(2)?,
            x2: n(3)?,
            y2: n(4)?,
        })
    }

    /// True when no part of the rectangle overlaps a `width` x `height` screen
    pub fn is_outside(&self, width: i32, height: i32) -> bool {
        self.x2 <= 0 || self.y2 <= 0 || self.x1 >= width || self.y1 >= height
    }

    pub fn center(&self) -> crate::Point {
        crate::Point::new((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}][{},{}]", self.x1, self.y1, self.x2, self.y2)
    }
}

// ─────────────────────────────────────────────────────────────────
// TreeNode
// ─────────────────────────────────────────────────────────────────

/// A node of the canonical tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub attributes: BTreeMap<String, String>,

    #[serde(default)]
    pub children: Vec<TreeNode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub clickable: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub focused: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
}

fn flag(attributes: &BTreeMap<String, String>, key: &str) -> Option<bool> {
    attributes.get(key).map(|v| v == "true")
}

impl TreeNode {
    /// Build a node, deriving the boolean flags from the attribute mapping
    pub fn new(attributes: BTreeMap<String, String>, children: Vec<TreeNode>) -> Self {
        Self {
            clickable: flag(&attributes, canonical::CLICKABLE),
            enabled: flag(&attributes, canonical::ENABLED),
            focused: flag(&attributes, canonical::FOCUSED),
            checked: flag(&attributes, canonical::CHECKED),
            selected: flag(&attributes, canonical::SELECTED),
            attributes,
            children,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.attr(canonical::BOUNDS).and_then(Bounds::parse)
    }

    /// Depth-first, pre-order iteration over this node and its descendants
    pub fn iter(&self) -> impl Iterator<Item = &TreeNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Drop every subtree whose resource-id lives in the keyboard namespace.
    ///
    /// Returns `None` when this node itself is a keyboard element.
    pub fn exclude_keyboard(&self) -> Option<TreeNode> {
        if self
            .attr(canonical::RESOURCE_ID)
            .is_some_and(|id| id.starts_with(KEYBOARD_RESOURCE_PREFIX))
        {
            return None;
        }
        Some(TreeNode {
            children: self
                .children
                .iter()
                .filter_map(TreeNode::exclude_keyboard)
                .collect(),
            ..self.clone_shallow()
        })
    }

    /// Drop nodes lying entirely off a `width` x `height` screen.
    ///
    /// Nodes marked `ignoreBoundsFiltering="true"` are kept with their whole
    /// subtree. Off-screen nodes survive only while they still contain an
    /// on-screen descendant; nodes without bounds are treated as containers.
    pub fn filter_out_of_bounds(&self, width: i32, height: i32) -> Option<TreeNode> {
        if self.attr(canonical::IGNORE_BOUNDS_FILTERING) == Some("true") {
            return Some(self.clone());
        }

        let children: Vec<TreeNode> = self
            .children
            .iter()
            .filter_map(|c| c.filter_out_of_bounds(width, height))
            .collect();

        let outside = self.bounds().is_some_and(|b| b.is_outside(width, height));
        if outside && children.is_empty() {
            return None;
        }

        Some(TreeNode {
            children,
            ..self.clone_shallow()
        })
    }

    /// Whether any node in this tree belongs to the keyboard namespace
    pub fn contains_keyboard(&self) -> bool {
        self.iter().any(|n| {
            n.attr(canonical::RESOURCE_ID)
                .is_some_and(|id| id.starts_with(KEYBOARD_RESOURCE_PREFIX))
        })
    }

    fn clone_shallow(&self) -> TreeNode {
        TreeNode {
            attributes: self.attributes.clone(),
            children: Vec::new(),
            clickable: self.clickable,
            enabled: self.enabled,
            focused: self.focused,
            checked: self.checked,
            selected: self.selected,
        }
    }
}

/// A captured hierarchy: the root node and the rotation it was taken at
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewHierarchy {
    pub rotation: u32,
    pub root: TreeNode,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(pairs: &[(&str, &str)], children: Vec<TreeNode>) -> TreeNode {
        TreeNode::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children,
        )
    }

    #[test]
    fn test_bounds_from_rect_formats_canonically() {
        assert_eq!(Bounds::from_rect(10, 20, 100, 50).to_string(), "[10,20][110,70]");
    }

    #[test]
    fn test_bounds_parse() {
        assert_eq!(
            Bounds::parse("[0,63][1080, 2274]"),
            Some(Bounds {
                x1: 0,
                y1: 63,
                x2: 1080,
                y2: 2274
            })
        );
        assert_eq!(Bounds::parse("0,0,10,10"), None);
    }

    #[test]
    fn test_derived_flags_follow_attributes() {
        let n = node(&[("clickable", "true"), ("enabled", "false")], vec![]);
        assert_eq!(n.clickable, Some(true));
        assert_eq!(n.enabled, Some(false));
        assert_eq!(n.focused, None);
    }

    #[test]
    fn test_exclude_keyboard_prunes_subtree() {
        let keyboard = node(
            &[("resource-id", "com.google.android.inputmethod.latin:id/keyboard_view")],
            vec![node(&[("text", "q")], vec![])],
        );
        let button = node(&[("resource-id", "com.example:id/ok")], vec![]);
        let root = node(&[("class", "FrameLayout")], vec![keyboard, button]);

        let pruned = root.exclude_keyboard().unwrap();
        assert_eq!(pruned.children.len(), 1);
        assert_eq!(pruned.children[0].attr("resource-id"), Some("com.example:id/ok"));
        assert!(root.contains_keyboard());
        assert!(!pruned.contains_keyboard());
    }

    #[test]
    fn test_filter_out_of_bounds_drops_offscreen_leaves() {
        let visible = node(&[("bounds", "[0,0][100,100]")], vec![]);
        let offscreen = node(&[("bounds", "[0,3000][100,3100]")], vec![]);
        let root = node(&[("bounds", "[0,0][1080,2400]")], vec![visible, offscreen]);

        let filtered = root.filter_out_of_bounds(1080, 2400).unwrap();
        assert_eq!(filtered.children.len(), 1);
    }

    #[test]
    fn test_filter_out_of_bounds_keeps_toasts() {
        let toast = node(
            &[
                ("bounds", "[0,3000][100,3100]"),
                ("ignoreBoundsFiltering", "true"),
            ],
            vec![],
        );
        let root = node(&[], vec![toast]);
        let filtered = root.filter_out_of_bounds(1080, 2400).unwrap();
        assert_eq!(filtered.children.len(), 1);
    }

    #[test]
    fn test_iter_is_preorder() {
        let root = node(
            &[("text", "a")],
            vec![
                node(&[("text", "b")], vec![node(&[("text", "c")], vec![])]),
                node(&[("text", "d")], vec![]),
            ],
        );
        let texts: Vec<_> = root.iter().filter_map(|n| n.attr("text")).collect();
        assert_eq!(texts, vec!["a", "b", "c", "d"]);
        assert_eq!(root.node_count(), 4);
    }

    #[test]
    fn test_vocabulary_is_closed() {
        assert!(canonical::is_canonical("visible-to-user"));
        assert!(!canonical::is_canonical("displayed"));
    }
}

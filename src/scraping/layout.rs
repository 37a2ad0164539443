use scraper::{ElementRef, Node};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: String,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "block".to_string(),
            visibility: "visible".to_string(),
            opacity: "1".to_string(),
        }
    }
}

impl ComputedStyle {
    pub fn is_visible(&self) -> bool {
        self.display != "none" && self.visibility != "hidden" && !is_zero_opacity(&self.opacity)
    }
}

fn is_zero_opacity(value: &str) -> bool {
    value.trim().parse::<f64>().map(|v| v == 0.0).unwrap_or(false)
}

/// Source of the rendering facts the container predicate needs.
pub trait Layout: Send + Sync {
    fn computed_style(&self, element: ElementRef<'_>) -> ComputedStyle;
    fn bounding_box(&self, element: ElementRef<'_>) -> Rect;
    fn viewport(&self) -> Viewport;
}

/// Layout inferred from markup alone: inline `style` declarations and the
/// `hidden` attribute. Elements without explicit geometry span the viewport
/// when they have rendered content and collapse to zero height otherwise.
#[derive(Debug, Clone)]
pub struct StaticLayout {
    pub viewport: Viewport,
}

impl StaticLayout {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            viewport: Viewport { width, height },
        }
    }
}

impl Layout for StaticLayout {
    fn computed_style(&self, element: ElementRef<'_>) -> ComputedStyle {
        let own = inline_declarations(element);
        let mut style = ComputedStyle::default();
        if element.value().attr("hidden").is_some() {
            style.display = "none".to_string();
        }
        if let Some(display) = lookup(&own, "display") {
            style.display = display.to_string();
        }
        if let Some(opacity) = lookup(&own, "opacity") {
            style.opacity = opacity.to_string();
        }
        // visibility inherits; take the nearest declaration up the tree
        let inherited = std::iter::once(element)
            .chain(element.ancestors().filter_map(ElementRef::wrap))
            .find_map(|el| lookup(&inline_declarations(el), "visibility").map(str::to_string));
        if let Some(visibility) = inherited {
            style.visibility = visibility;
        }
        style
    }

    fn bounding_box(&self, element: ElementRef<'_>) -> Rect {
        let collapsed = Rect {
            left: 0.0,
            top: 0.0,
            width: 0.0,
            height: 0.0,
        };
        let hidden_above = element.ancestors().filter_map(ElementRef::wrap).any(|el| {
            el.value().attr("hidden").is_some()
                || lookup(&inline_declarations(el), "display") == Some("none")
        });
        if hidden_above || self.computed_style(element).display == "none" {
            return collapsed;
        }

        let own = inline_declarations(element);
        let px = |name: &str| lookup(&own, name).and_then(parse_px);
        let has_content = has_rendered_content(element);
        let width = px("width")
            .or_else(|| attr_px(element, "width"))
            .unwrap_or(if has_content { self.viewport.width } else { 0.0 });
        let height = px("height")
            .or_else(|| attr_px(element, "height"))
            .unwrap_or(if has_content { self.viewport.height } else { 0.0 });
        Rect {
            left: px("left").unwrap_or(0.0),
            top: px("top").unwrap_or(0.0),
            width,
            height,
        }
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }
}

fn inline_declarations(element: ElementRef<'_>) -> Vec<(String, String)> {
    element
        .value()
        .attr("style")
        .map(|style| {
            style
                .split(';')
                .filter_map(|decl| {
                    let (name, value) = decl.split_once(':')?;
                    let value = value.trim().trim_end_matches("!important").trim();
                    Some((name.trim().to_ascii_lowercase(), value.to_ascii_lowercase()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn lookup<'a>(declarations: &'a [(String, String)], name: &str) -> Option<&'a str> {
    // later declarations win, as in CSS
    declarations
        .iter()
        .rev()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn parse_px(value: &str) -> Option<f64> {
    value.trim().trim_end_matches("px").trim().parse::<f64>().ok()
}

fn attr_px(element: ElementRef<'_>, name: &str) -> Option<f64> {
    element.value().attr(name).and_then(parse_px)
}

fn has_rendered_content(element: ElementRef<'_>) -> bool {
    element.descendants().any(|node| match node.value() {
        Node::Text(text) => !text.trim().is_empty(),
        Node::Element(el) => matches!(el.name(), "img" | "video" | "iframe" | "svg" | "canvas"),
        _ => false,
    })
}

/// Attached to the document tree, visible, at least `min_size` on both axes,
/// and overlapping the viewport.
pub fn is_valid_container(element: ElementRef<'_>, layout: &dyn Layout, min_size: f64) -> bool {
    let attached = element.ancestors().any(|node| node.value().is_document());
    if !attached {
        return false;
    }
    if !layout.computed_style(element).is_visible() {
        return false;
    }
    let rect = layout.bounding_box(element);
    let viewport = layout.viewport();
    let large_enough = rect.width >= min_size && rect.height >= min_size;
    let in_viewport = rect.top <= viewport.height
        && rect.bottom() >= 0.0
        && rect.left <= viewport.width
        && rect.right() >= 0.0;
    large_enough && in_viewport
}

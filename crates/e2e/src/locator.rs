//! Element locators rendered as in-page JavaScript queries
//!
//! Every query is a self-contained expression, so a [`PageDriver`] only needs
//! `evaluate` to resolve them.
//!
//! [`PageDriver`]: crate::page::PageDriver

/// Attribute used to hand a located element from JavaScript to a native click
pub const TARGET_ATTRIBUTE: &str = "data-voice-e2e-target";

/// Normalizes whitespace and case, then keeps only the innermost matches
const TEXT_MATCH_FN: &str = r#"((needle) => {
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
  const read = (el) => { try { return el.textContent; } catch (e) { return ''; } };
  const want = norm(needle);
  const skip = ['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE'];
  const matches = (el) => !skip.includes(el.tagName) && norm(read(el)).includes(want);
  if (!document.body) return [];
  return Array.from(document.body.querySelectorAll('*'))
    .filter(matches)
    .filter((el) => !Array.from(el.children).some(matches));
})"#;

const IS_VISIBLE_FN: &str = r#"((el) => {
  const rect = el.getBoundingClientRect();
  const style = window.getComputedStyle(el);
  return rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none';
})"#;

/// How to find elements on the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// CSS selector; comma-separated unions match any alternative
    Css(String),
    /// Innermost elements whose text contains the string (case-insensitive)
    Text(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Expression yielding an `Array` of matching elements in document order
    pub fn to_elements_query(&self) -> String {
        match self {
            Self::Css(s) => format!("Array.from(document.querySelectorAll({}))", js_string(s)),
            Self::Text(t) => format!("{}({})", TEXT_MATCH_FN, js_string(t)),
        }
    }

    pub fn to_count_query(&self) -> String {
        format!("{}.length", self.to_elements_query())
    }

    /// True when any match is rendered with a non-empty box
    pub fn to_visible_query(&self) -> String {
        format!("{}.some({})", self.to_elements_query(), IS_VISIBLE_FN)
    }

    /// True when the first match is disabled natively or through ARIA
    pub fn to_disabled_query(&self) -> String {
        format!(
            "((els) => els.length > 0 && (els[0].disabled === true || els[0].getAttribute('aria-disabled') === 'true'))({})",
            self.to_elements_query()
        )
    }

    /// Text content of every match; `null` where an element can't be read
    pub fn to_texts_query(&self) -> String {
        format!(
            "{}.map((el) => {{ try {{ return el.textContent; }} catch (e) {{ return null; }} }})",
            self.to_elements_query()
        )
    }

    /// Tags the first match with [`TARGET_ATTRIBUTE`], clearing older tags.
    /// Evaluates to whether anything was tagged.
    pub fn to_mark_first_query(&self) -> String {
        format!(
            "((els) => {{ document.querySelectorAll('[{attr}]').forEach((el) => el.removeAttribute('{attr}')); if (els.length === 0) return false; els[0].setAttribute('{attr}', '1'); return true; }})({})",
            self.to_elements_query(),
            attr = TARGET_ATTRIBUTE,
        )
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css={}", s),
            Self::Text(t) => write!(f, "text={}", t),
        }
    }
}

/// Quote a Rust string as a JavaScript string literal
pub fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

//! Login and success page rendering.
//!
//! Templates use `{{.Field}}` placeholders and `{{if .Field}}…{{else}}…{{end}}`
//! blocks. Every interpolated value is escaped for the context the parser finds
//! it in: HTML escaping in text and attribute values, a scheme check at the
//! start of URL attributes, and JavaScript string escaping inside `<script>`
//! elements, where a value outside a string literal is emitted as a quoted string.
//!
//! Two sources implement [`TemplateSource`]: [`EmbeddedTemplates`], compiled into
//! the binary, and [`ExternalTemplates`], read from a directory and reloaded when
//! the files change. [`Templates::load`] picks one at startup.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::error::TemplateError;

const EMBEDDED_AUTHORIZE: &str = include_str!("../templates/authorize.html");
const EMBEDDED_SUCCESS: &str = include_str!("../templates/success.html");

// ============================================================================
// Page data
// ============================================================================

/// The pages the Authorization Server renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Authorize,
    Success,
}

impl Page {
    pub fn file_name(self) -> &'static str {
        match self {
            Page::Authorize => "authorize.html",
            Page::Success => "success.html",
        }
    }

    /// Fields a template for this page may reference.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Page::Authorize => AuthorizePage::FIELDS,
            Page::Success => SuccessPage::FIELDS,
        }
    }

    fn embedded_source(self) -> &'static str {
        match self {
            Page::Authorize => EMBEDDED_AUTHORIZE,
            Page::Success => EMBEDDED_SUCCESS,
        }
    }
}

/// Values a template can look up by field name.
pub trait PageData {
    fn page(&self) -> Page;
    fn field(&self, name: &str) -> Option<&str>;
}

/// Data for the login form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizePage {
    pub client_id: String,
    pub client_name: String,
    pub resource_name: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub scope: String,
    pub state: String,
    pub code_challenge: String,
    pub resource: String,
    pub error_message: String,
}

impl AuthorizePage {
    const FIELDS: &'static [&'static str] = &[
        "ClientID",
        "ClientName",
        "ResourceName",
        "RedirectURI",
        "ResponseType",
        "Scope",
        "State",
        "CodeChallenge",
        "Resource",
        "ErrorMessage",
    ];
}

impl PageData for AuthorizePage {
    fn page(&self) -> Page {
        Page::Authorize
    }

    fn field(&self, name: &str) -> Option<&str> {
        Some(match name {
            "ClientID" => &self.client_id,
            "ClientName" => &self.client_name,
            "ResourceName" => &self.resource_name,
            "RedirectURI" => &self.redirect_uri,
            "ResponseType" => &self.response_type,
            "Scope" => &self.scope,
            "State" => &self.state,
            "CodeChallenge" => &self.code_challenge,
            "Resource" => &self.resource,
            "ErrorMessage" => &self.error_message,
            _ => return None,
        })
    }
}

/// Data for the post-login page that sends the browser back to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuccessPage {
    pub redirect_url: String,
    pub username: String,
}

impl SuccessPage {
    const FIELDS: &'static [&'static str] = &["RedirectURL", "Username"];
}

impl PageData for SuccessPage {
    fn page(&self) -> Page {
        Page::Success
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "RedirectURL" => Some(&self.redirect_url),
            "Username" => Some(&self.username),
            _ => None,
        }
    }
}

// ============================================================================
// Template
// ============================================================================

/// Replacement for a URL whose scheme is not allowed.
const UNSAFE_URL: &str = "#ZgotmplZ";

/// Attributes whose values are URLs.
const URL_ATTRIBUTES: &[&str] = &["href", "src", "action", "formaction", "cite", "poster", "background"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    Html,
    /// Start of a URL attribute value.
    Url,
    /// Inside a quoted JavaScript string literal.
    JsString,
    /// A bare JavaScript expression; rendered as a quoted string.
    JsValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagPhase {
    Name,
    Space,
    AttrName,
    AfterAttr,
    AfterEq,
    Unquoted,
}

/// Position of the scanner in the HTML document.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Context {
    Text,
    Comment,
    Tag {
        name: String,
        attr: String,
        phase: TagPhase,
    },
    Attr {
        tag: String,
        quote: char,
        url: bool,
        start: bool,
    },
    Script,
    ScriptString(char),
    ScriptComment {
        block: bool,
    },
}

impl Context {
    fn tag(name: String) -> Self {
        Context::Tag {
            name,
            attr: String::new(),
            phase: TagPhase::Name,
        }
    }

    /// Scan `text` and return the context it ends in.
    fn advance(mut self, text: &str) -> Self {
        let mut rest = text;
        while let Some(c) = rest.chars().next() {
            let (next, used) = self.step(c, rest);
            self = next;
            rest = &rest[used..];
        }
        self
    }

    /// Consume the head of `rest`, which starts with `c`.
    fn step(self, c: char, rest: &str) -> (Self, usize) {
        let one = c.len_utf8();
        match self {
            Context::Text => {
                if rest.starts_with("<!--") {
                    return (Context::Comment, 4);
                }
                let opens_tag = c == '<'
                    && rest[one..]
                        .chars()
                        .next()
                        .is_some_and(|n| n.is_ascii_alphabetic() || n == '/' || n == '!');
                if opens_tag {
                    (Context::tag(String::new()), one)
                } else {
                    (Context::Text, one)
                }
            }
            Context::Comment => {
                if rest.starts_with("-->") {
                    (Context::Text, 3)
                } else {
                    (Context::Comment, one)
                }
            }
            Context::Tag {
                mut name,
                mut attr,
                phase,
            } => {
                if c == '>' {
                    let next = if name == "script" {
                        Context::Script
                    } else {
                        Context::Text
                    };
                    return (next, one);
                }
                let space = c.is_ascii_whitespace();
                let phase = match phase {
                    TagPhase::Name if space || (c == '/' && !name.is_empty()) => TagPhase::Space,
                    TagPhase::Name => {
                        name.push(c.to_ascii_lowercase());
                        TagPhase::Name
                    }
                    TagPhase::Space | TagPhase::AfterAttr if space || c == '/' => phase,
                    TagPhase::AttrName if c == '/' => TagPhase::Space,
                    TagPhase::AttrName if space => TagPhase::AfterAttr,
                    TagPhase::Space | TagPhase::AttrName | TagPhase::AfterAttr if c == '=' => {
                        TagPhase::AfterEq
                    }
                    TagPhase::AttrName => {
                        attr.push(c.to_ascii_lowercase());
                        TagPhase::AttrName
                    }
                    TagPhase::Space | TagPhase::AfterAttr => {
                        attr = c.to_ascii_lowercase().to_string();
                        TagPhase::AttrName
                    }
                    TagPhase::AfterEq if space => TagPhase::AfterEq,
                    TagPhase::AfterEq if c == '"' || c == '\'' => {
                        let url = URL_ATTRIBUTES.contains(&attr.as_str());
                        let next = Context::Attr {
                            tag: name,
                            quote: c,
                            url,
                            start: true,
                        };
                        return (next, one);
                    }
                    TagPhase::AfterEq | TagPhase::Unquoted if !space => TagPhase::Unquoted,
                    TagPhase::AfterEq | TagPhase::Unquoted => TagPhase::Space,
                };
                (Context::Tag { name, attr, phase }, one)
            }
            Context::Attr {
                tag,
                quote,
                url,
                ..
            } => {
                if c == quote {
                    let next = Context::Tag {
                        name: tag,
                        attr: String::new(),
                        phase: TagPhase::Space,
                    };
                    (next, one)
                } else {
                    let next = Context::Attr {
                        tag,
                        quote,
                        url,
                        start: false,
                    };
                    (next, one)
                }
            }
            Context::Script => {
                if rest
                    .get(..8)
                    .is_some_and(|s| s.eq_ignore_ascii_case("</script"))
                {
                    return (Context::tag("/script".to_string()), 8);
                }
                if rest.starts_with("//") {
                    return (Context::ScriptComment { block: false }, 2);
                }
                if rest.starts_with("/*") {
                    return (Context::ScriptComment { block: true }, 2);
                }
                match c {
                    '"' | '\'' | '`' => (Context::ScriptString(c), one),
                    _ => (Context::Script, one),
                }
            }
            Context::ScriptString(quote) => {
                if c == '\\' {
                    let escaped = rest[one..].chars().next().map_or(0, char::len_utf8);
                    (Context::ScriptString(quote), one + escaped)
                } else if c == quote {
                    (Context::Script, one)
                } else {
                    (Context::ScriptString(quote), one)
                }
            }
            Context::ScriptComment { block: true } if rest.starts_with("*/") => (Context::Script, 2),
            Context::ScriptComment { block: false } if c == '\n' => (Context::Script, one),
            comment @ Context::ScriptComment { .. } => (comment, one),
        }
    }

    /// How a value placed here is escaped, or `None` where values are not allowed.
    fn escape(&self) -> Option<Escape> {
        match self {
            Context::Text | Context::Comment => Some(Escape::Html),
            Context::Attr {
                url: true,
                start: true,
                ..
            } => Some(Escape::Url),
            Context::Attr { .. } => Some(Escape::Html),
            Context::Script => Some(Escape::JsValue),
            Context::ScriptString(_) => Some(Escape::JsString),
            Context::Tag { .. } | Context::ScriptComment { .. } => None,
        }
    }

    /// Context after a value has been written here.
    fn after_value(self) -> Self {
        match self {
            Context::Attr { tag, quote, url, .. } => Context::Attr {
                tag,
                quote,
                url,
                start: false,
            },
            other => other,
        }
    }

    /// Context after an `{{if}}` whose branches end in `self` and `other`.
    fn join(self, other: Self) -> Option<Self> {
        match (self, other) {
            (
                Context::Attr {
                    tag,
                    quote,
                    url,
                    start,
                },
                Context::Attr {
                    tag: other_tag,
                    quote: other_quote,
                    url: other_url,
                    start: other_start,
                },
            ) if tag == other_tag && quote == other_quote && url == other_url => Some(Context::Attr {
                tag,
                quote,
                url,
                start: start || other_start,
            }),
            (a, b) if a == b => Some(a),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Field {
        name: String,
        escape: Escape,
    },
    If {
        name: String,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

struct OpenBlock {
    name: String,
    offset: usize,
    then: Vec<Node>,
    otherwise: Vec<Node>,
    in_else: bool,
    start: Context,
    then_end: Option<Context>,
}

impl Template {
    /// Parse `source`, rejecting references to fields outside `fields`.
    ///
    /// Placeholders are allowed in text, in quoted attribute values and in
    /// scripts; a placeholder anywhere else inside a tag is an error.
    pub fn parse(name: &str, source: &str, fields: &[&str]) -> Result<Self, TemplateError> {
        let err = |offset: usize, reason: String| TemplateError::Parse {
            template: name.to_string(),
            offset,
            reason,
        };

        let mut root = Vec::new();
        let mut open: Vec<OpenBlock> = Vec::new();
        let mut context = Context::Text;
        let mut pos = 0;

        while pos < source.len() {
            let rest = &source[pos..];
            let Some(start) = rest.find("{{") else {
                push_node(&mut root, &mut open, Node::Text(rest.to_string()));
                break;
            };
            if start > 0 {
                let text = &rest[..start];
                context = context.advance(text);
                push_node(&mut root, &mut open, Node::Text(text.to_string()));
            }

            let action_at = pos + start;
            let body_at = action_at + 2;
            let Some(len) = source[body_at..].find("}}") else {
                return Err(err(action_at, "unterminated action".to_string()));
            };
            let action = source[body_at..body_at + len].trim();
            pos = body_at + len + 2;

            let field_name = |expr: &str| -> Result<String, TemplateError> {
                let name = expr
                    .strip_prefix('.')
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| err(action_at, format!("unsupported action '{action}'")))?;
                if fields.contains(&name) {
                    Ok(name.to_string())
                } else {
                    Err(err(action_at, format!("unknown field '{name}'")))
                }
            };

            if action == "end" {
                let block = open
                    .pop()
                    .ok_or_else(|| err(action_at, "unexpected {{end}}".to_string()))?;
                let other = block.then_end.unwrap_or(block.start);
                context = context.join(other).ok_or_else(|| {
                    err(block.offset, "{{if}} branches end in different contexts".to_string())
                })?;
                let node = Node::If {
                    name: block.name,
                    then: block.then,
                    otherwise: block.otherwise,
                };
                push_node(&mut root, &mut open, node);
            } else if action == "else" {
                let block = open
                    .last_mut()
                    .filter(|b| !b.in_else)
                    .ok_or_else(|| err(action_at, "unexpected {{else}}".to_string()))?;
                block.in_else = true;
                block.then_end = Some(std::mem::replace(&mut context, block.start.clone()));
            } else if let Some(cond) = action.strip_prefix("if ") {
                open.push(OpenBlock {
                    name: field_name(cond.trim())?,
                    offset: action_at,
                    then: Vec::new(),
                    otherwise: Vec::new(),
                    in_else: false,
                    start: context.clone(),
                    then_end: None,
                });
            } else {
                let name = field_name(action)?;
                let escape = context.escape().ok_or_else(|| {
                    err(
                        action_at,
                        format!("'{{{{{action}}}}}' must sit in text, a quoted attribute value or a script"),
                    )
                })?;
                context = context.after_value();
                push_node(&mut root, &mut open, Node::Field { name, escape });
            }
        }

        if let Some(block) = open.last() {
            return Err(err(block.offset, "unclosed {{if}}".to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            nodes: root,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render with `data`. Missing fields render as empty strings.
    pub fn render(&self, data: &dyn PageData) -> String {
        let mut out = String::new();
        render_nodes(&self.nodes, data, &mut out);
        out
    }
}

fn push_node(root: &mut Vec<Node>, open: &mut [OpenBlock], node: Node) {
    match open.last_mut() {
        Some(block) if block.in_else => block.otherwise.push(node),
        Some(block) => block.then.push(node),
        None => root.push(node),
    }
}

fn render_nodes(nodes: &[Node], data: &dyn PageData, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Field { name, escape } => {
                let value = data.field(name).unwrap_or_default();
                match escape {
                    Escape::Html => out.push_str(&html_escape::encode_safe(value)),
                    Escape::Url if is_safe_url(value) => {
                        out.push_str(&html_escape::encode_safe(value))
                    }
                    Escape::Url => out.push_str(UNSAFE_URL),
                    Escape::JsString => escape_js_string(value, out),
                    Escape::JsValue => {
                        out.push('"');
                        escape_js_string(value, out);
                        out.push('"');
                    }
                }
            }
            Node::If {
                name,
                then,
                otherwise,
            } => {
                let truthy = data.field(name).is_some_and(|v| !v.is_empty());
                render_nodes(if truthy { then } else { otherwise }, data, out);
            }
        }
    }
}

/// Relative URLs and `http`, `https` and `mailto` URLs.
fn is_safe_url(value: &str) -> bool {
    let value = value.trim_start();
    match value.find([':', '/', '?', '#']) {
        Some(i) if value[i..].starts_with(':') => {
            let scheme = value[..i].to_ascii_lowercase();
            matches!(scheme.as_str(), "http" | "https" | "mailto")
        }
        _ => true,
    }
}

/// Escape a value for use inside a quoted JavaScript string literal.
fn escape_js_string(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '<' | '>' | '&' | '=' | '/' | '`' | '$' | '\u{2028}' | '\u{2029}' => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
}

// ============================================================================
// Sources
// ============================================================================

/// A strategy for producing rendered pages.
pub trait TemplateSource: Send + Sync {
    fn render(&self, data: &dyn PageData) -> Result<String, TemplateError>;

    /// Short label for logs.
    fn kind(&self) -> &'static str;
}

/// Templates compiled into the binary.
#[derive(Debug, Clone)]
pub struct EmbeddedTemplates {
    authorize: Template,
    success: Template,
}

impl EmbeddedTemplates {
    pub fn new() -> Result<Self, TemplateError> {
        let parse = |page: Page| Template::parse(page.file_name(), page.embedded_source(), page.fields());
        Ok(Self {
            authorize: parse(Page::Authorize)?,
            success: parse(Page::Success)?,
        })
    }
}

impl TemplateSource for EmbeddedTemplates {
    fn render(&self, data: &dyn PageData) -> Result<String, TemplateError> {
        let template = match data.page() {
            Page::Authorize => &self.authorize,
            Page::Success => &self.success,
        };
        Ok(template.render(data))
    }

    fn kind(&self) -> &'static str {
        "embedded"
    }
}

#[derive(Debug, Clone)]
struct Loaded {
    template: Template,
    modified: Option<SystemTime>,
}

/// Templates read from a directory and re-parsed when their mtime changes.
///
/// A file that disappears or stops parsing keeps serving its last good parse.
pub struct ExternalTemplates {
    dir: PathBuf,
    authorize: RwLock<Loaded>,
    success: RwLock<Loaded>,
}

impl ExternalTemplates {
    /// Load both pages from `dir`. Fails if either is missing or invalid.
    pub fn load(dir: &Path) -> Result<Self, TemplateError> {
        Ok(Self {
            authorize: RwLock::new(load_page(dir, Page::Authorize)?),
            success: RwLock::new(load_page(dir, Page::Success)?),
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot(&self, page: Page) -> &RwLock<Loaded> {
        match page {
            Page::Authorize => &self.authorize,
            Page::Success => &self.success,
        }
    }

    fn refresh(&self, page: Page) {
        let path = self.dir.join(page.file_name());
        let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) else {
            return;
        };
        let slot = self.slot(page);
        if slot.read().modified == Some(modified) {
            return;
        }
        match load_page(&self.dir, page) {
            Ok(loaded) => {
                tracing::info!(path = %path.display(), "Reloaded OAuth template");
                *slot.write() = loaded;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Template changed but failed to load, keeping previous version");
                // Remember the mtime so a broken file is not re-parsed on every request.
                slot.write().modified = Some(modified);
            }
        }
    }
}

impl TemplateSource for ExternalTemplates {
    fn render(&self, data: &dyn PageData) -> Result<String, TemplateError> {
        let page = data.page();
        self.refresh(page);
        Ok(self.slot(page).read().template.render(data))
    }

    fn kind(&self) -> &'static str {
        "external"
    }
}

fn load_page(dir: &Path, page: Page) -> Result<Loaded, TemplateError> {
    let path = dir.join(page.file_name());
    let read_err = |e: std::io::Error| TemplateError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
    let source = fs::read_to_string(&path).map_err(read_err)?;
    Ok(Loaded {
        template: Template::parse(page.file_name(), &source, page.fields())?,
        modified,
    })
}

/// The renderer used by the Authorization Server.
#[derive(Clone)]
pub struct Templates {
    source: Arc<dyn TemplateSource>,
}

impl Templates {
    /// Prefer templates in `dir`, falling back to the embedded defaults.
    pub fn load(dir: &Path) -> Result<Self, TemplateError> {
        if dir.is_dir() {
            match ExternalTemplates::load(dir) {
                Ok(external) => {
                    tracing::info!(dir = %dir.display(), "Using external OAuth templates");
                    return Ok(Self::from_source(Arc::new(external)));
                }
                Err(e) => {
                    tracing::warn!(
                        dir = %dir.display(),
                        error = %e,
                        "Failed to load external OAuth templates, using built-in templates"
                    );
                }
            }
        }
        Self::embedded()
    }

    /// Use only the embedded templates.
    pub fn embedded() -> Result<Self, TemplateError> {
        Ok(Self::from_source(Arc::new(EmbeddedTemplates::new()?)))
    }

    pub fn from_source(source: Arc<dyn TemplateSource>) -> Self {
        Self { source }
    }

    pub fn kind(&self) -> &'static str {
        self.source.kind()
    }

    pub fn render(&self, data: &dyn PageData) -> Result<String, TemplateError> {
        self.source.render(data)
    }
}

impl std::fmt::Debug for Templates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Templates")
            .field("kind", &self.source.kind())
            .finish()
    }
}

//! Rendering of the subject and bodies of templated emails.
//!
//! A template file holds three named blocks:
//!
//! ```text
//! {{define "subject"}}Welcome, {{name}}!{{end}}
//! {{define "plainBody"}}Hi {{name}}, ...{{end}}
//! {{define "htmlBody"}}<p>Hi {{name}}, ...</p>{{end}}
//! ```
//!
//! Each block is a handlebars template rendered against the data bag.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use handlebars::Handlebars;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

pub const SUBJECT_BLOCK: &str = "subject";
pub const PLAIN_BODY_BLOCK: &str = "plainBody";
pub const HTML_BODY_BLOCK: &str = "htmlBody";

const TEMPLATE_EXTENSION: &str = "tmpl";

/// Templates compiled into the crate, by file name.
const EMBEDDED: [(&str, &str); 1] = [(
    "user_welcome.tmpl",
    include_str!("../templates/user_welcome.tmpl"),
)];

lazy_static! {
    static ref DEFINE_BLOCK: Regex =
        Regex::new(r#"(?s)\{\{define "(\w+)"\}\}(.*?)\{\{end\}\}"#).unwrap();
}

/// The three text blocks of a rendered template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub plain_body: String,
    pub html_body: String,
}

/// Produces the subject and bodies of an email from a template identifier
/// and a data bag.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template_id: &str, data: &serde_json::Value) -> anyhow::Result<RenderedEmail>;
}

/// [`TemplateRenderer`] backed by handlebars.
///
/// Subjects and plain bodies are rendered verbatim, HTML bodies with HTML
/// escaping. Missing variables are errors.
pub struct HandlebarsRenderer {
    text: Handlebars<'static>,
    html: Handlebars<'static>,
}

impl std::fmt::Debug for HandlebarsRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut templates: Vec<&String> = self.text.get_templates().keys().collect();
        templates.extend(self.html.get_templates().keys());
        templates.sort();
        f.debug_struct("HandlebarsRenderer")
            .field("templates", &templates)
            .finish()
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        HandlebarsRenderer::new()
    }
}

impl HandlebarsRenderer {
    /// Creates a renderer without any template.
    pub fn new() -> HandlebarsRenderer {
        let mut text = Handlebars::new();
        text.set_strict_mode(true);
        text.register_escape_fn(handlebars::no_escape);

        let mut html = Handlebars::new();
        html.set_strict_mode(true);

        HandlebarsRenderer { text, html }
    }

    /// Creates a renderer holding the templates shipped with this crate,
    /// such as `user_welcome.tmpl`.
    pub fn embedded() -> anyhow::Result<HandlebarsRenderer> {
        let mut renderer = HandlebarsRenderer::new();
        for (template_id, source) in EMBEDDED.iter() {
            renderer.register_template(template_id, source)?;
        }
        Ok(renderer)
    }

    /// Creates a renderer holding every `*.tmpl` file of `dir`, identified by
    /// file name.
    pub fn from_directory(dir: impl AsRef<Path>) -> anyhow::Result<HandlebarsRenderer> {
        let dir = dir.as_ref();
        let mut renderer = HandlebarsRenderer::new();

        let entries = fs::read_dir(dir)
            .with_context(|| format!("reading template directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXTENSION) {
                continue;
            }
            let template_id = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow!("invalid template file name {}", path.display()))?
                .to_string();
            let source = fs::read_to_string(&path)
                .with_context(|| format!("reading template {}", path.display()))?;
            renderer.register_template(&template_id, &source)?;
        }

        Ok(renderer)
    }

    /// Registers the blocks defined in `source` under `template_id`.
    pub fn register_template(&mut self, template_id: &str, source: &str) -> anyhow::Result<()> {
        let mut found = false;
        for caps in DEFINE_BLOCK.captures_iter(source) {
            let block = &caps[1];
            let name = block_name(template_id, block);
            let registry = if block == HTML_BODY_BLOCK {
                &mut self.html
            } else {
                &mut self.text
            };
            registry
                .register_template_string(&name, &caps[2])
                .with_context(|| format!("parsing block {:?} of {}", block, template_id))?;
            found = true;
        }

        if !found {
            bail!("template {} defines no blocks", template_id);
        }
        debug!(template = template_id, "registered email template");
        Ok(())
    }

    pub fn has_template(&self, template_id: &str) -> bool {
        [SUBJECT_BLOCK, PLAIN_BODY_BLOCK]
            .iter()
            .any(|block| self.text.has_template(&block_name(template_id, block)))
            || self
                .html
                .has_template(&block_name(template_id, HTML_BODY_BLOCK))
    }

    fn render_block(
        &self,
        template_id: &str,
        block: &str,
        data: &serde_json::Value,
    ) -> anyhow::Result<String> {
        let name = block_name(template_id, block);
        let registry = if block == HTML_BODY_BLOCK {
            &self.html
        } else {
            &self.text
        };
        if !registry.has_template(&name) {
            bail!("template {} has no {:?} block", template_id, block);
        }
        registry
            .render(&name, data)
            .with_context(|| format!("rendering block {:?} of {}", block, template_id))
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, template_id: &str, data: &serde_json::Value) -> anyhow::Result<RenderedEmail> {
        if !self.has_template(template_id) {
            bail!("template {} not found", template_id);
        }

        Ok(RenderedEmail {
            subject: self
                .render_block(template_id, SUBJECT_BLOCK, data)?
                .trim()
                .to_string(),
            plain_body: self.render_block(template_id, PLAIN_BODY_BLOCK, data)?,
            html_body: self.render_block(template_id, HTML_BODY_BLOCK, data)?,
        })
    }
}

fn block_name(template_id: &str, block: &str) -> String {
    format!("{}/{}", template_id, block)
}

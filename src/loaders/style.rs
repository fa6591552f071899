//! Turns a stylesheet into a script that injects it into the page

use anyhow::Result;

use super::{Content, Loader, LoaderContext};
use crate::utils::module_id;

pub struct StyleLoader;

impl Loader for StyleLoader {
    fn name(&self) -> &str {
        "style"
    }

    fn apply(&self, content: Content, ctx: &mut LoaderContext<'_>) -> Result<Content> {
        let sheet = content.into_stylesheet(self.name(), ctx.resource)?;
        let id = module_id(ctx.resource, ctx.root);

        let script = format!(
            "{}module.exports = {};\n",
            inject_css(&sheet.css, &id)?,
            serde_json::to_string(&sheet.locals)?
        );
        Ok(Content::Script(script))
    }
}

/// Script that appends `css` to the document head as a `<style>` tag and
/// removes it again when the module is hot-replaced
pub(crate) fn inject_css(css: &str, id: &str) -> Result<String> {
    Ok(format!(
        r#"var css = {css};
var style = document.createElement('style');
style.setAttribute('data-loom-module', {id});
style.textContent = css;
document.head.appendChild(style);
if (module.hot) {{
  module.hot.accept();
  module.hot.dispose(function () {{
    if (style.parentNode) style.parentNode.removeChild(style);
  }});
}}
"#,
        css = serde_json::to_string(css)?,
        id = serde_json::to_string(id)?,
    ))
}

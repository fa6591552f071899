//! Project initialization command

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

/// Scaffold a new project
#[derive(Args, Debug)]
pub struct InitCommand {
    /// Project directory
    #[arg(default_value = ".")]
    pub dir: String,

    /// Overwrite existing files
    #[arg(short, long)]
    pub force: bool,
}

const CONFIG: &str = r#"# Loom configuration
#
# Every section is optional; the defaults build a single-page app from
# src/index.js with src/index.html as the page template.

[entry]
main = "src/index.js"

[output]
path = "dist"
public_path = "/"

[dev_server]
port = 8083
hot = true
"#;

const INDEX_JS: &str = r#"import './styles/app.less';

function render(root) {
  root.innerHTML = '<h1>{title}</h1><p>Edit src/index.js and save to reload.</p>';
}

render(document.getElementById('app'));

if (module.hot) {
  module.hot.accept();
}
"#;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
  </head>
  <body>
    <div id="app"></div>
  </body>
</html>
"#;

const APP_LESS: &str = r#"// Global styles
@text: #213547;
@accent: #646cff;

body {
  margin: 0;
  font-family: system-ui, Helvetica, Arial, sans-serif;
  color: @text;
}

#app {
  max-width: 960px;
  margin: 0 auto;
  padding: 2rem;

  h1 {
    color: @accent;
  }
}
"#;

const ROBOTS_TXT: &str = "User-agent: *\nDisallow:\n";

impl InitCommand {
    pub async fn execute(&self) -> Result<()> {
        let project_dir = Path::new(&self.dir);

        eprintln!("{} Initializing new project in {}...\n", "→".blue(), self.dir.cyan());

        fs::create_dir_all(project_dir).context("Failed to create project directory")?;

        let title = self.title(project_dir);
        let files = [
            ("loom.toml", CONFIG.to_string()),
            ("src/index.js", INDEX_JS.replace("{title}", &title)),
            ("src/index.html", INDEX_HTML.replace("{title}", &title)),
            ("src/styles/app.less", APP_LESS.to_string()),
            ("src/static/robots.txt", ROBOTS_TXT.to_string()),
        ];

        for (path, _) in &files {
            let full = project_dir.join(path);
            if full.exists() && !self.force {
                anyhow::bail!("{} already exists (use --force to overwrite)", full.display());
            }
        }

        for (path, content) in files {
            let full = project_dir.join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(&full, content).with_context(|| format!("Failed to write {}", path))?;
            eprintln!("  {} Created {}", "✓".green(), path.cyan());
        }

        eprintln!("\n{} Project initialized successfully!\n", "✓".green().bold());

        eprintln!("  Next steps:");
        if self.dir != "." {
            eprintln!("    {} cd {}", "→".dimmed(), self.dir.cyan());
        }
        eprintln!("    {} loom dev", "→".dimmed());
        eprintln!();

        Ok(())
    }

    fn title(&self, project_dir: &Path) -> String {
        let absolute = if project_dir.is_absolute() {
            project_dir.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(project_dir))
                .unwrap_or_else(|_| project_dir.to_path_buf())
        };
        absolute
            .components()
            .rev()
            .find_map(|c| match c {
                std::path::Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                _ => None,
            })
            .unwrap_or_else(|| "my-app".to_string())
    }
}

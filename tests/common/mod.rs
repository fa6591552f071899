#![allow(dead_code)]

use std::fs;
use std::path::Path;

use loom_lib::{BuildResult, Bundler, Config, Mode};
use tempfile::TempDir;

pub const TEMPLATE: &str = "<!DOCTYPE html>\n<html>\n  <head>\n    <!-- page title -->\n    <title>Demo</title>\n  </head>\n  <body class=\"app\">\n    <div id=\"root\"></div>\n  </body>\n</html>\n";

/// A project with the default template and static directory plus `files`
pub fn project(files: &[(&str, &[u8])]) -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "src/index.html", TEMPLATE.as_bytes());
    write(dir.path(), "src/static/robots.txt", b"User-agent: *\n");
    for (path, contents) in files {
        write(dir.path(), path, contents);
    }
    dir
}

pub fn write(root: &Path, path: &str, contents: &[u8]) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, contents).unwrap();
}

pub fn config(dir: &TempDir, mode: Mode) -> Config {
    Config::default_config(dir.path().to_path_buf()).with_mode(mode)
}

pub async fn build(dir: &TempDir, mode: Mode) -> BuildResult {
    Bundler::new(config(dir, mode)).unwrap().build().await.unwrap()
}

pub fn paths(result: &BuildResult) -> Vec<String> {
    result.bundles().into_iter().map(|b| b.path).collect()
}

pub fn text<'a>(result: &'a BuildResult, path: &str) -> &'a str {
    result.assets.get(path).unwrap().text().unwrap()
}

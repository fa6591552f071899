mod common;

use common::{build, config, paths, project, text, write};
use loom_lib::bundler::{AssetKind, ChunkKind};
use loom_lib::{Bundler, Mode};
use pretty_assertions::assert_eq;

const LARGE: usize = 20_000;

#[tokio::test]
async fn every_file_type_lands_in_its_output_directory() {
    let big = vec![7u8; LARGE];
    let dir = project(&[
        (
            "src/index.js",
            b"import App from './App.jsx';\n\
              import logo from './assets/logo.png';\n\
              import icon from './assets/icon.svg';\n\
              import clip from './assets/intro.mp4';\n\
              import font from './assets/body.woff2';\n\
              import styles from './styles/app.less';\n\
              import './styles/reset.css';\n\
              console.log(App, logo, icon, clip, font, styles);\n",
        ),
        ("src/App.jsx", b"export default function App() {\n  return <div className=\"app\">hi</div>;\n}\n"),
        ("src/assets/logo.png", &big),
        ("src/assets/icon.svg", b"<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>"),
        ("src/assets/intro.mp4", &big),
        ("src/assets/body.woff2", &big),
        ("src/styles/app.less", b"@brand: #336699;\n.title { color: @brand; }\n"),
        ("src/styles/reset.css", b"body { margin: 0; }\n"),
    ]);
    let result = build(&dir, Mode::Development).await;

    let kinds = |kind: AssetKind| {
        result
            .assets
            .of_kind(kind)
            .map(|a| a.path.clone())
            .collect::<Vec<_>>()
    };

    for script in kinds(AssetKind::Script) {
        assert!(script.starts_with("js/") && script.ends_with(".js"), "{}", script);
    }
    let styles = kinds(AssetKind::Style);
    assert_eq!(styles.len(), 1);
    assert!(styles[0].starts_with("css/main-") && styles[0].ends_with(".css"));

    let emitted = kinds(AssetKind::Asset);
    assert_eq!(emitted.len(), 3);
    assert!(emitted.iter().any(|p| p.starts_with("static/fonts/body.") && p.ends_with(".woff2")));
    assert!(emitted.iter().any(|p| p.starts_with("static/img/logo.") && p.ends_with(".png")));
    assert!(emitted.iter().any(|p| p.starts_with("static/media/intro.") && p.ends_with(".mp4")));

    // small files are inlined instead of emitted
    assert!(result.modules["./src/assets/icon.svg"].contains("data:image/svg+xml;base64,"));
    assert!(result.modules["./src/App.jsx"].contains("React.createElement"));

    assert_eq!(kinds(AssetKind::Html), vec!["index.html".to_string()]);
    assert_eq!(kinds(AssetKind::Static), vec!["static/robots.txt".to_string()]);
}

#[tokio::test]
async fn unchanged_sources_reproduce_identical_names() {
    let dir = project(&[
        ("src/index.js", b"import './app.less';\nconsole.log('ready');\n"),
        ("src/app.less", b".a { color: red; }\n"),
    ]);
    let first = build(&dir, Mode::Production).await;
    let second = build(&dir, Mode::Production).await;

    assert_eq!(paths(&first), paths(&second));
    assert_eq!(first.manifest, second.manifest);
    assert_eq!(first.hash, second.hash);
}

#[tokio::test]
async fn stylesheet_edit_renames_only_the_stylesheet() {
    let dir = project(&[
        ("src/index.js", b"import styles from './app.less';\nconsole.log(styles.a);\n"),
        ("src/app.less", b".a { color: red; }\n"),
    ]);
    let before = build(&dir, Mode::Production).await;

    write(dir.path(), "src/app.less", b".a { color: blue; }\n");
    let after = build(&dir, Mode::Production).await;

    let of_kind = |result: &loom_lib::BuildResult, kind: AssetKind| {
        result
            .assets
            .of_kind(kind)
            .map(|a| a.path.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(of_kind(&before, AssetKind::Script), of_kind(&after, AssetKind::Script));
    assert_ne!(of_kind(&before, AssetKind::Style), of_kind(&after, AssetKind::Style));
}

#[tokio::test]
async fn production_minifies_stylesheets_and_document() {
    let dir = project(&[
        ("src/index.js", b"import './app.less';\n"),
        ("src/app.less", b".a {\n  color: red;\n}\n\n.b {\n  margin: 0px;\n}\n"),
    ]);
    let result = build(&dir, Mode::Production).await;

    let css = result.assets.for_chunk("main", AssetKind::Style).unwrap();
    let css = css.text().unwrap();
    assert!(!css.contains('\n'), "{}", css);
    assert!(!css.contains(": "), "{}", css);

    let html = text(&result, "index.html");
    assert!(html.starts_with("<!DOCTYPE html><html><head><title>Demo</title>"), "{}", html);
    assert!(!html.contains("<!--"));
    assert!(!html.contains('\n'));
    assert!(html.contains("<body class=app><div id=root></div>"));
    assert!(html.contains("rel=stylesheet"));
}

#[tokio::test]
async fn development_keeps_the_document_readable() {
    let dir = project(&[("src/index.js", b"console.log(1);\n")]);
    let result = build(&dir, Mode::Development).await;

    let html = text(&result, "index.html");
    assert!(html.contains("<!-- page title -->"));
    assert!(html.contains("<body class=\"app\">"));
}

#[tokio::test]
async fn compact_module_syntax_and_less_partials_are_bundled() {
    let dir = project(&[
        (
            "src/index.js",
            b"import{greet}from'./greet';import\"./theme.less\";export*from'./extra';\nconsole.log(greet('you'));\n",
        ),
        ("src/greet.js", b"export const greet = (who) => 'hi ' + who;\n"),
        ("src/extra.js", b"export const { version, name: title } = { version: 2, name: 'x' };\n"),
        ("src/theme.less", b"@import './partials/colors';\n.title { color: @accent; }\n"),
        ("src/partials/colors.less", b"@accent: #123456;\n.shared { border-width: 0; }\n"),
    ]);
    let result = build(&dir, Mode::Development).await;

    let index = &result.modules["./src/index.js"];
    assert!(index.contains("require(\"./src/greet.js\")"), "{}", index);
    assert!(index.contains("require(\"./src/extra.js\")"), "{}", index);
    assert!(result.modules["./src/extra.js"].contains("\"title\": function () { return title; }"));

    let css = result.assets.for_chunk("main", AssetKind::Style).unwrap();
    let css = css.text().unwrap();
    assert!(css.contains("#123456"), "{}", css);
    assert!(css.contains("border-width"), "{}", css);
    assert!(!css.contains("@import"), "{}", css);

    // editing the partial alone changes the stylesheet
    let before = css.to_string();
    write(dir.path(), "src/partials/colors.less", b"@accent: #654321;\n");
    let after = build(&dir, Mode::Development).await;
    let after = after.assets.for_chunk("main", AssetKind::Style).unwrap();
    assert_ne!(after.text().unwrap(), before);
    assert!(after.text().unwrap().contains("#654321"));
}

#[tokio::test]
async fn shared_dependencies_live_in_the_vendor_chunk_once() {
    let dir = project(&[
        ("src/index.js", b"import lib from 'lib';\nconsole.log('main', lib);\n"),
        ("src/admin.js", b"import lib from 'lib';\nconsole.log('admin', lib);\n"),
        ("node_modules/lib/package.json", b"{ \"main\": \"lib.js\" }"),
        ("node_modules/lib/lib.js", b"module.exports = 'lib';\n"),
    ]);
    let mut config = config(&dir, Mode::Development);
    config.entry.insert("admin".to_string(), "src/admin.js".to_string());
    let result = Bundler::new(config).unwrap().build().await.unwrap();

    let definition = "\"./node_modules/lib/lib.js\": function";
    let vendor = result.chunk("vendor").unwrap();
    assert_eq!(vendor.kind, ChunkKind::Shared);
    assert_eq!(text(&result, &vendor.script).matches(definition).count(), 1);

    for entry in ["main", "admin"] {
        let chunk = result.chunk(entry).unwrap();
        assert!(!text(&result, &chunk.script).contains(definition), "{} duplicates vendor code", entry);
    }

    let html = text(&result, "index.html");
    let order: Vec<usize> = ["manifest", "vendor", "admin", "main"]
        .iter()
        .map(|name| html.find(&result.chunk(name).unwrap().script).unwrap())
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]), "{}", html);
}

#[tokio::test]
async fn emit_writes_every_artifact() {
    let dir = project(&[("src/index.js", b"console.log(1);\n")]);
    let config = config(&dir, Mode::Production);
    let bundler = Bundler::new(config).unwrap();
    let result = bundler.build().await.unwrap();

    let out = dir.path().join("out");
    bundler.emit(&result, Some(&out)).unwrap();
    for path in paths(&result) {
        assert!(out.join(&path).is_file(), "{} was not written", path);
    }
    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("manifest.json")).unwrap()).unwrap();
    assert!(manifest["main.js"].as_str().unwrap().starts_with("/js/main-"));
}

#[tokio::test]
async fn failed_builds_write_nothing() {
    let dir = project(&[("src/index.js", b"import './missing.js';\n")]);
    let bundler = Bundler::new(config(&dir, Mode::Production)).unwrap();
    assert!(bundler.build().await.is_err());
    assert!(!dir.path().join("dist").exists());
}

struct BuildInfo;

#[async_trait::async_trait]
impl loom_lib::plugins::Plugin for BuildInfo {
    fn name(&self) -> &str {
        "build-info"
    }

    async fn process_assets(
        &self,
        assets: &mut loom_lib::bundler::AssetSet,
        ctx: &loom_lib::plugins::PluginContext<'_>,
    ) -> anyhow::Result<()> {
        let names: Vec<&str> = ctx.chunks.iter().map(|c| c.name.as_str()).collect();
        assets.insert(loom_lib::bundler::Asset::new(
            "build-info.txt",
            names.join(","),
            AssetKind::Static,
        ));
        Ok(())
    }
}

#[tokio::test]
async fn custom_plugins_run_after_the_defaults() {
    let dir = project(&[("src/index.js", b"console.log(1);\n")]);
    let mut bundler = Bundler::new(config(&dir, Mode::Development)).unwrap();
    bundler.plugins_mut().register(std::sync::Arc::new(BuildInfo));

    let result = bundler.build().await.unwrap();
    assert_eq!(text(&result, "build-info.txt"), "manifest,main");
}

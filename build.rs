use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Only the crate's own sources are scanned.
const SOURCE_DIRS: [&str; 4] = ["model", "shared", "cli", "tests"];

// A hygiene rule enforced on every scanned file.
struct Rule {
    pattern: &'static str,
    what: &'static str,
    advice: &'static str,
}

const RULES: [Rule; 2] = [
    // An underscore-prefixed binding not preceded by a quote, so string contents like
    // "_key" are not reported.
    Rule {
        pattern: r#"(?:^|[^"\\\w])_[a-zA-Z0-9]\w*"#,
        what: "underscore-prefixed bindings",
        advice: "Either use the binding (removing the underscore) or remove it completely.",
    },
    Rule {
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        what: "#[allow(dead_code)] attributes",
        advice: "Either use the code (removing the attribute) or remove it completely.",
    },
];

// Collects the matching lines of one file for one rule.
struct ViolationCollector {
    violations: Vec<String>,
    file_path: PathBuf,
}

impl ViolationCollector {
    fn new(file_path: &Path) -> Self {
        Self {
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self, rule: &Rule) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            rule.what,
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!(
            "\n⚠️ {} are not allowed in this project.\n   {}\n",
            rule.what, rule.advice
        ));

        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        if line_text.trim_start().starts_with("//") {
            return Ok(true);
        }

        self.violations.push(format!("{line_number}:{line_text}"));
        Ok(true)
    }
}

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    SOURCE_DIRS.into_iter().flat_map(|dir| {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
            .map(|e| e.into_path())
    })
}

fn scan(rule: &Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
    let mut searcher = Searcher::new();

    for path in rust_sources() {
        let mut collector = ViolationCollector::new(&path);
        searcher.search_path(&matcher, &path, &mut collector)?;

        if let Some(error_message) = collector.check_and_get_error_message(rule) {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    for rule in &RULES {
        if let Err(e) = scan(rule) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

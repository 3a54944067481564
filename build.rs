use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

// Directories scanned for violations, relative to the package root.
const SCANNED_DIRS: [&str; 2] = ["src", "tests"];

// One forbidden source pattern.
struct Rule {
    label: &'static str,
    pattern: &'static str,
    advice: &'static str,
}

const RULES: [Rule; 3] = [
    Rule {
        label: "#[allow(dead_code)] attributes",
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        advice: "Either use the code (removing the attribute) or remove it completely.",
    },
    Rule {
        label: "#[ignore] test attributes",
        pattern: r"#\s*\[\s*ignore\s*(?:=\s*[^\]]*)?\]",
        advice: "Fix or delete the test instead of ignoring it.",
    },
    Rule {
        label: "`let _ = value;` discards",
        pattern: r"\blet\s+(?:mut\s+)?_\s*=\s*([A-Za-z_][A-Za-z0-9_]*)\s*;",
        advice: "Use the value, or drop the binding that produced it.",
    },
];

// Collects every matching line of a single file.
struct LineCollector {
    violations: Vec<String>,
    file_path: PathBuf,
}

impl LineCollector {
    fn new(file_path: &Path) -> Self {
        Self {
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn error_message(&self, rule: &Rule) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            rule.label,
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {} are not allowed in this crate.\n", rule.label));
        error_msg.push_str(&format!("   {}\n", rule.advice));
        Some(error_msg)
    }
}

impl Sink for LineCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        self.violations.push(format!("{line_number}:{line_text}"));
        Ok(true)
    }
}

fn warnings_enabled() -> bool {
    static ENABLE_WARNINGS: OnceLock<bool> = OnceLock::new();
    *ENABLE_WARNINGS.get_or_init(|| match std::env::var("BUILD_VERBOSE") {
        Ok(value) => {
            let normalized = value.trim();
            normalized.eq_ignore_ascii_case("true")
                || normalized.eq_ignore_ascii_case("yes")
                || normalized == "1"
        }
        Err(_) => false,
    })
}

fn emit_stage_detail(detail: &str) {
    if warnings_enabled() {
        println!("cargo:warning=lint detail: {detail}");
    }
}

fn rust_sources() -> Vec<PathBuf> {
    SCANNED_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn scan(rule: &Rule, sources: &[PathBuf]) -> Vec<String> {
    let matcher = match RegexMatcher::new_line_matcher(rule.pattern) {
        Ok(matcher) => matcher,
        Err(e) => return vec![format!("Error creating matcher for {}: {e}", rule.label)],
    };
    let mut searcher = Searcher::new();
    let mut all_violations = Vec::new();
    for path in sources {
        let mut collector = LineCollector::new(path);
        if searcher.search_path(&matcher, path, &mut collector).is_err() {
            continue;
        }
        if let Some(error_message) = collector.error_message(rule) {
            all_violations.push(error_message);
        }
    }
    all_violations
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SCANNED_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    if std::env::var("INVERSION_OPTIMIZE_SKIP_LINT_CHECKS").is_ok() || std::env::var("DOCS_RS").is_ok()
    {
        emit_stage_detail("lint checks skipped");
        return;
    }

    let sources = rust_sources();
    let mut all_violations = Vec::new();
    for rule in &RULES {
        let violations = scan(rule, &sources);
        emit_stage_detail(&format!(
            "{} scan over {} files identified {} violation groups",
            rule.label,
            sources.len(),
            violations.len()
        ));
        all_violations.extend(violations);
    }

    if !all_violations.is_empty() {
        for violation in &all_violations {
            eprintln!("{violation}");
        }
        std::process::exit(1);
    }
}

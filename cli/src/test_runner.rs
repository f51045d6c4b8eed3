use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use expander::{DataMode, Engine, TranslateOptions};

use crate::config::toml_to_runtime;

const TEST_SUFFIX: &str = ".test.mod";

/// Frontmatter of a `.test.mod` case.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestConfig {
    pub description: Option<String>,

    /// Variables seeded into the execution context.
    pub bindings: BTreeMap<String, toml::Value>,

    pub inline_data: bool,
    pub comment_cmds: bool,

    /// Whole output, compared after trimming.
    pub expect_output: Option<String>,
    pub expect_contains: Vec<String>,
    pub expect_absent: Vec<String>,

    /// Substring of the rendered translation error.
    pub expect_error: Option<String>,

    /// The document must be rejected by the scanner.
    pub expect_parse_error: bool,

    /// Submodel commands left queryable, in order of first use.
    pub expect_submodels: Option<Vec<String>>,
}

impl TestConfig {
    fn options(&self) -> TranslateOptions {
        TranslateOptions {
            data_mode: if self.inline_data {
                DataMode::Inline
            } else {
                DataMode::Consolidated
            },
            comment_cmds: self.comment_cmds,
        }
    }
}

/// Split a case into its TOML frontmatter and the model document after it.
fn parse_test_file(content: &str) -> Result<(TestConfig, &str), String> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let rest = content
        .strip_prefix("---")
        .ok_or("a case must start with a --- line")?;
    let rest = rest.strip_prefix('\r').unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);

    let (header, document) = rest
        .split_once("\n---")
        .ok_or("frontmatter is not closed by a --- line")?;
    let document = document.strip_prefix('\r').unwrap_or(document);
    let document = document.strip_prefix('\n').unwrap_or(document);

    let config = toml::from_str(header).map_err(|e| format!("frontmatter: {}", e))?;
    Ok((config, document))
}

/// Outcome of one case file.
pub struct CaseReport {
    pub path: PathBuf,
    pub description: Option<String>,
    pub failure: Option<String>,
}

impl CaseReport {
    fn label(&self) -> &str {
        if let Some(description) = &self.description {
            return description;
        }
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_suffix(TEST_SUFFIX))
            .unwrap_or("?")
    }
}

/// Expand `source` and compare the result with the frontmatter expectations.
fn check_case(config: &TestConfig, source: &str) -> Result<(), String> {
    let scanned = mpl::parser::Parser::new(source.to_string(), 0).parse();
    match (config.expect_parse_error, scanned) {
        (true, Err(_)) => return Ok(()),
        (true, Ok(_)) => return Err("document scanned, but a scan error was expected".into()),
        (false, Err(e)) => return Err(format!("scan error: {}", e)),
        (false, Ok(_)) => {}
    }

    let mut engine = Engine::new();
    for (name, value) in &config.bindings {
        engine.bind(name, toml_to_runtime(value));
    }
    let result = engine.translate_with(source, config.options());

    let output = match (&config.expect_error, result) {
        (None, Ok(output)) => output,
        (None, Err(err)) => return Err(format!("translation failed: {}", err)),
        (Some(expected), Ok(_)) => {
            return Err(format!("translation succeeded, expected error \"{}\"", expected));
        }
        (Some(expected), Err(err)) => {
            let rendered = err.to_string();
            if rendered.contains(expected.as_str()) {
                return Ok(());
            }
            return Err(format!("expected error \"{}\"\n  got: {}", expected, rendered));
        }
    };

    if let Some(expected) = &config.expect_output {
        if output.trim() != expected.trim() {
            return Err(format!(
                "wrong output\n  expected: {}\n  actual:   {}",
                expected.trim(),
                output.trim()
            ));
        }
    }
    for needle in &config.expect_contains {
        if !output.contains(needle.as_str()) {
            return Err(format!("missing \"{}\"\n  actual: {}", needle, output.trim()));
        }
    }
    for needle in &config.expect_absent {
        if output.contains(needle.as_str()) {
            return Err(format!("unexpected \"{}\"\n  actual: {}", needle, output.trim()));
        }
    }

    if let Some(expected) = &config.expect_submodels {
        let actual = engine.submodels();
        if actual != expected.as_slice() {
            return Err(format!(
                "submodels [{}], expected [{}]",
                actual.join(", "),
                expected.join(", ")
            ));
        }
    }
    Ok(())
}

fn run_case(path: &Path) -> CaseReport {
    let checked = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read case: {}", e))
        .and_then(|content| {
            let (config, source) = parse_test_file(&content)?;
            let description = config.description.clone();
            Ok((description, check_case(&config, source)))
        });
    let (description, failure) = match checked {
        Ok((description, outcome)) => (description, outcome.err()),
        Err(e) => (None, Some(e)),
    };
    CaseReport {
        path: path.to_path_buf(),
        description,
        failure,
    }
}

// ------------------------------------------------------------------
// Discovery
// ------------------------------------------------------------------

/// Case files under `root` keyed by the folder they live in, relative to
/// `root` ("" for files directly inside it).
fn discover_categorized(root: &Path) -> BTreeMap<String, Vec<PathBuf>> {
    let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    collect_tests(root, root, &mut categories);
    categories.values_mut().for_each(|files| files.sort());
    categories
}

fn collect_tests(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<PathBuf>>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for path in entries.flatten().map(|entry| entry.path()) {
        if path.is_dir() {
            collect_tests(&path, root, out);
            continue;
        }
        let is_case = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(TEST_SUFFIX));
        if !is_case {
            continue;
        }
        let category = path
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        out.entry(category).or_default().push(path);
    }
}

fn display_category(category: &str) -> &str {
    if category.is_empty() { "(root)" } else { category }
}

/// Print the categories found under `path`.
pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("{} is a single case", path.display());
        return;
    }
    let categories = discover_categorized(path);
    if categories.is_empty() {
        eprintln!("no {} files under {}", TEST_SUFFIX, path.display());
        return;
    }
    for (category, files) in &categories {
        eprintln!("{:>4}  {}", files.len(), display_category(category));
    }
}

/// Keep the requested categories and the folders nested below them.
fn select_categories(
    all_categories: BTreeMap<String, Vec<PathBuf>>,
    requested: &[String],
) -> BTreeMap<String, Vec<PathBuf>> {
    let wanted: Vec<&str> = requested.iter().map(|r| r.trim_matches('/')).collect();
    for name in &wanted {
        let known = all_categories
            .keys()
            .any(|cat| cat == name || cat.starts_with(&format!("{}/", name)));
        if !known {
            let available: Vec<&str> = all_categories.keys().map(|k| display_category(k)).collect();
            eprintln!(
                "warning: no category '{}' (have: {})",
                name,
                available.join(", ")
            );
        }
    }
    all_categories
        .into_iter()
        .filter(|(cat, _)| {
            wanted
                .iter()
                .any(|name| cat == name || cat.starts_with(&format!("{}/", name)))
        })
        .collect()
}

// ------------------------------------------------------------------
// Reporting
// ------------------------------------------------------------------

struct Palette {
    color: bool,
}

impl Palette {
    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    fn pass(&self) -> String {
        self.paint("32", "PASS")
    }

    fn fail(&self) -> String {
        self.paint("31", "FAIL")
    }
}

#[derive(Default)]
struct Summary {
    passed: usize,
    failures: Vec<CaseReport>,
}

impl Summary {
    fn record(&mut self, report: CaseReport, palette: &Palette) {
        match report.failure {
            None => {
                self.passed += 1;
                eprintln!("  {}  {}", palette.pass(), report.label());
            }
            Some(_) => {
                eprintln!("  {}  {}", palette.fail(), report.label());
                self.failures.push(report);
            }
        }
    }

    fn render(&self, palette: &Palette) -> String {
        let mut text = String::new();
        if !self.failures.is_empty() {
            text.push_str("\nfailures:\n");
            for report in &self.failures {
                let _ = writeln!(text, "\n  {}", report.path.display());
                for line in report.failure.iter().flat_map(|f| f.lines()) {
                    let _ = writeln!(text, "    {}", line);
                }
            }
        }
        let verdict = if self.failures.is_empty() {
            palette.paint("32", "ok")
        } else {
            palette.paint("31", "FAILED")
        };
        let _ = write!(
            text,
            "\n{} passed, {} failed: {}",
            self.passed,
            self.failures.len(),
            verdict
        );
        text
    }
}

/// Run the case at `path`, or every case below it when it is a directory,
/// restricted to `categories` when any are given.
///
/// Returns the process exit code: 0 when every case passes, 1 otherwise.
pub fn run_tests(path: &Path, no_color: bool, categories: &[String]) -> i32 {
    let selected = if path.is_file() {
        BTreeMap::from([(String::new(), vec![path.to_path_buf()])])
    } else {
        let found = discover_categorized(path);
        if found.is_empty() {
            eprintln!("no {} files under {}", TEST_SUFFIX, path.display());
            return 1;
        }
        if categories.is_empty() {
            found
        } else {
            select_categories(found, categories)
        }
    };
    if selected.is_empty() {
        eprintln!("no matching categories");
        return 1;
    }

    let palette = Palette { color: !no_color };
    let mut summary = Summary::default();
    for (category, files) in selected {
        if !path.is_file() {
            eprintln!("\n{}", palette.paint("1", display_category(&category)));
        }
        for file in files {
            summary.record(run_case(&file), &palette);
        }
    }
    eprintln!("{}", summary.render(&palette));

    if summary.failures.is_empty() { 0 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontmatter_and_document() {
        let (config, source) =
            parse_test_file("---\ndescription = \"sets\"\nexpect_output = \"x\"\n---\n$SET[A]{[1]};\n").unwrap();
        assert_eq!(config.description.as_deref(), Some("sets"));
        assert_eq!(source, "$SET[A]{[1]};\n");

        let (config, source) = parse_test_file("---\n\n---\n").unwrap();
        assert!(config.expect_output.is_none());
        assert_eq!(source, "");

        assert!(parse_test_file("$SET[A]{[1]};").is_err());
        assert!(parse_test_file("---\nexpect = 1\n---\n").is_err());
    }

    #[test]
    fn passing_and_failing_cases() {
        let config = TestConfig {
            expect_output: Some("set A := {1};".into()),
            ..TestConfig::default()
        };
        assert!(check_case(&config, "$SET[A]{[1]};\n").is_ok());
        assert!(check_case(&config, "$SET[A]{[2]};").is_err());

        let config = TestConfig {
            expect_error: Some("division by zero".into()),
            ..TestConfig::default()
        };
        assert!(check_case(&config, "$EXEC{1/0};").is_ok());

        let config = TestConfig {
            expect_parse_error: true,
            ..TestConfig::default()
        };
        assert!(check_case(&config, "$SET[A]{[1]}").is_ok());
    }

    #[test]
    fn discovers_cases_by_category() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("decl")).unwrap();
        std::fs::write(dir.path().join("decl/set.test.mod"), "---\n\n---\n").unwrap();
        std::fs::write(dir.path().join("top.test.mod"), "---\n\n---\n").unwrap();
        std::fs::write(dir.path().join("notes.mod"), "").unwrap();
        let found = discover_categorized(dir.path());
        assert_eq!(found.keys().collect::<Vec<_>>(), ["", "decl"]);
        assert_eq!(select_categories(found, &["decl/".to_string()]).len(), 1);
        assert_eq!(run_tests(dir.path(), true, &[]), 0);
    }

    #[test]
    fn bundled_cases_pass() {
        let cases = Path::new(env!("CARGO_MANIFEST_DIR")).join("../tests/cases");
        assert_eq!(run_tests(&cases, true, &[]), 0);
        assert_eq!(run_tests(&cases, true, &["errors".to_string()]), 0);
    }
}

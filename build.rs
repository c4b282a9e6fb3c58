use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED", "CORRECTED", "FIX", "FIXES", "NEW", "CHANGED", "CHANGES", "CHANGE", "MODIFIED",
    "MODIFIES", "MODIFY", "UPDATED", "UPDATES", "UPDATE",
];

/// Which source policy a scan enforces.
#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    ForbiddenWords,
    StarsInComment,
    AllCapsComment,
    AllowDeadCode,
}

impl Rule {
    const ALL: [Rule; 5] = [
        Rule::UnderscorePrefix,
        Rule::ForbiddenWords,
        Rule::StarsInComment,
        Rule::AllCapsComment,
        Rule::AllowDeadCode,
    ];

    fn pattern(self) -> String {
        match self {
            Rule::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenWords => format!(r"(//|/\*|///).*(?:{})", FORBIDDEN_WORDS.join("|")),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::AllCapsComment => r"(//|/\*|///).*".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => "underscore-prefixed variables",
            Rule::ForbiddenWords => "forbidden comment patterns",
            Rule::StarsInComment => "'**' sequences in regular comments",
            Rule::AllCapsComment => "comments with all uppercase alphabetic characters",
            Rule::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => {
                "Either use the variable (removing the underscore) or remove it completely."
            }
            Rule::ForbiddenWords => {
                "Comments narrating edits are STRICTLY FORBIDDEN. Remove them completely."
            }
            Rule::StarsInComment => "The '**' pattern is only allowed in doc comments.",
            Rule::AllCapsComment => "STRONGLY CONSIDER deleting the comment completely.",
            Rule::AllowDeadCode => "Either use the code (removing the attribute) or remove it completely.",
        }
    }

    /// Whether a matched line really violates the rule.
    fn is_violation(self, line: &str) -> bool {
        match self {
            Rule::UnderscorePrefix => !is_comment(line) && !underscore_only_in_strings(line),
            Rule::ForbiddenWords | Rule::AllowDeadCode => true,
            Rule::StarsInComment => !is_doc_comment(line),
            Rule::AllCapsComment => comment_text(line).is_some_and(|text| {
                let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }),
        }
    }

    /// The build script itself names the patterns it forbids.
    fn scans_build_script(self) -> bool {
        matches!(self, Rule::UnderscorePrefix)
    }
}

struct ViolationCollector {
    rule: Rule,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl ViolationCollector {
    fn new(rule: Rule, file_path: &Path) -> Self {
        Self {
            rule,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.describe(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.rule.advice()));
        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with("//") || line.contains("/*")
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///")
}

// Odd-numbered pieces between double quotes are string contents.
fn underscore_only_in_strings(line: &str) -> bool {
    line.contains('"')
        && line
            .split('"')
            .enumerate()
            .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///") {
        Some(rest.trim())
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        Some(rest.trim())
    } else {
        let idx = line.find("/*")?;
        let rest = &line[idx + 2..];
        Some(rest.find("*/").map_or(rest, |end| &rest[..end]).trim())
    }
}

fn rust_sources() -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(".")
        .into_iter()
        .filter_entry(|e| !e.path().starts_with("./target") && !e.path().starts_with("./examples"))
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
}

fn scan(rule: Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    let mut searcher = Searcher::new();
    for entry in rust_sources() {
        if entry.file_name() == "build.rs" && !rule.scans_build_script() {
            continue;
        }
        let path = entry.path();
        let mut collector = ViolationCollector::new(rule, path);
        searcher.search_path(&matcher, path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=calibrate");
    println!("cargo:rerun-if-changed=cli");

    for rule in Rule::ALL {
        if let Err(e) = scan(rule) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Only the crate's own sources are policed. Reference material elsewhere in the
// tree is left alone.
const SOURCE_DIRS: &[&str] = &["score", "evaluate", "explore", "src", "tests", "benches"];

#[derive(Clone, Copy)]
enum Policy {
    UnderscoreBinding,
    AllowDeadCode,
    ChangeLogComment,
    AllCapsComment,
}

impl Policy {
    fn pattern(self) -> &'static str {
        match self {
            Self::UnderscoreBinding => r"\b(_[a-zA-Z0-9_]+)\b",
            Self::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
            Self::ChangeLogComment => {
                r"(//|/\*).*\b(?:FIXED|CORRECTED|FIX|FIXES|CHANGED|MODIFIED|UPDATED)\b"
            }
            Self::AllCapsComment => r"^\s*(//|/\*)",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::UnderscoreBinding => "underscore-prefixed bindings",
            Self::AllowDeadCode => "#[allow(dead_code)] attributes",
            Self::ChangeLogComment => "change-log comments",
            Self::AllCapsComment => "all-uppercase comments",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Self::UnderscoreBinding => {
                "Either use the binding (removing the underscore) or remove it completely."
            }
            Self::AllowDeadCode => "Either use the code or remove it completely.",
            Self::ChangeLogComment => {
                "Comments describe the code as it is. History belongs in version control."
            }
            Self::AllCapsComment => "Write the comment in sentence case or delete it.",
        }
    }

    // Underscore names inside comments or string literals are not bindings, and a
    // comment is only shouting when it has letters and all of them are capitals.
    fn accepts(self, line: &str) -> bool {
        match self {
            Self::UnderscoreBinding => {
                let trimmed = line.trim_start();
                if trimmed.starts_with("//") || trimmed.starts_with("/*") {
                    return false;
                }
                !line
                    .split('"')
                    .enumerate()
                    .any(|(i, part)| i % 2 == 1 && part.contains('_'))
            }
            Self::AllCapsComment => {
                let text = line
                    .trim_start()
                    .trim_start_matches('/')
                    .trim_start_matches(['!', '*']);
                let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }
            Self::AllowDeadCode | Self::ChangeLogComment => true,
        }
    }
}

// Collects the matching lines of a single file for one policy.
struct ViolationCollector {
    policy: Policy,
    file_path: PathBuf,
    violations: Vec<String>,
}

impl ViolationCollector {
    fn new(policy: Policy, file_path: &Path) -> Self {
        Self {
            policy,
            file_path: file_path.to_path_buf(),
            violations: Vec::new(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.policy.describe(),
            self.file_path.display()
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.policy.advice()));
        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.policy.accepts(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
}

fn scan(policy: Policy) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(policy.pattern())?;
    let mut searcher = Searcher::new();
    for path in rust_sources() {
        let mut collector = ViolationCollector::new(policy, &path);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message() {
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

    for policy in [
        Policy::UnderscoreBinding,
        Policy::AllowDeadCode,
        Policy::ChangeLogComment,
        Policy::AllCapsComment,
    ] {
        if let Err(e) = scan(policy) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

//! Languages and per-language check fragments
//!
//! Each (language, test type) pair maps to at most one shell fragment. The
//! placeholder `{file}` is replaced by the materialized file name.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Source language of the code under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// Python 3
    Python,
    /// Rust
    Rust,
    /// JavaScript (Node)
    JavaScript,
    /// TypeScript
    TypeScript,
    /// Go
    Go,
}

impl Language {
    /// Every supported language
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::Rust,
        Language::JavaScript,
        Language::TypeScript,
        Language::Go,
    ];

    /// Detect the language from a file extension
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "py" | "pyi" => Some(Self::Python),
            "rs" => Some(Self::Rust),
            "js" | "mjs" | "cjs" => Some(Self::JavaScript),
            "ts" | "mts" | "tsx" => Some(Self::TypeScript),
            "go" => Some(Self::Go),
            _ => None,
        }
    }

    /// Lower-case name, also the config key for images
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Rust => "rust",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
        }
    }

    /// Default file extension
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::Rust => "rs",
            Self::JavaScript => "js",
            Self::TypeScript => "ts",
            Self::Go => "go",
        }
    }

    /// Default container image
    #[must_use]
    pub fn default_image(self) -> &'static str {
        match self {
            Self::Python => "python:3.12-slim",
            Self::Rust => "rust:1-slim",
            Self::JavaScript | Self::TypeScript => "node:20-slim",
            Self::Go => "golang:1.22",
        }
    }

    /// Shell fragment for one test type, if the language has one
    #[must_use]
    pub fn fragment(self, test_type: TestType) -> Option<&'static str> {
        use TestType::{Lint, Syntax, TypeCheck, Unit};
        match (self, test_type) {
            (Self::Python, Syntax) => Some("python3 -m py_compile {file}"),
            (Self::Python, Lint) => Some("python3 -m pyflakes {file}"),
            (Self::Python, TypeCheck) => Some("python3 -m mypy --ignore-missing-imports {file}"),
            (Self::Python, Unit) => Some("python3 -m pytest -q {file}"),

            (Self::Rust, Syntax) => Some("rustfmt --edition 2021 --emit stdout {file} > /dev/null"),
            (Self::Rust, Lint) => Some(
                "clippy-driver --edition 2021 --crate-type lib -D warnings {file} -o /dev/null",
            ),
            (Self::Rust, TypeCheck) => {
                Some("rustc --edition 2021 --crate-type lib --emit=metadata -o /dev/null {file}")
            }
            (Self::Rust, Unit) => {
                Some("rustc --edition 2021 --test {file} -o ./autofix_tests && ./autofix_tests")
            }

            (Self::JavaScript, Syntax) => Some("node --check {file}"),
            (Self::JavaScript, Lint) => Some("npx --no-install eslint {file}"),
            (Self::JavaScript, TypeCheck) => None,
            (Self::JavaScript, Unit) => Some("node --test {file}"),

            (Self::TypeScript, Syntax | TypeCheck) => {
                Some("npx --no-install tsc --noEmit --skipLibCheck {file}")
            }
            (Self::TypeScript, Lint) => Some("npx --no-install eslint {file}"),
            (Self::TypeScript, Unit) => None,

            (Self::Go, Syntax) => Some("test -z \"$(gofmt -e -l {file})\""),
            (Self::Go, Lint) => Some("go vet {file}"),
            (Self::Go, TypeCheck) => Some("go build -o /dev/null {file}"),
            (Self::Go, Unit) => Some("go test {file}"),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "rust" | "rs" => Ok(Self::Rust),
            "javascript" | "js" | "node" => Ok(Self::JavaScript),
            "typescript" | "ts" => Ok(Self::TypeScript),
            "go" | "golang" => Ok(Self::Go),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

/// Kind of check run against modified code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    /// Parse only
    Syntax,
    /// Linter
    Lint,
    /// Type checker or compiler
    TypeCheck,
    /// Unit tests
    Unit,
}

impl TestType {
    /// Every test type in execution order
    pub const ALL: [TestType; 4] = [
        TestType::Syntax,
        TestType::Lint,
        TestType::TypeCheck,
        TestType::Unit,
    ];

    /// Lower-case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Lint => "lint",
            Self::TypeCheck => "type_check",
            Self::Unit => "unit",
        }
    }
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "syntax" => Ok(Self::Syntax),
            "lint" => Ok(Self::Lint),
            "type_check" | "typecheck" => Ok(Self::TypeCheck),
            "unit" => Ok(Self::Unit),
            other => Err(format!("unknown test type: {other}")),
        }
    }
}

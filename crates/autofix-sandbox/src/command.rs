//! Test command composition

use crate::error::TestError;
use crate::language::{Language, TestType};
use serde::{Deserialize, Serialize};

/// One check, already bound to a file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFragment {
    /// Check kind
    pub test_type: TestType,
    /// Shell script run with `sh -c`
    pub script: String,
}

/// Ordered checks for one file
///
/// Rendering joins the fragments with `&&`; the runner executes them one at
/// a time so the first failing fragment can be named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCommand {
    /// Checks in execution order
    pub fragments: Vec<CommandFragment>,
    /// Requested types the language has no check for
    pub skipped: Vec<TestType>,
}

impl TestCommand {
    /// Build the command for `file_name` from the requested test types
    ///
    /// Duplicates are ignored and checks always run in syntax, lint,
    /// type-check, unit order.
    ///
    /// # Errors
    /// Returns `TestError::NoTestCommand` when none of the requested types
    /// has a fragment for the language
    pub fn build(
        language: Language,
        test_types: &[TestType],
        file_name: &str,
    ) -> Result<Self, TestError> {
        let quoted = shell_quote(file_name);
        let mut fragments = Vec::new();
        let mut skipped = Vec::new();

        for test_type in TestType::ALL {
            if !test_types.contains(&test_type) {
                continue;
            }
            match language.fragment(test_type) {
                Some(template) => fragments.push(CommandFragment {
                    test_type,
                    script: template.replace("{file}", &quoted),
                }),
                None => skipped.push(test_type),
            }
        }

        if fragments.is_empty() {
            return Err(TestError::NoTestCommand {
                language: language.to_string(),
            });
        }

        Ok(Self { fragments, skipped })
    }

    /// Single-line form, fragments joined with `&&`
    #[must_use]
    pub fn render(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.script.as_str())
            .collect::<Vec<_>>()
            .join(" && ")
    }

    /// Test types that will run
    #[must_use]
    pub fn test_types(&self) -> Vec<TestType> {
        self.fragments.iter().map(|f| f.test_type).collect()
    }

    /// Number of fragments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Whether there is nothing to run
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Single-quote a word for POSIX `sh`
fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b'/'))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    /// Path does not exist
    pub fn path_not_found(path: &Path) -> Self {
        Self::new(format!("Path not found: {}", path.display()))
            .with_context("The specified path does not exist on the filesystem")
            .with_suggestions([
                format!("TRY: Check that the path exists: ls -la {}", path.display()),
                "TRY: Check for typos in the path".to_string(),
            ])
    }

    /// Explicit config file is missing
    pub fn config_not_found(path: &Path) -> Self {
        Self::new(format!("Config file not found: {}", path.display()))
            .with_context("--config (or SUNAT_CONFIG) points to a file that does not exist")
            .with_suggestions([
                "TRY: Drop --config to run with defaults".to_string(),
                format!("TRY: Create it with the keys you need, e.g. source_dir = \"/data/inbox\" in {}", path.display()),
            ])
    }

    /// Pipeline selector is not a known document type
    pub fn unknown_pipeline(name: &str, known: &[&str]) -> Self {
        Self::new(format!("Unknown pipeline: {}", name))
            .with_context("The pipeline must be one of the document types the classifier knows")
            .with_suggestion(format!("TRY: One of: {}", known.join(", ")))
            .with_suggestion("TRY: sunat classify <file name>   # See which type a file maps to")
    }

    /// Database could not be opened
    pub fn database_unavailable(path: &Path, cause: impl fmt::Display) -> Self {
        Self::new("Failed to open database")
            .with_context(format!("Database: {} ({})", path.display(), cause))
            .with_suggestion("TRY: Check the path and permissions, or set queue_db_path in the config file")
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;

use crate::errors::{AppError, AppResult};

const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_STRICT_PROJECT: &str = "1";

/// Inbound body for project create/update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub strict_project: Option<String>,
    pub currency: Option<String>,
}

/// Validated, upstream-shaped form fields for a project write.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectForm {
    pub name: String,
    pub description: Option<String>,
    /// `MM-DD-YYYY`
    pub start_date: Option<String>,
    /// `MM-DD-YYYY`
    pub end_date: Option<String>,
    pub strict_project: String,
    pub currency: String,
}

impl ProjectForm {
    /// Field pairs in submission order; absent optionals are skipped.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![("name", self.name.clone())];
        if let Some(d) = &self.description {
            out.push(("description", d.clone()));
        }
        if let Some(d) = &self.start_date {
            out.push(("start_date", d.clone()));
        }
        if let Some(d) = &self.end_date {
            out.push(("end_date", d.clone()));
        }
        out.push(("strict_project", self.strict_project.clone()));
        out.push(("currency", self.currency.clone()));
        out
    }
}

impl ProjectInput {
    /// Checks every rule and reports all violations at once.
    pub fn validate(&self) -> AppResult<ProjectForm> {
        let mut errors = Vec::new();

        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        if name.is_none() {
            errors.push("Project name is required".to_string());
        }

        let start = parse_date("Start date", self.start_date.as_deref(), &mut errors);
        let end = parse_date("End date", self.end_date.as_deref(), &mut errors);
        if let (Some(s), Some(e)) = (start, end) {
            if e <= s {
                errors.push("End date must be greater than start date".to_string());
            }
        }

        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        Ok(ProjectForm {
            name: name.unwrap_or_default().to_string(),
            description: self
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from),
            start_date: start.map(upstream_date),
            end_date: end.map(upstream_date),
            strict_project: non_blank_or(self.strict_project.as_deref(), DEFAULT_STRICT_PROJECT),
            currency: non_blank_or(self.currency.as_deref(), DEFAULT_CURRENCY),
        })
    }
}

/// Rejects blank path identifiers before any upstream call.
pub fn require_id(label: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{} is required", label)));
    }
    Ok(())
}

fn parse_date(label: &str, raw: Option<&str>, errors: &mut Vec<String>) -> Option<NaiveDate> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    errors.push(format!("{} must be in YYYY-MM-DD format", label));
    None
}

fn upstream_date(d: NaiveDate) -> String {
    d.format("%m-%d-%Y").to_string()
}

fn non_blank_or(value: Option<&str>, default: &str) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

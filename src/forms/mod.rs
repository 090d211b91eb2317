//! Declarative form validation.
//!
//! Each form declares a `FormSchema` once: an ordered list of fields with the
//! rules they must satisfy. Validation runs locally and never touches the
//! backend; failures come back as per-field messages.

pub mod schemas;
pub mod submission;

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

pub use submission::{FormKey, FormStatus, SubmitError, SubmitGuard, SubmitPermit};

lazy_static! {
    /// Shared e-mail format rule used by every form
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$"
    ).unwrap();

    static ref SLUG_REGEX: Regex = Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").unwrap();

    static ref DATE_REGEX: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
}

/// Submitted field values, keyed by field name
pub type FormValues = HashMap<String, String>;

/// Field name to messages, in field order
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Required,
    Email,
    MinLength(usize),
    MaxLength(usize),
    Numeric,
    Positive,
    Slug,
    Date,
    OneOf(&'static [&'static str]),
    /// Must equal the value of another field
    Matches(&'static str),
}

impl Rule {
    /// Check one value. Empty optional values only fail `Required`.
    fn check(&self, label: &str, value: &str, values: &FormValues) -> Option<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() && *self != Rule::Required {
            return None;
        }
        match self {
            Rule::Required if trimmed.is_empty() => Some(format!("{} is required", label)),
            Rule::Required => None,
            Rule::Email if !is_valid_email(trimmed) => Some("Invalid email address".to_string()),
            Rule::MinLength(min) if value.chars().count() < *min => Some(format!(
                "{} must be at least {} characters",
                label, min
            )),
            Rule::MaxLength(max) if value.chars().count() > *max => Some(format!(
                "{} must be at most {} characters",
                label, max
            )),
            Rule::Numeric if trimmed.parse::<f64>().map_or(true, |n| !n.is_finite()) => {
                Some(format!("{} must be a number", label))
            }
            Rule::Positive if trimmed.parse::<f64>().map_or(false, |n| n <= 0.0) => {
                Some(format!("{} must be greater than 0", label))
            }
            Rule::Slug if !SLUG_REGEX.is_match(trimmed) => Some(format!(
                "{} may only contain lowercase letters, numbers and dashes",
                label
            )),
            Rule::Date if !is_valid_date(trimmed) => {
                Some(format!("{} must be a date (YYYY-MM-DD)", label))
            }
            Rule::OneOf(options) if !options.iter().any(|o| o.eq_ignore_ascii_case(trimmed)) => {
                Some(format!("{} must be one of: {}", label, options.join(", ")))
            }
            Rule::Matches(other) if values.get(*other).map(String::as_str) != Some(value) => {
                Some(format!("{} does not match", label))
            }
            _ => None,
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

fn is_valid_date(date: &str) -> bool {
    DATE_REGEX.is_match(date) && chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub label: &'static str,
    pub rules: Vec<Rule>,
    /// Never echoed back to the client
    pub secret: bool,
}

#[derive(Debug, Clone)]
pub struct FormSchema {
    pub name: &'static str,
    /// Label shown on the submit control while a submission is pending
    pub busy_label: &'static str,
    pub fields: Vec<Field>,
}

impl FormSchema {
    pub fn new(name: &'static str, busy_label: &'static str) -> Self {
        Self {
            name,
            busy_label,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &'static str, label: &'static str, rules: Vec<Rule>) -> Self {
        self.fields.push(Field {
            name,
            label,
            rules,
            secret: false,
        });
        self
    }

    pub fn secret(mut self, name: &'static str, label: &'static str, rules: Vec<Rule>) -> Self {
        self.fields.push(Field {
            name,
            label,
            rules,
            secret: true,
        });
        self
    }

    /// Validate every field; collects all messages rather than stopping at the first
    pub fn validate(&self, values: &FormValues) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        for field in &self.fields {
            let value = values.get(field.name).map(String::as_str).unwrap_or("");
            for rule in &field.rules {
                if let Some(message) = rule.check(field.label, value, values) {
                    errors.entry(field.name.to_string()).or_default().push(message);
                    // Later rules on an empty required field only add noise
                    if *rule == Rule::Required {
                        break;
                    }
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Values safe to send back so the client can keep the form filled in
    pub fn preserved(&self, values: &FormValues) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .filter(|field| !field.secret)
            .filter_map(|field| {
                values
                    .get(field.name)
                    .map(|value| (field.name.to_string(), value.clone()))
            })
            .collect()
    }
}

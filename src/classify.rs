use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extract::{FieldObservation, FieldType};

static TWELVE_DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{12}$").unwrap());
static PAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z]{5}[0-9]{4}[A-Z]$").unwrap());
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z\s]+$").unwrap());
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static TEN_DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{10}$").unwrap());
static SERVER_PHONE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9+\-\s()]{10,15}$").unwrap());

/// Inferred semantic category of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Aadhar,
    Pan,
    Name,
    Email,
    Phone,
    Text,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Aadhar => "aadhar",
            Role::Pan => "pan",
            Role::Name => "name",
            Role::Email => "email",
            Role::Phone => "phone",
            Role::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Role {
        match s {
            "aadhar" => Role::Aadhar,
            "pan" => Role::Pan,
            "name" => Role::Name,
            "email" => Role::Email,
            "phone" => Role::Phone,
            _ => Role::Text,
        }
    }
}

/// Ordered inference table, evaluated top to bottom; first match wins.
/// Keywords are case-insensitive substrings of the resolved field name.
const ROLE_KEYWORDS: &[(Role, &[&str])] = &[
    (Role::Aadhar, &["aadhar", "aadhaar", "uid", "unique id", "identity"]),
    (Role::Pan, &["pan", "permanent account number", "tax id"]),
    (Role::Name, &["name", "first", "last", "full", "given", "surname"]),
    (Role::Email, &["email", "e-mail", "mail"]),
    (Role::Phone, &["phone", "mobile", "contact", "tel", "number"]),
];

/// Verdict attached to an observation by `validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    pub role: Role,
    pub message: String,
}

/// An observation together with its verdict, as stored and synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedField {
    #[serde(flatten)]
    pub observation: FieldObservation,
    pub validation: Validation,
}

/// Infer a role from the field name (and, for email/phone, the declared
/// display type). Pure; identical input yields identical output.
pub fn classify(obs: &FieldObservation) -> Role {
    let name = obs.name.to_lowercase();
    for &(role, keywords) in ROLE_KEYWORDS {
        let type_match = matches!(
            (role, obs.field_type),
            (Role::Email, FieldType::Email) | (Role::Phone, FieldType::Phone)
        );
        if type_match || keywords.iter().any(|k| name.contains(k)) {
            return role;
        }
    }
    Role::Text
}

/// Apply the inferred role's format rule and produce a verdict.
pub fn validate(obs: &FieldObservation) -> Validation {
    let role = classify(obs);
    let (is_valid, message) = verdict(role, &obs.value);
    Validation {
        is_valid,
        role,
        message: message.to_string(),
    }
}

fn verdict(role: Role, value: &str) -> (bool, &'static str) {
    match role {
        Role::Aadhar => {
            let cleaned: String = value.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
            if TWELVE_DIGITS_RE.is_match(&cleaned) {
                (true, "Valid Aadhar number")
            } else {
                (false, "Invalid Aadhar number (should be 12 digits)")
            }
        }
        Role::Pan => {
            if PAN_RE.is_match(&value.to_uppercase()) {
                (true, "Valid PAN number")
            } else {
                (
                    false,
                    "Invalid PAN number (should be 10 characters: 5 letters + 4 digits + 1 letter)",
                )
            }
        }
        Role::Name => {
            let trimmed = value.trim();
            if trimmed.len() >= 2 && NAME_RE.is_match(trimmed) {
                (true, "Valid name")
            } else {
                (false, "Invalid name (should be at least 2 characters, letters only)")
            }
        }
        Role::Email => {
            if EMAIL_RE.is_match(value) {
                (true, "Valid email")
            } else {
                (false, "Invalid email format")
            }
        }
        Role::Phone => {
            let cleaned: String = value
                .chars()
                .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
                .collect();
            if TEN_DIGITS_RE.is_match(&cleaned) {
                (true, "Valid phone number")
            } else {
                (false, "Invalid phone number (should be 10 digits)")
            }
        }
        Role::Text => {
            if value.trim().is_empty() {
                (false, "Empty field")
            } else {
                (true, "Valid text")
            }
        }
    }
}

/// The collector's own phone rule: 10-15 characters of digits, `+`, `-`,
/// spaces or parentheses. Deliberately looser than the 10-digit rule that
/// gates storage; applied only to records fetched back from the remote.
pub fn server_phone_shape(value: &str) -> bool {
    SERVER_PHONE_RE.is_match(value)
}

// ── Tests ──

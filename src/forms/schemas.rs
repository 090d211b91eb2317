//! Field rules for every input form of the site.

use super::{FormSchema, Rule};
use crate::expenses::Category;

/// Minimum password length accepted by the backend
pub const MIN_PASSWORD_LEN: usize = 6;

pub fn login() -> FormSchema {
    FormSchema::new("login", "Signing in...")
        .field("email", "Email", vec![Rule::Required, Rule::Email])
        .secret(
            "password",
            "Password",
            vec![Rule::Required, Rule::MinLength(MIN_PASSWORD_LEN)],
        )
}

pub fn sign_up() -> FormSchema {
    FormSchema::new("sign_up", "Creating account...")
        .field("first_name", "First name", vec![Rule::Required, Rule::MaxLength(50)])
        .field("last_name", "Last name", vec![Rule::Required, Rule::MaxLength(50)])
        .field("email", "Email", vec![Rule::Required, Rule::Email])
        .secret(
            "password",
            "Password",
            vec![Rule::Required, Rule::MinLength(MIN_PASSWORD_LEN)],
        )
        .secret(
            "confirm_password",
            "Confirm password",
            vec![Rule::Required, Rule::Matches("password")],
        )
}

pub fn forgot_password() -> FormSchema {
    FormSchema::new("forgot_password", "Sending...")
        .field("email", "Email", vec![Rule::Required, Rule::Email])
}

pub fn contact() -> FormSchema {
    FormSchema::new("contact", "Sending...")
        .field("name", "Name", vec![Rule::Required, Rule::MaxLength(100)])
        .field("email", "Email", vec![Rule::Required, Rule::Email])
        .field(
            "message",
            "Message",
            vec![Rule::Required, Rule::MinLength(10), Rule::MaxLength(5000)],
        )
}

pub fn expense() -> FormSchema {
    FormSchema::new("expense", "Adding...")
        .field("date", "Date", vec![Rule::Required, Rule::Date])
        .field("description", "Description", vec![Rule::Required, Rule::MaxLength(200)])
        .field("category", "Category", vec![Rule::Required, Rule::OneOf(Category::NAMES)])
        .field("amount", "Amount", vec![Rule::Required, Rule::Numeric, Rule::Positive])
}

/// Editing an expense only touches the amount; any sign is accepted as typed
pub fn expense_amount() -> FormSchema {
    FormSchema::new("expense_amount", "Saving...")
        .field("amount", "Amount", vec![Rule::Required, Rule::Numeric])
}

pub fn brand() -> FormSchema {
    FormSchema::new("brand", "Saving...")
        .field("name", "Brand name", vec![Rule::Required, Rule::MaxLength(80)])
        .field("slug", "Handle", vec![Rule::Required, Rule::Slug, Rule::MaxLength(40)])
        .field("description", "Description", vec![Rule::MaxLength(2000)])
}

pub fn tier() -> FormSchema {
    FormSchema::new("tier", "Saving...")
        .field("name", "Tier name", vec![Rule::Required, Rule::MaxLength(60)])
        .field("amount", "Monthly amount", vec![Rule::Required, Rule::Numeric, Rule::Positive])
        .field("description", "Description", vec![Rule::MaxLength(1000)])
}

pub fn update() -> FormSchema {
    FormSchema::new("update", "Publishing...")
        .field("title", "Title", vec![Rule::Required, Rule::MaxLength(120)])
        .field("body", "Body", vec![Rule::Required, Rule::MinLength(20)])
}

pub fn payout() -> FormSchema {
    FormSchema::new("payout", "Requesting...")
        .field("amount", "Amount", vec![Rule::Required, Rule::Numeric, Rule::Positive])
}

/// Schema of a form by its name
pub fn by_name(name: &str) -> Option<FormSchema> {
    let schema = match name {
        "login" => login(),
        "sign_up" => sign_up(),
        "forgot_password" => forgot_password(),
        "contact" => contact(),
        "expense" => expense(),
        "expense_amount" => expense_amount(),
        "brand" => brand(),
        "tier" => tier(),
        "update" => update(),
        "payout" => payout(),
        _ => return None,
    };
    Some(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::FormValues;

    fn values(pairs: &[(&str, &str)]) -> FormValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_every_email_form_uses_the_shared_rule() {
        for schema in [login(), sign_up(), forgot_password(), contact()] {
            let email = schema
                .fields
                .iter()
                .find(|f| f.name == "email")
                .unwrap_or_else(|| panic!("{} has no email field", schema.name));
            assert!(email.rules.contains(&Rule::Email), "{}", schema.name);
        }
    }

    #[test]
    fn test_sign_up_password_rules() {
        let base = [
            ("first_name", "Ada"),
            ("last_name", "Lovelace"),
            ("email", "ada@example.com"),
        ];
        let mut ok = values(&base);
        ok.insert("password".to_string(), "secret".to_string());
        ok.insert("confirm_password".to_string(), "secret".to_string());
        assert!(sign_up().validate(&ok).is_ok());

        let mut short = ok.clone();
        short.insert("password".to_string(), "five5".to_string());
        short.insert("confirm_password".to_string(), "five5".to_string());
        let errors = sign_up().validate(&short).unwrap_err();
        assert!(errors.contains_key("password"));
        assert!(!errors.contains_key("confirm_password"));
    }

    #[test]
    fn test_expense_category_names() {
        let ok = values(&[
            ("date", "2024-05-01"),
            ("description", "Groceries"),
            ("category", "Food"),
            ("amount", "50"),
        ]);
        assert!(expense().validate(&ok).is_ok());

        let mut bad = ok.clone();
        bad.insert("category".to_string(), "Travel".to_string());
        assert!(expense().validate(&bad).is_err());
    }

    #[test]
    fn test_amount_edit_accepts_negative_values() {
        assert!(expense_amount().validate(&values(&[("amount", "-20")])).is_ok());
        assert!(expense_amount().validate(&values(&[("amount", "x")])).is_err());
    }

    #[test]
    fn test_lookup_by_name() {
        for name in ["login", "sign_up", "contact", "payout"] {
            assert_eq!(by_name(name).map(|s| s.name), Some(name));
        }
        assert!(by_name("unknown").is_none());
    }
}

//! Normalization helpers shared by sources, merger and store.
//!
//! - company identity (name + domain)
//! - email classification (named person vs role mailbox)
//! - phone normalization to E.164
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::LazyLock;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .expect("email regex is valid")
});

/// Local parts that identify a shared mailbox rather than a person.
const GENERIC_LOCAL_PARTS: &[&str] = &[
    "info",
    "contact",
    "hello",
    "bonjour",
    "office",
    "admin",
    "support",
    "sales",
    "noreply",
    "no-reply",
    "webmaster",
    "mail",
    "team",
    "reception",
    "secretariat",
    "booking",
    "reservation",
    "reservations",
    "service",
    "enquiries",
    "hr",
    "jobs",
];

/// Legal-form tokens dropped from the end of a company name.
const LEGAL_SUFFIXES: &[&str] = &[
    "sa", "sarl", "ag", "gmbh", "ltd", "llc", "inc", "sas", "srl", "sasu", "eurl", "plc", "bv",
];

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

/// Normalize a company name for identity comparison.
///
/// Lowercases, folds common accents, drops punctuation and trailing legal
/// forms: `"ACME S.A."` and `"Acme SA"` both become `"acme"`.
pub fn normalize_company_name(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(fold_accent)
        .filter(|c| *c != '.')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    while tokens.len() > 1 {
        match tokens.last() {
            Some(last) if LEGAL_SUFFIXES.contains(last) => {
                tokens.pop();
            }
            _ => break,
        }
    }

    let joined = tokens.join(" ");
    if joined.is_empty() {
        name.trim().to_lowercase()
    } else {
        joined
    }
}

/// Extract the registrable host of a website URL (`https://www.Acme.ch/fr` -> `acme.ch`).
pub fn extract_domain(url_or_host: &str) -> Option<String> {
    let trimmed = url_or_host.trim();
    if trimmed.is_empty() {
        return None;
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let parsed = url::Url::parse(&with_scheme).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    if host.contains('.') {
        Some(host)
    } else {
        None
    }
}

/// Domain part of an email address, lowercased.
pub fn email_domain(email: &str) -> Option<String> {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_lowercase())
        .filter(|d| !d.is_empty())
}

/// Role mailboxes (`info@`, `contact@`, ...) rank below any named-person address.
pub fn is_generic_email(email: &str) -> bool {
    let local = match email.split_once('@') {
        Some((local, _)) => local.trim().to_lowercase(),
        None => return false,
    };
    GENERIC_LOCAL_PARTS.contains(&local.as_str())
}

/// Validate an email address.
///
/// Rejects malformed addresses and obvious placeholder patterns (long
/// repeated digit runs) that directories sometimes return.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    let fake_patterns = ["999999", "111111", "000000", "123456789"];
    if let Some(pattern) = fake_patterns.iter().find(|p| email.contains(*p)) {
        tracing::debug!("Rejected email with placeholder pattern '{}': {}", pattern, email);
        return false;
    }

    // Asset filenames scraped from HTML look like emails (logo@2x.png)
    let lower = email.to_lowercase();
    if [".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"]
        .iter()
        .any(|ext| lower.ends_with(ext))
    {
        return false;
    }

    EMAIL_REGEX.is_match(email)
}

/// Map a configured country (name or ISO code) to a phone region.
pub fn region_for_country(country: &str) -> Option<CountryId> {
    let lower = country.trim().to_lowercase();
    let id = match lower.as_str() {
        "ch" | "suisse" | "switzerland" | "schweiz" | "svizzera" => CountryId::CH,
        "fr" | "france" => CountryId::FR,
        "de" | "germany" | "deutschland" | "allemagne" => CountryId::DE,
        "be" | "belgium" | "belgique" => CountryId::BE,
        "it" | "italy" | "italie" | "italia" => CountryId::IT,
        "at" | "austria" | "autriche" | "österreich" => CountryId::AT,
        "lu" | "luxembourg" => CountryId::LU,
        "es" | "spain" | "espagne" | "españa" => CountryId::ES,
        "gb" | "uk" | "united kingdom" | "royaume-uni" => CountryId::GB,
        "us" | "usa" | "united states" | "états-unis" => CountryId::US,
        "ca" | "canada" => CountryId::CA,
        "br" | "brazil" | "brasil" | "brésil" => CountryId::BR,
        _ => return None,
    };
    Some(id)
}

/// Validate and normalize a phone number to E.164 (`+41220000000`).
///
/// Numbers without an international prefix are parsed in the region of
/// `country`. Returns `None` for anything libphonenumber does not accept.
pub fn normalize_phone(raw: &str, country: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digit_count = trimmed.chars().filter(|c| c.is_ascii_digit()).count();
    if digit_count < 8 {
        return None;
    }

    let region = region_for_country(country);
    match phonenumber::parse(region, trimmed) {
        Ok(number) if phonenumber::is_valid(&number) => {
            Some(number.format().mode(Mode::E164).to_string())
        }
        Ok(_) => {
            tracing::debug!("Invalid phone number for {}: {}", country, trimmed);
            None
        }
        Err(e) => {
            tracing::debug!("Failed to parse phone '{}': {:?}", trimmed, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_name_drops_legal_form_and_punctuation() {
        assert_eq!(normalize_company_name("Acme SA"), "acme");
        assert_eq!(normalize_company_name("ACME S.A."), "acme");
        assert_eq!(normalize_company_name("  Café de la Gare Sàrl "), "cafe de la gare");
        assert_eq!(normalize_company_name("Müller & Söhne GmbH"), "muller sohne");
    }

    #[test]
    fn test_company_name_keeps_lone_legal_token() {
        assert_eq!(normalize_company_name("SA"), "sa");
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://www.Acme.ch/fr/contact"), Some("acme.ch".to_string()));
        assert_eq!(extract_domain("acme.ch"), Some("acme.ch".to_string()));
        assert_eq!(extract_domain("http://shop.acme.ch"), Some("shop.acme.ch".to_string()));
        assert_eq!(extract_domain(""), None);
        assert_eq!(extract_domain("localhost"), None);
    }

    #[test]
    fn test_generic_email_detection() {
        assert!(is_generic_email("info@acme.ch"));
        assert!(is_generic_email("Contact@acme.ch"));
        assert!(!is_generic_email("j.dupont@acme.ch"));
        assert!(!is_generic_email("ceo@x.com"));
        assert!(!is_generic_email("not-an-email"));
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("j.dupont@acme.ch"));
        assert!(!is_valid_email("logo@2x.png"));
        assert!(!is_valid_email("11999999999@gmail.com"));
        assert!(!is_valid_email("a@b"));
    }

    #[test]
    fn test_phone_normalization_swiss() {
        assert_eq!(
            normalize_phone("022 310 12 34", "Suisse"),
            Some("+41223101234".to_string())
        );
        assert_eq!(
            normalize_phone("+41 22 310 12 34", "unknown"),
            Some("+41223101234".to_string())
        );
        assert_eq!(normalize_phone("1234", "Suisse"), None);
    }
}

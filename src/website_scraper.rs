//! Direct scrape of a company website: contact emails, phone, LinkedIn page
//! and the web technologies the site is built with.
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

use crate::errors::SourceError;
use crate::models::{Candidate, Field, FieldData, PartialRecord, Quality, SourceId};
use crate::normalize::{email_domain, extract_domain, is_generic_email, is_valid_email};
use crate::sources::{ensure_success, http_client, SourceClient, SourceRole};

static EMAIL_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("email pattern is valid")
});

/// Signature patterns per technology, matched against the raw HTML.
static TECH_SIGNATURES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("wordpress", r"wp-content|wp-includes|wp-json|/wp-admin/"),
        ("shopify", r"cdn\.shopify|shopifycdn\.com|Shopify\.theme"),
        ("prestashop", r"(?i)prestashop"),
        ("woocommerce", r"(?i)woocommerce|wc-api"),
        ("magento", r"(?i)magento|Mage\.Cookies"),
        ("drupal", r"(?i)drupal|/sites/default/files"),
        ("joomla", r"(?i)joomla"),
        ("squarespace", r"(?i)squarespace"),
        ("wix", r"wixstatic\.com|wixpress\.com|wix\.com"),
        ("react", r"react-dom|data-reactroot|_next/static"),
        ("vue", r"vue(\.min)?\.js|data-v-[0-9a-f]{6}|__vue__"),
        ("angular", r"ng-version|angular(\.min)?\.js"),
        ("bootstrap", r"(?i)bootstrap(\.min)?\.(css|js)"),
        ("jquery", r"(?i)jquery(-[0-9.]+)?(\.min)?\.js"),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (name, re)))
    .collect()
});

const PHP_PLATFORMS: &[&str] = &["wordpress", "prestashop", "woocommerce", "magento", "drupal", "joomla"];

/// Detect technologies from page HTML and the `Server` response header.
pub fn detect_technologies(html: &str, server_header: Option<&str>) -> Vec<String> {
    let mut found: BTreeSet<String> = TECH_SIGNATURES
        .iter()
        .filter(|(_, re)| re.is_match(html))
        .map(|(name, _)| name.to_string())
        .collect();

    if found.iter().any(|t| PHP_PLATFORMS.contains(&t.as_str())) {
        found.insert("php".to_string());
    }

    if let Some(server) = server_header.map(str::to_lowercase) {
        for known in ["nginx", "apache", "cloudflare", "litespeed"] {
            if server.contains(known) {
                found.insert(known.to_string());
            }
        }
    }

    found.into_iter().collect()
}

/// Everything pulled out of one HTML page.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PageFindings {
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub linkedin_company: Option<String>,
    pub contact_page: Option<String>,
}

/// Parse a page. Sync on purpose: `scraper::Html` is not `Send`.
pub fn extract_page(html: &str, base_url: &str) -> PageFindings {
    let document = Html::parse_document(html);
    let mut findings = PageFindings::default();
    let mut emails = BTreeSet::new();

    if let Ok(link_selector) = Selector::parse("a[href]") {
        for link in document.select(&link_selector) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let href = href.trim();
            if let Some(mail) = href.strip_prefix("mailto:") {
                let mail = mail.split('?').next().unwrap_or_default().trim().to_lowercase();
                if is_valid_email(&mail) {
                    emails.insert(mail);
                }
            } else if let Some(tel) = href.strip_prefix("tel:") {
                let tel = tel.trim().to_string();
                if !tel.is_empty() && !findings.phones.contains(&tel) {
                    findings.phones.push(tel);
                }
            } else if href.contains("linkedin.com/company") {
                if findings.linkedin_company.is_none() {
                    findings.linkedin_company = Some(href.split('?').next().unwrap_or(href).to_string());
                }
            } else if findings.contact_page.is_none() && href.to_lowercase().contains("contact") {
                findings.contact_page = resolve_link(base_url, href);
            }
        }
    }

    let text: String = document.root_element().text().collect::<Vec<_>>().join(" ");
    for m in EMAIL_IN_TEXT.find_iter(&text) {
        let mail = m.as_str().trim_end_matches('.').to_lowercase();
        if is_valid_email(&mail) {
            emails.insert(mail);
        }
    }

    findings.emails = emails.into_iter().collect();
    findings
}

fn resolve_link(base_url: &str, href: &str) -> Option<String> {
    let base = url::Url::parse(base_url).ok()?;
    let joined = base.join(href).ok()?;
    // Stay on the company's own site
    if joined.host_str() != base.host_str() {
        return None;
    }
    Some(joined.to_string())
}

/// Best address: named at the company domain, then generic at the domain, then anything.
pub fn pick_email(emails: &[String], domain: Option<&str>) -> Option<String> {
    let on_domain = |e: &&String| match (domain, email_domain(e)) {
        (Some(d), Some(ed)) => ed == d || ed.ends_with(&format!(".{}", d)),
        _ => false,
    };
    emails
        .iter()
        .find(|e| on_domain(e) && !is_generic_email(e))
        .or_else(|| emails.iter().find(|e| on_domain(e)))
        .or_else(|| emails.iter().find(|e| !is_generic_email(e)))
        .or_else(|| emails.first())
        .cloned()
}

pub struct WebsiteScraper {
    client: Client,
}

impl WebsiteScraper {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
        }
    }

    async fn fetch(&self, url: &str) -> Result<(String, Option<String>), SourceError> {
        let response = self.client.get(url).send().await?;
        let response = ensure_success(response).await?;
        let server = response
            .headers()
            .get(reqwest::header::SERVER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        Ok((body, server))
    }
}

fn normalize_url(website: &str) -> String {
    let trimmed = website.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

#[async_trait]
impl SourceClient for WebsiteScraper {
    fn id(&self) -> SourceId {
        SourceId::Website
    }

    fn role(&self) -> SourceRole {
        SourceRole::Enrichment
    }

    async fn lookup(&self, candidate: &Candidate) -> Result<Option<PartialRecord>, SourceError> {
        let Some(website) = candidate.website.as_deref() else {
            return Ok(None);
        };
        let url = normalize_url(website);
        let domain = extract_domain(&url);

        let (html, server) = self.fetch(&url).await?;
        let technologies = detect_technologies(&html, server.as_deref());
        let mut findings = extract_page(&html, &url);

        if findings.emails.is_empty() {
            if let Some(contact_url) = findings.contact_page.clone() {
                match self.fetch(&contact_url).await {
                    Ok((contact_html, _)) => {
                        let contact = extract_page(&contact_html, &contact_url);
                        findings.emails = contact.emails;
                        if findings.phones.is_empty() {
                            findings.phones = contact.phones;
                        }
                        if findings.linkedin_company.is_none() {
                            findings.linkedin_company = contact.linkedin_company;
                        }
                    }
                    Err(e) => tracing::debug!("Contact page {} not reachable: {}", contact_url, e),
                }
            }
        }

        let mut record = PartialRecord::new(SourceId::Website)
            .with_opt_text(Field::Email, pick_email(&findings.emails, domain.as_deref()))
            .with_opt_text(Field::Phone, findings.phones.first().cloned())
            .with_opt_text(Field::LinkedinCompany, findings.linkedin_company.clone());
        record.set(Field::Technologies, FieldData::List(technologies), Quality::Unverified);

        if record.is_empty() {
            return Ok(None);
        }

        tracing::info!(
            "✓ Website {}: {} email(s), technologies: {}",
            url,
            findings.emails.len(),
            match record.get(Field::Technologies) {
                Some(v) => match &v.data {
                    FieldData::List(items) => items.join(", "),
                    _ => String::new(),
                },
                None => "none".to_string(),
            }
        );
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head>
          <link rel="stylesheet" href="/wp-content/themes/acme/bootstrap.min.css">
          <script src="/wp-includes/js/jquery/jquery.min.js"></script>
        </head><body>
          <a href="mailto:info@acme.ch">Écrivez-nous</a>
          <a href="tel:+41223101234">Appeler</a>
          <a href="https://www.linkedin.com/company/acme-sa?trk=foo">LinkedIn</a>
          <a href="/fr/contact">Contact</a>
          <p>Direction: j.dupont@acme.ch. Logo: logo@2x.png</p>
        </body></html>
    "#;

    #[test]
    fn test_extract_page() {
        let findings = extract_page(PAGE, "https://acme.ch/");
        assert_eq!(findings.emails, vec!["info@acme.ch".to_string(), "j.dupont@acme.ch".to_string()]);
        assert_eq!(findings.phones, vec!["+41223101234".to_string()]);
        assert_eq!(
            findings.linkedin_company.as_deref(),
            Some("https://www.linkedin.com/company/acme-sa")
        );
        assert_eq!(findings.contact_page.as_deref(), Some("https://acme.ch/fr/contact"));
    }

    #[test]
    fn test_pick_email_prefers_named_on_domain() {
        let emails = vec![
            "info@acme.ch".to_string(),
            "j.dupont@acme.ch".to_string(),
            "someone@gmail.com".to_string(),
        ];
        assert_eq!(pick_email(&emails, Some("acme.ch")).as_deref(), Some("j.dupont@acme.ch"));
        assert_eq!(pick_email(&emails[..1], Some("acme.ch")).as_deref(), Some("info@acme.ch"));
        assert_eq!(pick_email(&[], Some("acme.ch")), None);
    }

    #[test]
    fn test_detect_technologies() {
        let techs = detect_technologies(PAGE, Some("nginx/1.24"));
        assert_eq!(techs, vec!["bootstrap", "jquery", "nginx", "php", "wordpress"]);
    }

    #[test]
    fn test_detect_technologies_plain_page() {
        assert!(detect_technologies("<html><body>Hello</body></html>", None).is_empty());
    }

    #[test]
    fn test_resolve_link_stays_on_site() {
        assert_eq!(resolve_link("https://acme.ch/", "https://other.ch/contact"), None);
        assert_eq!(
            resolve_link("https://acme.ch/fr/", "contact.html").as_deref(),
            Some("https://acme.ch/fr/contact.html")
        );
    }
}

use serde::{Deserialize, Serialize};

use crate::models::{Field, Prospect};

/// Upper bound on the sum of all weights accepted from configuration.
pub const MAX_WEIGHT_TOTAL: u32 = 1000;

/// Weight of each relevance signal. The defaults sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub email: u32,
    pub phone: u32,
    pub decision_maker: u32,
    pub linkedin: u32,
    pub firmographic: u32,
    pub maps: u32,
    pub web: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            email: 25,
            phone: 20,
            decision_maker: 15,
            linkedin: 10,
            firmographic: 15,
            maps: 10,
            web: 5,
        }
    }
}

impl ScoreWeights {
    /// Defaults shifted toward the signals that matter for the offered service.
    pub fn for_service(service: &str) -> Self {
        let service = service.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| service.contains(w));

        if has(&["site", "web", "seo", "marketing", "digital", "numérique"]) {
            Self {
                email: 25,
                phone: 15,
                decision_maker: 15,
                linkedin: 10,
                firmographic: 10,
                maps: 10,
                web: 15,
            }
        } else if has(&["conseil", "consult", "formation", "coaching"]) {
            Self {
                email: 25,
                phone: 15,
                decision_maker: 20,
                linkedin: 15,
                firmographic: 15,
                maps: 5,
                web: 5,
            }
        } else if has(&["commerce", "vente", "retail", "e-commerce", "boutique"]) {
            Self {
                email: 20,
                phone: 20,
                decision_maker: 10,
                linkedin: 5,
                firmographic: 15,
                maps: 20,
                web: 10,
            }
        } else {
            Self::default()
        }
    }

    /// Parse `email=25,phone=20` overrides on top of `base`.
    pub fn parse(raw: &str, base: Self) -> Result<Self, String> {
        let mut weights = base;
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, value) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected signal=weight, got '{}'", entry))?;
            let value: u32 = value
                .trim()
                .parse()
                .map_err(|_| format!("weight for '{}' must be a non-negative integer", name.trim()))?;
            let slot = match name.trim().to_lowercase().as_str() {
                "email" => &mut weights.email,
                "phone" => &mut weights.phone,
                "decision_maker" | "person" => &mut weights.decision_maker,
                "linkedin" => &mut weights.linkedin,
                "firmographic" => &mut weights.firmographic,
                "maps" | "reviews" => &mut weights.maps,
                "web" => &mut weights.web,
                other => return Err(format!("unknown score signal '{}'", other)),
            };
            *slot = value;
        }
        weights.validate()?;
        Ok(weights)
    }

    /// Rejects weight sets whose total exceeds `MAX_WEIGHT_TOTAL`.
    pub fn validate(&self) -> Result<(), String> {
        let total = self.total();
        if total > MAX_WEIGHT_TOTAL {
            return Err(format!(
                "weights sum to {}, at most {} is allowed",
                total, MAX_WEIGHT_TOTAL
            ));
        }
        Ok(())
    }

    pub fn total(&self) -> u32 {
        [
            self.email,
            self.phone,
            self.decision_maker,
            self.linkedin,
            self.firmographic,
            self.maps,
            self.web,
        ]
        .into_iter()
        .fold(0u32, u32::saturating_add)
    }
}

/// Grades are per-mille so the sum stays integral and deterministic.
const FULL: u32 = 1000;

#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    weights: ScoreWeights,
    min_rating: f64,
    min_reviews: u32,
}

impl RelevanceScorer {
    pub fn new(weights: ScoreWeights, min_rating: f64, min_reviews: u32) -> Self {
        Self {
            weights,
            min_rating,
            min_reviews,
        }
    }

    /// Compute the relevance score of a merged Prospect.
    ///
    /// Each signal contributes `weight * grade`; grades never decrease when a
    /// field is added, so neither does the score. Arithmetic saturates.
    ///
    /// # Returns
    ///
    /// * `i32` - Score clamped to 0..=100.
    pub fn score(&self, prospect: &Prospect) -> i32 {
        let w = &self.weights;
        let total = [
            (w.email, email_grade(prospect)),
            (w.phone, phone_grade(prospect)),
            (w.decision_maker, decision_maker_grade(prospect)),
            (w.linkedin, linkedin_grade(prospect)),
            (w.firmographic, firmographic_grade(prospect)),
            (w.maps, self.maps_grade(prospect)),
            (w.web, web_grade(prospect)),
        ]
        .into_iter()
        .fold(0u64, |acc, (weight, grade)| {
            acc.saturating_add(u64::from(weight).saturating_mul(u64::from(grade)))
        });

        (total / u64::from(FULL)).min(100) as i32
    }

    fn maps_grade(&self, prospect: &Prospect) -> u32 {
        let rating_ok = prospect.rating.is_some_and(|r| r >= self.min_rating);
        let reviews_ok = prospect.review_count.is_some_and(|c| c >= self.min_reviews);
        match (rating_ok, reviews_ok) {
            (true, true) => FULL,
            (true, false) | (false, true) => FULL / 2,
            (false, false) => 0,
        }
    }
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::new(ScoreWeights::default(), 4.0, 10)
    }
}

/// Deliverable mailboxes grade higher; an unverified or rejected one still counts half.
fn email_grade(prospect: &Prospect) -> u32 {
    if !prospect.has(Field::Email) {
        return 0;
    }
    match prospect.email_status.as_deref() {
        Some("valid") => FULL,
        Some("catch-all") => 700,
        _ => 500,
    }
}

fn phone_grade(prospect: &Prospect) -> u32 {
    if !prospect.has(Field::Phone) {
        return 0;
    }
    let verified = prospect
        .field_sources
        .get(&Field::Phone)
        .is_some_and(|p| p.class > 0);
    if verified {
        FULL
    } else {
        500
    }
}

fn decision_maker_grade(prospect: &Prospect) -> u32 {
    if prospect.has(Field::PersonName) {
        FULL
    } else if prospect.has(Field::PersonTitle) {
        300
    } else {
        0
    }
}

fn linkedin_grade(prospect: &Prospect) -> u32 {
    if prospect.has(Field::LinkedinCompany) || prospect.has(Field::LinkedinPerson) {
        FULL
    } else {
        0
    }
}

fn firmographic_grade(prospect: &Prospect) -> u32 {
    let present = [Field::CompanySize, Field::Industry, Field::Revenue]
        .into_iter()
        .filter(|f| prospect.has(*f))
        .count() as u32;
    present * FULL / 3
}

fn web_grade(prospect: &Prospect) -> u32 {
    let mut grade = 0;
    if prospect.has(Field::Website) {
        grade += FULL / 2;
    }
    if prospect.has(Field::Technologies) {
        grade += FULL / 2;
    }
    grade
}

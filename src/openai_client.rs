//! Outreach message generation (chat completions) and the template fallback.
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::errors::SourceError;
use crate::models::Prospect;
use crate::sources::{
    ensure_success, fallback_selection_reason, fallback_service_proposal, http_client, read_json,
    GeneratedMessage, MessageGenerator, RelevanceAnalysis,
};

const SYSTEM_PROMPT: &str =
    "Tu es un expert en prospection B2B. Tu génères toujours des réponses au format JSON valide.";

const DEFAULT_SPECIFIC_POINT: &str = "votre expertise dans votre domaine";

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct MessagePayload {
    #[serde(alias = "point_specifique")]
    specific_point: Option<String>,
    #[serde(alias = "message_personnalise")]
    message: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct AnalysisPayload {
    #[serde(alias = "raison_choix")]
    selection_reason: Option<String>,
    #[serde(alias = "proposition_service")]
    service_proposal: Option<String>,
}

impl AnalysisPayload {
    /// Each missing or blank key falls back on its own.
    fn into_analysis(self, service_offered: &str) -> RelevanceAnalysis {
        RelevanceAnalysis {
            selection_reason: self
                .selection_reason
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| fallback_selection_reason(service_offered)),
            service_proposal: self
                .service_proposal
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| fallback_service_proposal(service_offered)),
        }
    }
}

/// Renders the configured template. Placeholders: `{company}`, `{contact}`,
/// `{specific_point}`, `{value_proposition}`.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    template: String,
    value_proposition: String,
}

impl MessageTemplate {
    pub fn new(template: impl Into<String>, value_proposition: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            value_proposition: value_proposition.into(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn value_proposition(&self) -> &str {
        &self.value_proposition
    }

    pub fn render(&self, prospect: &Prospect, specific_point: Option<&str>) -> GeneratedMessage {
        let specific_point = specific_point
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SPECIFIC_POINT)
            .to_string();
        let contact = prospect
            .decision_maker_name
            .as_deref()
            .unwrap_or("Madame, Monsieur");
        let message = self
            .template
            .replace("{company}", &prospect.company_name)
            .replace("{contact}", contact)
            .replace("{specific_point}", &specific_point)
            .replace("{value_proposition}", &self.value_proposition);
        GeneratedMessage {
            message,
            specific_point,
        }
    }
}

/// Strip a ```json fence some models wrap around their answer.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let inner = if let Some(rest) = trimmed.split_once("```json").map(|(_, r)| r) {
        rest
    } else if let Some(rest) = trimmed.split_once("```").map(|(_, r)| r) {
        rest
    } else {
        return trimmed;
    };
    inner.split("```").next().unwrap_or(inner).trim()
}

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    template: MessageTemplate,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        template: MessageTemplate,
        timeout: Duration,
    ) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            template,
        }
    }

    fn facts(prospect: &Prospect) -> String {
        let mut facts = vec![format!("- Nom: {}", prospect.company_name)];
        let optional = [
            ("Site web", prospect.website.as_deref()),
            ("Industrie", prospect.industry.as_deref()),
            ("Taille", prospect.company_size.as_deref()),
            ("Adresse", prospect.address.as_deref()),
            ("Dirigeant", prospect.decision_maker_name.as_deref()),
            ("Poste", prospect.decision_maker_title.as_deref()),
        ];
        for (label, value) in optional {
            if let Some(value) = value {
                facts.push(format!("- {}: {}", label, value));
            }
        }
        if let (Some(rating), Some(reviews)) = (prospect.rating, prospect.review_count) {
            facts.push(format!("- Note Google: {:.1} ({} avis)", rating, reviews));
        }
        if !prospect.technologies.is_empty() {
            facts.push(format!("- Technologies du site: {}", prospect.technologies.join(", ")));
        }
        facts.join("\n")
    }

    fn prompt(&self, prospect: &Prospect) -> String {
        format!(
            "Analyse les informations suivantes sur une entreprise et génère un message de prospection personnalisé.\n\n\
             INFORMATIONS DE L'ENTREPRISE:\n{}\n\n\
             TEMPLATE DE MESSAGE:\n{}\n\n\
             PROPOSITION DE VALEUR: {}\n\n\
             TÂCHES:\n\
             1. Identifie UN point spécifique et positif sur cette entreprise.\n\
             2. Rédige le message en remplaçant {{company}}, {{contact}}, {{specific_point}} et {{value_proposition}}.\n\n\
             Réponds UNIQUEMENT avec un JSON: {{\"specific_point\": \"...\", \"message\": \"...\"}}",
            Self::facts(prospect),
            self.template.template(),
            self.template.value_proposition()
        )
    }

    fn analysis_prompt(prospect: &Prospect, service_offered: &str, sector: &str) -> String {
        let sector = if sector.trim().is_empty() {
            "non précisé"
        } else {
            sector
        };
        format!(
            "Analyse cette entreprise et explique pourquoi elle est un bon prospect.\n\n\
             INFORMATIONS DE L'ENTREPRISE:\n{}\n\n\
             SERVICE PROPOSÉ: {}\n\
             SECTEUR CIBLÉ: {}\n\n\
             TÂCHES:\n\
             1. Explique en une phrase pourquoi cette entreprise a besoin de ce service.\n\
             2. Propose en une phrase une offre concrète adaptée à son activité.\n\n\
             Réponds UNIQUEMENT avec un JSON: {{\"raison_choix\": \"...\", \"proposition_service\": \"...\"}}",
            Self::facts(prospect),
            service_offered,
            sector
        )
    }

    async fn complete(
        &self,
        prompt: String,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, SourceError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let completion: ChatCompletionResponse = read_json(response).await?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SourceError::Parse("completion without content".to_string()))
    }
}

#[async_trait]
impl MessageGenerator for OpenAiClient {
    async fn generate(&self, prospect: &Prospect) -> Result<GeneratedMessage, SourceError> {
        let content = self.complete(self.prompt(prospect), 0.7, 500).await?;

        let payload: MessagePayload = serde_json::from_str(strip_code_fence(&content))?;
        let message = payload
            .message
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| SourceError::Parse("completion without message".to_string()))?;

        tracing::info!("✓ Message generated for {}", prospect.company_name);
        Ok(GeneratedMessage {
            message,
            specific_point: payload
                .specific_point
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SPECIFIC_POINT.to_string()),
        })
    }

    async fn analyse(
        &self,
        prospect: &Prospect,
        service_offered: &str,
        sector: &str,
    ) -> Result<RelevanceAnalysis, SourceError> {
        let prompt = Self::analysis_prompt(prospect, service_offered, sector);
        let content = self.complete(prompt, 0.9, 700).await?;
        let payload: AnalysisPayload = serde_json::from_str(strip_code_fence(&content))?;
        tracing::info!("✓ Relevance analysed for {}", prospect.company_name);
        Ok(payload.into_analysis(service_offered))
    }
}

//! Recommendation-engine reports, dated with the day they are generated.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use crawlytics_core::{build_intent_report, build_taxonomy_report, build_urls_per_domain_report};
use crawlytics_store::gateway::{DOMAINS_DATA, INTENT_COUNT, TAXONOMY_COUNT};
use crawlytics_store::{PersistenceGateway, WriteAck};
use tracing::{info, instrument};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportsSummary {
    pub taxonomy: Option<WriteAck>,
    pub intent: Option<WriteAck>,
    pub urls_per_domain: Option<WriteAck>,
}

#[instrument(skip(gateway))]
pub async fn run_reports(gateway: &PersistenceGateway, date: NaiveDate) -> Result<ReportsSummary> {
    let groups = gateway
        .taxonomy_groups()
        .await
        .context("failed to count taxonomies")?;
    let taxonomy = build_taxonomy_report(&groups, date);
    info!(taxonomies = taxonomy.taxonomies.len(), "built taxonomy report");

    let intents = gateway
        .intent_counts()
        .await
        .context("failed to count intents")?;
    let intent = build_intent_report(intents, date);

    let domains = gateway
        .urls_per_domain()
        .await
        .context("failed to count urls per domain")?;
    let urls_per_domain = build_urls_per_domain_report(domains, date);

    Ok(ReportsSummary {
        taxonomy: gateway.upsert_report(TAXONOMY_COUNT, &taxonomy).await,
        intent: gateway.upsert_report(INTENT_COUNT, &intent).await,
        urls_per_domain: gateway.upsert_report(DOMAINS_DATA, &urls_per_domain).await,
    })
}
